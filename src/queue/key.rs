use std::fmt;

/// Typed work-item identity: `<kind>/<namespace>/<name>`. Used by the
/// dispatcher to guarantee at most one in-flight reconcile per object,
/// mirroring the per-object serialization `kube_runtime::Controller`
/// already gives each owned kind, extended here across kinds sharing a
/// dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
