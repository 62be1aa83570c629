//! Resource Managers (§4.7): one module per Kubernetes kind the
//! controller materializes for a Sandbox or WarmPod. Each exposes an
//! idempotent `ensure`/`delete` pair built on server-side apply, so
//! reconcilers can call them unconditionally on every pass without
//! tracking "did I already create this" themselves.

pub mod namespace;
pub mod network_policy;
pub mod pod;
pub mod service;
pub mod service_account;
pub mod volume;

pub const FIELD_MANAGER: &str = "sandbox-controller";

/// Builds the label set every managed resource carries, so list/watch
/// selectors and owner-graph debugging stay consistent across kinds.
pub fn managed_labels(sandbox_id: &str) -> std::collections::BTreeMap<String, String> {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), "sandbox-controller".to_string());
    labels.insert(crate::crd::sandbox::SANDBOX_ID_LABEL.to_string(), sandbox_id.to_string());
    labels
}
