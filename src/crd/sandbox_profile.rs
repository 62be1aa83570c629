use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, EgressRule, ResourceSpec};

/* ============================= SPEC ============================= */

/// A reusable bundle of security/network/resource defaults a Sandbox or
/// WarmPool can opt into via `profileRef` (§3).
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "llmsafespace.dev",
    version = "v1",
    kind = "SandboxProfile",
    plural = "sandboxprofiles",
    status = "SandboxProfileStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SandboxProfileSpec {
    pub language: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_rules: Vec<EgressRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_installed_packages: Vec<String>,

    #[serde(default)]
    pub resource_defaults: ResourceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_read_only_root: Option<bool>,
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxProfileStatus {
    #[serde(default)]
    pub valid: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_sandbox_profile_crd_kind() {
        let crd = SandboxProfile::crd();
        assert_eq!(crd.spec.names.kind, "SandboxProfile");
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_sandbox_profile_spec_roundtrip() {
        let spec = SandboxProfileSpec {
            language: "python".to_string(),
            seccomp_profile: Some("restricted".to_string()),
            network_rules: vec![EgressRule {
                domain: "pypi.org".to_string(),
                ports: vec![443],
                protocol: Some("tcp".to_string()),
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: SandboxProfileSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.network_rules.len(), 1);
        assert_eq!(back.network_rules[0].domain, "pypi.org");
    }

    #[test]
    fn test_sandbox_profile_status_default_invalid() {
        let status = SandboxProfileStatus::default();
        assert!(!status.valid);
    }
}
