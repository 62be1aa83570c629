use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, ResourceSpec};

/* ============================= VULNERABILITY STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum VulnerabilityStatus {
    #[default]
    Unknown,
    Clean,
    Flagged,
}

/* ============================= SPEC ============================= */

/// Cluster-scoped: a RuntimeEnvironment describes one vetted execution
/// image, shared across namespaces (§3).
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "llmsafespace.dev",
    version = "v1",
    kind = "RuntimeEnvironment",
    plural = "runtimeenvironments",
    status = "RuntimeEnvironmentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEnvironmentSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,

    pub language: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_installed_packages: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_features: Vec<String>,

    #[serde(default)]
    pub resource_requirements: ResourceSpec,

    #[serde(default = "default_true")]
    pub run_as_non_root: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_armor_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_node_features: Vec<String>,
}

fn default_true() -> bool {
    true
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEnvironmentStatus {
    #[serde(default)]
    pub available: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<String>,

    #[serde(default)]
    pub vulnerability_status: VulnerabilityStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

pub const RUNTIME_ENVIRONMENT_VALIDATED_CONDITION: &str = "Validated";

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_runtime_environment_is_cluster_scoped() {
        let crd = RuntimeEnvironment::crd();
        assert_eq!(crd.spec.scope, "Cluster");
    }

    #[test]
    fn test_run_as_non_root_defaults_true() {
        let spec = RuntimeEnvironmentSpec {
            image: "python:3.10".to_string(),
            language: "python".to_string(),
            version: "3.10".to_string(),
            ..Default::default()
        };
        assert!(spec.run_as_non_root);
    }

    #[test]
    fn test_vulnerability_status_default_unknown() {
        assert_eq!(VulnerabilityStatus::default(), VulnerabilityStatus::Unknown);
    }

    #[test]
    fn test_runtime_environment_spec_roundtrip() {
        let spec = RuntimeEnvironmentSpec {
            image: "node:18-alpine".to_string(),
            image_digest: Some("sha256:abc".to_string()),
            language: "javascript".to_string(),
            version: "18".to_string(),
            pre_installed_packages: vec!["npm".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: RuntimeEnvironmentSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.image, "node:18-alpine");
        assert_eq!(back.pre_installed_packages, vec!["npm".to_string()]);
    }
}
