use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, HTTPGetAction, PersistentVolumeClaimVolumeSource,
    Pod, PodSecurityContext, PodSpec, Probe, ResourceRequirements, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error};
use serde_json::json;

use crate::crd::{FilesystemConfig, ResourceSpec, SandboxSecurityContext, SecurityLevel, StorageConfig};

use super::FIELD_MANAGER;

const SANDBOX_PORT: i32 = 8080;
const GVISOR_RUNTIME_CLASS: &str = "gvisor";

/// Builds the pod spec for a sandbox execution container. Runtime image,
/// resource limits, and hardening knobs come straight from the Sandbox
/// (or WarmPool) spec; nothing here is guessable from the cluster.
#[allow(clippy::too_many_arguments)]
pub fn build_pod(
    name: &str,
    namespace: &str,
    runtime_image: &str,
    resources: &ResourceSpec,
    filesystem: &FilesystemConfig,
    security: &SandboxSecurityContext,
    security_level: &SecurityLevel,
    storage: &StorageConfig,
    termination_grace_period_seconds: i64,
    service_account_name: Option<&str>,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "sandbox".to_string(),
                image: Some(runtime_image.to_string()),
                resources: Some(resource_requirements(resources)),
                security_context: Some(SecurityContext {
                    run_as_user: security.run_as_user,
                    run_as_group: security.run_as_group,
                    run_as_non_root: Some(true),
                    read_only_root_filesystem: Some(filesystem.read_only_root),
                    allow_privilege_escalation: Some(false),
                    capabilities: Some(Capabilities { drop: Some(vec!["ALL".to_string()]), add: None }),
                    ..Default::default()
                }),
                volume_mounts: all_mounts(filesystem, storage, name),
                liveness_probe: Some(sandbox_probe(10, 10)),
                readiness_probe: Some(sandbox_probe(2, 5)),
                ..Default::default()
            }],
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                seccomp_profile: security.seccomp_profile.as_ref().map(|profile_type| {
                    k8s_openapi::api::core::v1::SeccompProfile {
                        type_: profile_type.clone(),
                        ..Default::default()
                    }
                }),
                ..Default::default()
            }),
            volumes: all_volumes(filesystem, storage, name),
            runtime_class_name: runtime_class_for(security_level),
            service_account_name: service_account_name.map(str::to_string),
            termination_grace_period_seconds: Some(termination_grace_period_seconds),
            restart_policy: Some("Never".to_string()),
            automount_service_account_token: Some(false),
            ..Default::default()
        }),
        status: None,
    }
}

fn runtime_class_for(security_level: &SecurityLevel) -> Option<String> {
    match security_level {
        SecurityLevel::High => Some(GVISOR_RUNTIME_CLASS.to_string()),
        SecurityLevel::Standard | SecurityLevel::Custom => None,
    }
}

fn sandbox_probe(initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction { path: Some("/healthz".to_string()), port: IntOrString::Int(SANDBOX_PORT), ..Default::default() }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}

fn resource_requirements(resources: &ResourceSpec) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();
    if let Some(cpu) = &resources.cpu {
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
        requests.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &resources.memory {
        limits.insert("memory".to_string(), Quantity(memory.clone()));
        requests.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if let Some(storage) = &resources.ephemeral_storage {
        limits.insert("ephemeral-storage".to_string(), Quantity(storage.clone()));
    }
    ResourceRequirements { limits: Some(limits), requests: Some(requests), claims: None }
}

/// Every sandbox pod always gets a `workspace` and `tmp` emptyDir pair,
/// plus one `writable` emptyDir per custom writable path, plus a `data`
/// volume backed by the sandbox's PVC when persistent storage was
/// requested, plus one volume per caller-declared shared volume name.
fn all_volumes(filesystem: &FilesystemConfig, storage: &StorageConfig, pod_name: &str) -> Option<Vec<Volume>> {
    let mut volumes = vec![
        Volume { name: "workspace".to_string(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() },
        Volume { name: "tmp".to_string(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() },
    ];

    if !filesystem.writable_paths.is_empty() {
        volumes.push(Volume { name: "writable".to_string(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() });
    }

    if storage.persistent {
        volumes.push(Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource { claim_name: pod_name.to_string(), read_only: Some(false) }),
            ..Default::default()
        });
    }

    for shared in &storage.shared_volumes {
        volumes.push(Volume {
            name: shared_volume_name(shared),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource { claim_name: shared.clone(), read_only: Some(false) }),
            ..Default::default()
        });
    }

    Some(volumes)
}

fn all_mounts(filesystem: &FilesystemConfig, storage: &StorageConfig, pod_name: &str) -> Option<Vec<VolumeMount>> {
    let mut mounts = vec![
        VolumeMount { name: "workspace".to_string(), mount_path: "/workspace".to_string(), ..Default::default() },
        VolumeMount { name: "tmp".to_string(), mount_path: "/tmp".to_string(), ..Default::default() },
    ];

    for path in &filesystem.writable_paths {
        mounts.push(VolumeMount { name: "writable".to_string(), mount_path: path.clone(), ..Default::default() });
    }

    if storage.persistent {
        mounts.push(VolumeMount { name: "data".to_string(), mount_path: "/workspace/data".to_string(), ..Default::default() });
        let _ = pod_name;
    }

    for shared in &storage.shared_volumes {
        mounts.push(VolumeMount {
            name: shared_volume_name(shared),
            mount_path: format!("/mnt/shared/{shared}"),
            ..Default::default()
        });
    }

    Some(mounts)
}

fn shared_volume_name(shared: &str) -> String {
    format!("shared-{}", crate::crd::common::normalize_runtime_label(shared))
}

pub async fn ensure(client: Client, namespace: &str, pod: &Pod) -> Result<Pod, Error> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let name = pod.metadata.name.clone().unwrap_or_default();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(pod)).await
}

pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

/// Reference patch used by `recycle.rs` to trigger the in-pod cleanup
/// exec without deleting the pod outright.
pub fn annotate_last_recycled(name: &str, timestamp: &str) -> serde_json::Value {
    json!({
        "metadata": {
            "name": name,
            "annotations": { "llmsafespace.dev/last-recycled-at": timestamp }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FilesystemConfig, ResourceSpec, SandboxSecurityContext};

    fn build(filesystem: &FilesystemConfig, storage: &StorageConfig, security_level: &SecurityLevel) -> Pod {
        build_pod(
            "sbx-1",
            "default",
            "python:3.10",
            &ResourceSpec::default(),
            filesystem,
            &SandboxSecurityContext::default(),
            security_level,
            storage,
            300,
            Some("sbx-1"),
            BTreeMap::new(),
            None,
        )
    }

    #[test]
    fn test_build_pod_sets_runtime_image() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        assert_eq!(pod.spec.unwrap().containers[0].image.as_deref(), Some("python:3.10"));
    }

    #[test]
    fn test_build_pod_never_allows_privilege_escalation() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        let container = &pod.spec.unwrap().containers[0];
        assert_eq!(container.security_context.as_ref().unwrap().allow_privilege_escalation, Some(false));
    }

    #[test]
    fn test_build_pod_drops_all_capabilities() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        let container = &pod.spec.unwrap().containers[0];
        let caps = container.security_context.as_ref().unwrap().capabilities.as_ref().unwrap();
        assert_eq!(caps.drop.as_deref(), Some(["ALL".to_string()].as_slice()));
    }

    #[test]
    fn test_build_pod_read_only_root_follows_filesystem_config() {
        let filesystem = FilesystemConfig { read_only_root: true, writable_paths: vec!["/tmp/scratch".to_string()] };
        let pod = build(&filesystem, &StorageConfig::default(), &SecurityLevel::Standard);
        let spec = pod.spec.unwrap();
        let container = &spec.containers[0];
        assert_eq!(container.security_context.as_ref().unwrap().read_only_root_filesystem, Some(true));
        assert!(container.volume_mounts.as_ref().unwrap().iter().any(|m| m.mount_path == "/tmp/scratch"));
    }

    #[test]
    fn test_build_pod_always_mounts_workspace_and_tmp() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        let spec = pod.spec.unwrap();
        let volumes = spec.volumes.unwrap();
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert!(names.contains(&"workspace"));
        assert!(names.contains(&"tmp"));
    }

    #[test]
    fn test_build_pod_mounts_pvc_when_persistent() {
        let storage = StorageConfig { persistent: true, ..Default::default() };
        let pod = build(&FilesystemConfig::default(), &storage, &SecurityLevel::Standard);
        let spec = pod.spec.unwrap();
        assert!(spec.volumes.as_ref().unwrap().iter().any(|v| v.name == "data"));
        let container = &spec.containers[0];
        assert!(container.volume_mounts.as_ref().unwrap().iter().any(|m| m.name == "data"));
    }

    #[test]
    fn test_build_pod_sets_gvisor_runtime_class_for_high_security() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::High);
        assert_eq!(pod.spec.unwrap().runtime_class_name.as_deref(), Some("gvisor"));
    }

    #[test]
    fn test_build_pod_no_runtime_class_for_standard_security() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        assert!(pod.spec.unwrap().runtime_class_name.is_none());
    }

    #[test]
    fn test_build_pod_sets_termination_grace_period_from_timeout() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        assert_eq!(pod.spec.unwrap().termination_grace_period_seconds, Some(300));
    }

    #[test]
    fn test_build_pod_has_liveness_and_readiness_probes_on_sandbox_port() {
        let pod = build(&FilesystemConfig::default(), &StorageConfig::default(), &SecurityLevel::Standard);
        let container = &pod.spec.unwrap().containers[0];
        assert!(container.liveness_probe.is_some());
        assert!(container.readiness_probe.is_some());
    }

    #[test]
    fn test_resource_requirements_maps_cpu_and_memory() {
        let resources = ResourceSpec {
            cpu: Some("500m".to_string()),
            memory: Some("256Mi".to_string()),
            ..Default::default()
        };
        let reqs = resource_requirements(&resources);
        assert_eq!(reqs.limits.as_ref().unwrap().get("cpu").unwrap().0, "500m");
        assert_eq!(reqs.requests.as_ref().unwrap().get("memory").unwrap().0, "256Mi");
    }
}
