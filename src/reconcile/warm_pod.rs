//! WarmPod Reconciler (§4.5): creates the backing pod for a newly created
//! WarmPod object, promotes it to `Ready` once its readiness probe passes,
//! and tracks heartbeats so a pool reconciler can tell a dead pod from an
//! idle one.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;

use crate::crd::common::{FilesystemConfig, SandboxSecurityContext, SecurityLevel, StorageConfig};
use crate::crd::{WarmPod, WarmPodPhase, WarmPodStatus, WarmPool, WARM_POD_FINALIZER};
use crate::error::ReconcileError;
use crate::exec::{self, ExecChannel};
use crate::resources::{self, FIELD_MANAGER};

use super::Context;

/// Marks a WarmPod whose backing pod already ran its pool's preload
/// packages/scripts once, so a later reconcile pass (e.g. after a
/// heartbeat patch) doesn't re-run them against a live pod.
const PRELOAD_COMPLETE_ANNOTATION: &str = "llmsafespace.dev/preload-complete";

const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;

pub async fn reconcile(warm_pod: Arc<WarmPod>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = warm_pod.namespace().unwrap_or_else(|| "default".to_string());
    let name = warm_pod.name_any();
    let api: Api<WarmPod> = Api::namespaced(ctx.client.clone(), &namespace);

    if warm_pod.meta().deletion_timestamp.is_some() {
        return handle_deletion(&warm_pod, &api, &ctx, &namespace).await;
    }

    if !has_finalizer(&warm_pod) {
        add_finalizer(&api, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(0)));
    }

    let phase = warm_pod.status.as_ref().map(|s| s.phase.clone()).unwrap_or_default();

    let result = match phase {
        WarmPodPhase::Pending => create_backing_pod(&warm_pod, &api, &ctx, &namespace, &name).await,
        WarmPodPhase::Ready | WarmPodPhase::Assigned => {
            heartbeat(&api, &name).await?;
            Ok(Action::requeue(Duration::from_secs(20)))
        }
        WarmPodPhase::Terminating => Ok(Action::await_change()),
    };

    if result.is_ok() {
        ctx.dispatcher.record_success(&crate::queue::ResourceKey::new("WarmPod", namespace, name));
    }
    result
}

async fn create_backing_pod(
    warm_pod: &WarmPod,
    api: &Api<WarmPod>,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    let pool_api: Api<WarmPool> = Api::namespaced(ctx.client.clone(), namespace);
    let pool = pool_api.get(&warm_pod.spec.pool_ref.name).await?;

    let pod_name = format!("{name}-pod");
    let mut labels = resources::managed_labels(name);
    labels.insert(crate::crd::warm_pod::WARM_POD_POOL_LABEL.to_string(), warm_pod.spec.pool_ref.name.clone());

    let pod = resources::pod::build_pod(
        &pod_name,
        namespace,
        &pool.spec.runtime,
        &pool.spec.resources,
        &FilesystemConfig::default(),
        &SandboxSecurityContext::default(),
        &pool.spec.security_level,
        &StorageConfig::default(),
        DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS,
        None,
        labels,
        Some(owner_reference(warm_pod)),
    );
    resources::pod::ensure(ctx.client.clone(), namespace, &pod).await?;

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let created = pods.get(&pod_name).await?;
    let ready = pod_is_ready(&created);

    if ready && !has_run_preload(warm_pod) {
        let channel = ExecChannel::new(ctx.client.clone(), namespace);
        exec::run_preload_scripts(&channel, &pod_name, &pool.spec.preload_packages, &pool.spec.preload_scripts).await;
        mark_preload_complete(api, name).await?;
    }

    patch_status(api, name, |status| {
        status.pod_name = Some(pod_name.clone());
        status.pod_namespace = Some(namespace.to_string());
        status.phase = if ready { WarmPodPhase::Ready } else { WarmPodPhase::Pending };
    })
    .await?;

    Ok(Action::requeue(Duration::from_secs(2)))
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn has_run_preload(warm_pod: &WarmPod) -> bool {
    warm_pod.annotations().contains_key(PRELOAD_COMPLETE_ANNOTATION)
}

async fn mark_preload_complete(api: &Api<WarmPod>, name: &str) -> Result<(), ReconcileError> {
    let patch = json!({ "metadata": { "annotations": { PRELOAD_COMPLETE_ANNOTATION: "true" } } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn heartbeat(api: &Api<WarmPod>, name: &str) -> Result<(), ReconcileError> {
    let patch = json!({ "spec": { "lastHeartbeat": crate::crd::common::utc_now_rfc3339() } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn handle_deletion(warm_pod: &WarmPod, api: &Api<WarmPod>, ctx: &Context, namespace: &str) -> Result<Action, ReconcileError> {
    let name = warm_pod.name_any();

    if !has_finalizer(warm_pod) {
        return Ok(Action::await_change());
    }

    if let Some(pod_name) = warm_pod.status.as_ref().and_then(|s| s.pod_name.clone()) {
        resources::pod::delete(ctx.client.clone(), namespace, &pod_name).await?;
    }

    remove_finalizer(api, &name).await?;
    Ok(Action::await_change())
}

fn owner_reference(warm_pod: &WarmPod) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        api_version: "llmsafespace.dev/v1".to_string(),
        kind: "WarmPod".to_string(),
        name: warm_pod.name_any(),
        uid: warm_pod.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn has_finalizer(warm_pod: &WarmPod) -> bool {
    warm_pod.meta().finalizers.as_ref().map(|f| f.iter().any(|finalizer| finalizer == WARM_POD_FINALIZER)).unwrap_or(false)
}

async fn add_finalizer(api: &Api<WarmPod>, name: &str) -> Result<(), ReconcileError> {
    let patch = json!({ "metadata": { "finalizers": [WARM_POD_FINALIZER] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<WarmPod>, name: &str) -> Result<(), ReconcileError> {
    let current = api.get(name).await?;
    let remaining: Vec<String> = current.meta().finalizers.clone().unwrap_or_default().into_iter().filter(|f| f != WARM_POD_FINALIZER).collect();
    let patch = json!({ "metadata": { "finalizers": remaining } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn patch_status(api: &Api<WarmPod>, name: &str, mutate: impl FnOnce(&mut WarmPodStatus)) -> Result<WarmPod, ReconcileError> {
    let current = api.get_status(name).await?;
    let mut status = current.status.clone().unwrap_or_default();
    mutate(&mut status);
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch)).await.map_err(ReconcileError::from)
}

pub fn error_policy(warm_pod: Arc<WarmPod>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let namespace = warm_pod.namespace().unwrap_or_else(|| "default".to_string());
    let key = crate::queue::ResourceKey::new("WarmPod", namespace, warm_pod.name_any());
    match ctx.dispatcher.record_failure(&key, err) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    #[test]
    fn test_pod_is_ready_true_when_condition_present() {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            conditions: Some(vec![PodCondition { type_: "Ready".to_string(), status: "True".to_string(), ..Default::default() }]),
            ..Default::default()
        });
        assert!(pod_is_ready(&pod));
    }

    #[test]
    fn test_pod_is_ready_false_without_status() {
        assert!(!pod_is_ready(&Pod::default()));
    }

    #[test]
    fn test_has_finalizer() {
        let mut warm_pod = WarmPod::new("wp-1", Default::default());
        assert!(!has_finalizer(&warm_pod));
        warm_pod.meta_mut().finalizers = Some(vec![WARM_POD_FINALIZER.to_string()]);
        assert!(has_finalizer(&warm_pod));
    }
}
