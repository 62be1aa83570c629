//! Sandbox Reconciler (§4.2): drives a Sandbox through
//! Pending → Creating → Running → Terminating → Terminated, preferring a
//! warm pod allocation over building a pod from scratch whenever a
//! matching WarmPool has one ready.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

use crate::allocator;
use crate::crd::common::{set_condition, Condition, ConditionStatus, ObjectRef, SECURITY_EVENT_ANNOTATION};
use crate::crd::{
    RuntimeEnvironment, Sandbox, SandboxPhase, SandboxProfile, SandboxStatus, WarmPod, WarmPodStatus,
    WarmPool, SANDBOX_FINALIZER,
};
use crate::error::ReconcileError;
use crate::exec::{self, ExecChannel};
use crate::queue::ResourceKey;
use crate::recycle::{self, RecycleDecision, RecycleInput};
use crate::resources::{self, FIELD_MANAGER};
use crate::validation;

use super::Context;

pub async fn reconcile(sandbox: Arc<Sandbox>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = sandbox.namespace().unwrap_or_else(|| "default".to_string());
    let name = sandbox.name_any();
    let api: Api<Sandbox> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = reconcile_inner(&sandbox, &api, &ctx, &namespace, &name).await;
    if result.is_ok() {
        ctx.dispatcher.record_success(&ResourceKey::new("Sandbox", namespace, name));
    }
    result
}

async fn reconcile_inner(
    sandbox: &Sandbox,
    api: &Api<Sandbox>,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    if sandbox.meta().deletion_timestamp.is_some() {
        return handle_deletion(sandbox, api, ctx).await;
    }

    if !has_finalizer(sandbox) {
        add_finalizer(api, name).await?;
        return Ok(Action::requeue(Duration::from_secs(0)));
    }

    if let Err(failure) = validation::validate_sandbox_spec(&sandbox.spec) {
        return fail(api, name, &failure.reason.to_string(), &failure.message).await;
    }

    let phase = sandbox.status.as_ref().map(|s| s.phase.clone()).unwrap_or_default();

    match phase {
        SandboxPhase::Pending => start_creating(sandbox, api, ctx, namespace, name).await,
        SandboxPhase::Creating => check_pod_running(sandbox, api, ctx, namespace, name).await,
        SandboxPhase::Running => Ok(Action::requeue(Duration::from_secs(30))),
        SandboxPhase::Terminating | SandboxPhase::Terminated | SandboxPhase::Failed => {
            Ok(Action::await_change())
        }
    }
}

/// Runs the §4.8 admission checks (RuntimeEnvironment exists and is
/// vetted; SandboxProfile, if any, passed its own validation) before any
/// pod work starts. Both checks need cluster state the pure
/// `validate_sandbox_spec` pass doesn't have.
async fn validate_before_creating(sandbox: &Sandbox, ctx: &Context, namespace: &str) -> Result<Option<validation::ValidationFailure>, ReconcileError> {
    let runtime_label = crate::crd::common::normalize_runtime_label(&sandbox.spec.runtime);
    let env_api: Api<RuntimeEnvironment> = Api::all(ctx.client.clone());
    let env = env_api.get_opt(&runtime_label).await?;
    if let Err(failure) = validation::validate_runtime(&sandbox.spec.runtime, env.as_ref()) {
        return Ok(Some(failure));
    }

    if let Some(profile_name) = &sandbox.spec.profile_ref {
        let profile_api: Api<SandboxProfile> = Api::namespaced(ctx.client.clone(), namespace);
        let profile = profile_api.get_opt(profile_name).await?;
        if let Err(failure) = validation::validate_profile(profile.as_ref()) {
            return Ok(Some(failure));
        }
    }

    Ok(None)
}

async fn start_creating(
    sandbox: &Sandbox,
    api: &Api<Sandbox>,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    if let Some(failure) = validate_before_creating(sandbox, ctx, namespace).await? {
        return fail(api, name, failure.reason, &failure.message).await;
    }

    let runtime_label = crate::crd::common::normalize_runtime_label(&sandbox.spec.runtime);
    let warm_pod = find_allocatable_warm_pod(ctx, namespace, &runtime_label).await?;

    let (pod_name, pod_namespace, warm_pod_ref) = if let Some(candidate) = warm_pod {
        let sandbox_ref = ObjectRef { name: name.to_string(), namespace: Some(namespace.to_string()), uid: sandbox.uid() };
        match allocator::try_assign(ctx.client.clone(), namespace, &candidate, sandbox_ref).await {
            Ok(assigned) => (
                assigned.status.as_ref().and_then(|s| s.pod_name.clone()).unwrap_or_else(|| candidate.name_any()),
                namespace.to_string(),
                Some(ObjectRef { name: candidate.name_any(), namespace: Some(namespace.to_string()), uid: candidate.uid() }),
            ),
            Err(ReconcileError::Conflict(_)) => {
                return Ok(Action::requeue(Duration::from_millis(100)));
            }
            Err(err) => return Err(err),
        }
    } else {
        let target_namespace = build_fresh_pod(sandbox, ctx, namespace, name).await?;
        (sandbox_base_name(name), target_namespace, None)
    };

    patch_status(api, name, |status| {
        status.phase = SandboxPhase::Creating;
        status.pod_name = Some(pod_name.clone());
        status.pod_namespace = Some(pod_namespace.clone());
        status.warm_pod_ref = warm_pod_ref.clone();
        set_condition(
            &mut status.conditions,
            Condition::new("Scheduled", ConditionStatus::True, "PodScheduled", "sandbox pod scheduled"),
        );
    })
    .await?;

    Ok(Action::requeue(Duration::from_secs(2)))
}

/// The name every child object of a from-scratch sandbox shares, modulo a
/// per-kind suffix (network policies) — `sandbox-<name>`, matching the
/// pod's own name so the Service sharing it produces the expected
/// `sandbox-<name>.<namespace>.svc.cluster.local` endpoint.
fn sandbox_base_name(name: &str) -> String {
    format!("sandbox-{name}")
}

async fn find_allocatable_warm_pod(ctx: &Context, namespace: &str, runtime_label: &str) -> Result<Option<WarmPod>, ReconcileError> {
    let api: Api<WarmPod> = Api::namespaced(ctx.client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{}={}", crate::crd::warm_pool::WARM_POOL_RUNTIME_LABEL, runtime_label));
    let list = api.list(&params).await?;
    Ok(allocator::pick_candidate(&list.items).cloned())
}

/// Idempotently ensures every child object of a from-scratch sandbox, in
/// the fixed order from §4.2: namespace (if namespace-isolation mode),
/// service account, pod, service, network policies, PVC. Returns the
/// namespace the pod actually landed in.
async fn build_fresh_pod(sandbox: &Sandbox, ctx: &Context, namespace: &str, name: &str) -> Result<String, ReconcileError> {
    let base_name = sandbox_base_name(name);
    let owner = Some(owner_reference(sandbox));

    let target_namespace = if sandbox.spec.namespace_isolation {
        let isolated_namespace = base_name.clone();
        let ns = resources::namespace::build_namespace(&isolated_namespace);
        resources::namespace::ensure(ctx.client.clone(), &ns).await?;
        isolated_namespace
    } else {
        namespace.to_string()
    };

    let sa = resources::service_account::build_service_account(&base_name, &target_namespace);
    resources::service_account::ensure(ctx.client.clone(), &target_namespace, &sa).await?;

    let labels = resources::managed_labels(name);
    let pod = resources::pod::build_pod(
        &base_name,
        &target_namespace,
        &sandbox.spec.runtime,
        &sandbox.spec.resources,
        &sandbox.spec.filesystem,
        &sandbox.spec.security_context,
        &sandbox.spec.security_level,
        &sandbox.spec.storage,
        sandbox.spec.timeout as i64,
        Some(&base_name),
        labels.clone(),
        owner.clone(),
    );
    resources::pod::ensure(ctx.client.clone(), &target_namespace, &pod).await?;

    let mut selector = std::collections::BTreeMap::new();
    selector.insert(crate::crd::sandbox::SANDBOX_ID_LABEL.to_string(), name.to_string());

    let service = resources::service::build_service(&base_name, &target_namespace, selector.clone(), owner.clone());
    resources::service::ensure(ctx.client.clone(), &target_namespace, &service).await?;

    resources::network_policy::ensure_all(ctx.client.clone(), &target_namespace, &base_name, selector, &sandbox.spec.network_access, owner.clone()).await?;

    if let Some(pvc) = resources::volume::build_pvc(&base_name, &target_namespace, &sandbox.spec.storage, labels, owner) {
        resources::volume::ensure(ctx.client.clone(), &target_namespace, &pvc).await?;
    }

    Ok(target_namespace)
}

async fn check_pod_running(
    sandbox: &Sandbox,
    api: &Api<Sandbox>,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    let Some(pod_name) = sandbox.status.as_ref().and_then(|s| s.pod_name.clone()) else {
        return fail(api, name, "MissingPodRef", "sandbox entered Creating without a pod reference").await;
    };
    let pod_namespace = sandbox.status.as_ref().and_then(|s| s.pod_namespace.clone()).unwrap_or_else(|| namespace.to_string());

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &pod_namespace);
    let pod = match pods.get_opt(&pod_name).await? {
        Some(pod) => pod,
        None => return fail(api, name, "PodMissing", "sandbox pod disappeared while creating").await,
    };

    let running = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(|phase| phase == "Running")
        .unwrap_or(false);

    if !running {
        return Ok(Action::requeue(Duration::from_secs(2)));
    }

    let endpoint = resources::service::endpoint_dns_name(&pod_name, &pod_namespace);
    patch_status(api, name, |status| {
        status.phase = SandboxPhase::Running;
        status.endpoint = Some(endpoint.clone());
        status.start_time = Some(crate::crd::common::utc_now_rfc3339());
        set_condition(&mut status.conditions, Condition::new("Ready", ConditionStatus::True, "PodRunning", "sandbox pod is running"));
    })
    .await?;

    info!(sandbox = name, "sandbox is running");
    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn handle_deletion(sandbox: &Sandbox, api: &Api<Sandbox>, ctx: &Context) -> Result<Action, ReconcileError> {
    let namespace = sandbox.namespace().unwrap_or_else(|| "default".to_string());
    let name = sandbox.name_any();

    if !has_finalizer(sandbox) {
        return Ok(Action::await_change());
    }

    if let Some(warm_pod_ref) = sandbox.status.as_ref().and_then(|s| s.warm_pod_ref.clone()) {
        release_warm_pod(sandbox, &warm_pod_ref, ctx).await?;
    } else if let Some(pod_name) = sandbox.status.as_ref().and_then(|s| s.pod_name.clone()) {
        let pod_namespace = sandbox.status.as_ref().and_then(|s| s.pod_namespace.clone()).unwrap_or_else(|| namespace.clone());
        let base_name = pod_name.clone();

        resources::pod::delete(ctx.client.clone(), &pod_namespace, &pod_name).await?;
        resources::service::delete(ctx.client.clone(), &pod_namespace, &base_name).await?;
        resources::service_account::delete(ctx.client.clone(), &pod_namespace, &base_name).await?;
        resources::network_policy::delete_all(ctx.client.clone(), &pod_namespace, &base_name).await?;
        resources::volume::delete(ctx.client.clone(), &pod_namespace, &base_name).await?;

        if sandbox.spec.namespace_isolation {
            resources::namespace::delete(ctx.client.clone(), &pod_namespace).await?;
        }
    }

    remove_finalizer(api, &name).await?;
    warn!(sandbox = name, "sandbox cleanup complete");
    Ok(Action::await_change())
}

/// Runs the Recycle Engine (§4.6) against a Sandbox's warm-pod-backed pod on
/// release, routing it back to `Ready` or destroying it outright depending
/// on `recycle::decide`'s verdict.
async fn release_warm_pod(sandbox: &Sandbox, warm_pod_ref: &ObjectRef, ctx: &Context) -> Result<(), ReconcileError> {
    let namespace = warm_pod_ref.namespace.clone().unwrap_or_else(|| "default".to_string());
    let warm_pod_api: Api<WarmPod> = Api::namespaced(ctx.client.clone(), &namespace);

    let Some(warm_pod) = warm_pod_api.get_opt(&warm_pod_ref.name).await? else {
        return Ok(());
    };

    let pool_api: Api<WarmPool> = Api::namespaced(ctx.client.clone(), &namespace);
    let pool = pool_api.get_opt(&warm_pod.spec.pool_ref.name).await?;

    // Gate 1 of §4.6: if the pool is gone, there is nothing to replenish
    // and no policy to trust — destroy rather than silently defaulting to
    // an enabled policy the pool never actually configured.
    let Some(pool) = pool else {
        warn!(warm_pod = warm_pod_ref.name.as_str(), "backing pool no longer exists, destroying instead of recycling");
        return destroy_warm_pod(&warm_pod_api, warm_pod_ref, &warm_pod, &namespace, ctx).await;
    };

    let policy = pool.spec.recycling.clone();
    let security_event = sandbox.annotations().get(SECURITY_EVENT_ANNOTATION).map(String::as_str);
    let pod_name = warm_pod.status.as_ref().and_then(|s| s.pod_name.clone());

    let channel = pod_name.as_ref().map(|_| ExecChannel::new(ctx.client.clone(), &namespace));

    let (cleanup_exit, verification_exit) = match (&pod_name, &channel) {
        (Some(pod_name), Some(channel)) => (
            run_probe(channel, pod_name, policy.cleanup_script.as_deref()).await,
            run_probe(channel, pod_name, policy.verification_script.as_deref()).await,
        ),
        _ => (None, None),
    };

    let input = RecycleInput {
        pod: &warm_pod,
        policy: &policy,
        pool_available_pods: tally_available(&ctx.client, &namespace, &warm_pod.spec.pool_ref.name).await?,
        pool_min_size: pool.spec.min_size,
        cleanup_script_exit_code: cleanup_exit,
        verification_script_exit_code: verification_exit,
        security_event,
        untrusted_packages_detected: false,
        modified_protected_paths: false,
        resource_usage_exceeded: false,
        active_process_probe: None,
        now: k8s_openapi::chrono::Utc::now(),
    };

    match recycle::decide(&input) {
        RecycleDecision::Recycle => {
            if let (Some(pod_name), Some(channel)) = (&pod_name, &channel) {
                exec::run_preload_scripts(channel, pod_name, &pool.spec.preload_packages, &pool.spec.preload_scripts).await;
            }

            let current = warm_pod_api.get_status(&warm_pod_ref.name).await?;
            let mut status = current.status.unwrap_or_default();
            recycle::apply_recycle(&mut status);
            let patch = json!({ "status": status });
            warm_pod_api
                .patch_status(&warm_pod_ref.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
                .await?;
        }
        RecycleDecision::Destroy(reason) => {
            warn!(warm_pod = warm_pod_ref.name.as_str(), reason, "destroying warm pod instead of recycling");
            destroy_warm_pod(&warm_pod_api, warm_pod_ref, &warm_pod, &namespace, ctx).await?;
        }
    }

    Ok(())
}

async fn destroy_warm_pod(
    warm_pod_api: &Api<WarmPod>,
    warm_pod_ref: &ObjectRef,
    warm_pod: &WarmPod,
    namespace: &str,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    if let Some(pod_name) = warm_pod.status.as_ref().and_then(|s| s.pod_name.clone()) {
        resources::pod::delete(ctx.client.clone(), namespace, &pod_name).await?;
    }
    let _ = warm_pod_api.delete(&warm_pod_ref.name, &DeleteParams::default()).await;
    Ok(())
}

/// Gate 1's "pool needs replenishment" half needs the pool's current
/// available-pod count; re-lists rather than trusting a possibly-stale
/// `WarmPoolStatus` since recycling decisions must see the freshest count.
async fn tally_available(client: &kube::Client, namespace: &str, pool_name: &str) -> Result<u32, ReconcileError> {
    let pods_api: Api<WarmPod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{}={}", crate::crd::warm_pod::WARM_POD_POOL_LABEL, pool_name));
    let pods = pods_api.list(&params).await?;
    Ok(pods.items.iter().filter(|p| p.status.as_ref().map(WarmPodStatus::is_available).unwrap_or(false)).count() as u32)
}

async fn run_probe(channel: &ExecChannel, pod_name: &str, script: Option<&str>) -> Option<i32> {
    let script = script?;
    channel.run(pod_name, exec::cleanup_command(script)).await.ok().and_then(|out| out.exit_code)
}

fn owner_reference(sandbox: &Sandbox) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        api_version: "llmsafespace.dev/v1".to_string(),
        kind: "Sandbox".to_string(),
        name: sandbox.name_any(),
        uid: sandbox.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn has_finalizer(sandbox: &Sandbox) -> bool {
    sandbox.meta().finalizers.as_ref().map(|f| f.iter().any(|finalizer| finalizer == SANDBOX_FINALIZER)).unwrap_or(false)
}

async fn add_finalizer(api: &Api<Sandbox>, name: &str) -> Result<(), ReconcileError> {
    let patch = json!({ "metadata": { "finalizers": [SANDBOX_FINALIZER] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<Sandbox>, name: &str) -> Result<(), ReconcileError> {
    let current = api.get(name).await?;
    let remaining: Vec<String> = current.meta().finalizers.clone().unwrap_or_default().into_iter().filter(|f| f != SANDBOX_FINALIZER).collect();
    let patch = json!({ "metadata": { "finalizers": remaining } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn fail(api: &Api<Sandbox>, name: &str, reason: &str, message: &str) -> Result<Action, ReconcileError> {
    let reason = reason.to_string();
    let message = message.to_string();
    patch_status(api, name, move |status| {
        status.phase = SandboxPhase::Failed;
        set_condition(&mut status.conditions, Condition::new("Ready", ConditionStatus::False, &reason, message.clone()));
    })
    .await?;
    Ok(Action::await_change())
}

async fn patch_status(api: &Api<Sandbox>, name: &str, mutate: impl FnOnce(&mut SandboxStatus)) -> Result<Sandbox, ReconcileError> {
    let current = api.get_status(name).await?;
    let mut status = current.status.clone().unwrap_or_default();
    mutate(&mut status);
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch)).await.map_err(ReconcileError::from)
}

pub fn error_policy(sandbox: Arc<Sandbox>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let namespace = sandbox.namespace().unwrap_or_else(|| "default".to_string());
    let key = ResourceKey::new("Sandbox", namespace, sandbox.name_any());
    match ctx.dispatcher.record_failure(&key, err) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_finalizer_detects_presence() {
        let mut sandbox = Sandbox::new("sbx-1", Default::default());
        assert!(!has_finalizer(&sandbox));
        sandbox.meta_mut().finalizers = Some(vec![SANDBOX_FINALIZER.to_string()]);
        assert!(has_finalizer(&sandbox));
    }

    #[test]
    fn test_sandbox_base_name_format() {
        assert_eq!(sandbox_base_name("demo-1"), "sandbox-demo-1");
    }
}
