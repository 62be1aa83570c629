//! WarmPool Reconciler (§4.3): keeps a pool's pod count between
//! `minSize` and `maxSize`, reaping idle pods past `ttl` and respecting
//! the scale-down floor (never scale below `minSize` even under low
//! utilization).

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::chrono::{DateTime, Utc};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::crd::common::{parse_rfc3339, set_condition, Condition, ConditionStatus};
use crate::crd::warm_pod::WARM_POD_POOL_LABEL;
use crate::crd::warm_pool::WARM_POOL_RUNTIME_LABEL;
use crate::crd::{AutoScalingConfig, WarmPod, WarmPodPhase, WarmPodSpec, WarmPodStatus, WarmPool, WarmPoolStatus, WARM_POOL_FINALIZER};
use crate::error::ReconcileError;
use crate::metrics;
use crate::resources::FIELD_MANAGER;

use super::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp(u32),
    ScaleDown(u32),
    Hold,
}

/// Pure scale decision. The `[minSize, maxSize]` floor/ceiling always
/// applies regardless of `autoScaling.enabled`. On top of that, when
/// autoscaling is on, scale-up is driven by `targetUtilization` and
/// scale-down additionally waits out `scaleDownDelay` since the last
/// scaling action (`status.lastScaleTime`) so the pool doesn't thrash.
/// TTL-based idle reaping is a separate, unconditional pass
/// (`reap_idle_pods`) that targets individual pods past their own age,
/// not a bulk count.
pub fn decide_scale(status: &WarmPoolStatus, min_size: u32, max_size: u32, auto_scaling: &AutoScalingConfig, now: DateTime<Utc>) -> ScaleDecision {
    let total = status.available_pods + status.assigned_pods + status.pending_pods;

    if total < min_size {
        return ScaleDecision::ScaleUp(min_size - total);
    }

    if !auto_scaling.enabled {
        if max_size > 0 && total > max_size {
            return ScaleDecision::ScaleDown(total - max_size);
        }
        return ScaleDecision::Hold;
    }

    let utilization_pct = (status.utilization() * 100.0).round() as u32;

    if utilization_pct >= auto_scaling.target_utilization && (max_size == 0 || total < max_size) {
        return ScaleDecision::ScaleUp(1);
    }

    if utilization_pct < auto_scaling.target_utilization && status.available_pods > 0 && total > min_size {
        let cooled_down = status
            .last_scale_time
            .as_deref()
            .and_then(parse_rfc3339)
            .map(|last| (now - last).num_seconds().max(0) as u64 >= auto_scaling.scale_down_delay)
            .unwrap_or(true);
        if cooled_down {
            return ScaleDecision::ScaleDown(1);
        }
    }

    ScaleDecision::Hold
}

pub async fn reconcile(pool: Arc<WarmPool>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = pool.namespace().unwrap_or_else(|| "default".to_string());
    let name = pool.name_any();
    let api: Api<WarmPool> = Api::namespaced(ctx.client.clone(), &namespace);

    if pool.meta().deletion_timestamp.is_some() {
        return handle_deletion(&pool, &api, &ctx).await;
    }

    if !has_finalizer(&pool) {
        add_finalizer(&api, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(0)));
    }

    let pods_api: Api<WarmPod> = Api::namespaced(ctx.client.clone(), &namespace);
    let params = ListParams::default().labels(&format!("{WARM_POD_POOL_LABEL}={name}"));
    let pods = pods_api.list(&params).await?;

    let status = tally(&pods.items);
    metrics::WARM_POOL_AVAILABLE_PODS.with_label_values(&[&name]).set(status.available_pods as i64);
    metrics::WARM_POOL_ASSIGNED_PODS.with_label_values(&[&name]).set(status.assigned_pods as i64);

    let now = Utc::now();
    let decision = decide_scale(&status, pool.spec.min_size, pool.spec.max_size, &pool.spec.auto_scaling, now);
    let scaled = !matches!(decision, ScaleDecision::Hold);
    match decision {
        ScaleDecision::ScaleUp(count) => {
            for _ in 0..count {
                create_warm_pod(&pods_api, &pool, &name).await?;
            }
            info!(pool = name, count, "scaled warm pool up");
        }
        ScaleDecision::ScaleDown(excess) => {
            delete_excess_pods(&pods_api, excess, &pods.items).await?;
        }
        ScaleDecision::Hold => {}
    }
    reap_idle_pods(&pods_api, &pool.spec.ttl, &pods.items).await?;

    patch_status(&api, &name, |s| {
        let last_scale_time = s.last_scale_time.clone();
        *s = status.clone();
        s.last_scale_time = if scaled { Some(crate::crd::common::utc_now_rfc3339()) } else { last_scale_time };
        set_condition(&mut s.conditions, Condition::new("Ready", ConditionStatus::True, "PoolReconciled", "pool accounting up to date"));
    })
    .await?;

    ctx.dispatcher.record_success(&crate::queue::ResourceKey::new("WarmPool", namespace, name));
    Ok(Action::requeue(Duration::from_secs(15)))
}

fn tally(pods: &[WarmPod]) -> WarmPoolStatus {
    let mut status = WarmPoolStatus::default();
    for pod in pods {
        match pod.status.as_ref().map(|s| s.phase.clone()).unwrap_or_default() {
            WarmPodPhase::Ready => status.available_pods += 1,
            WarmPodPhase::Assigned => status.assigned_pods += 1,
            WarmPodPhase::Pending | WarmPodPhase::Terminating => status.pending_pods += 1,
        }
    }
    status
}

async fn create_warm_pod(api: &Api<WarmPod>, pool: &WarmPool, pool_name: &str) -> Result<(), ReconcileError> {
    let name = format!("{pool_name}-{}", short_suffix());
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(WARM_POD_POOL_LABEL.to_string(), pool_name.to_string());
    labels.insert(WARM_POOL_RUNTIME_LABEL.to_string(), crate::crd::common::normalize_runtime_label(&pool.spec.runtime));

    let mut warm_pod = WarmPod::new(
        &name,
        WarmPodSpec {
            pool_ref: crate::crd::common::ObjectRef { name: pool_name.to_string(), namespace: pool.namespace(), uid: pool.uid() },
            creation_timestamp: Some(crate::crd::common::utc_now_rfc3339()),
            ..Default::default()
        },
    );
    warm_pod.meta_mut().labels = Some(labels);
    api.create(&kube::api::PostParams::default(), &warm_pod).await?;
    Ok(())
}

fn short_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect::<String>().to_lowercase()
}

/// Deletes the oldest `excess` available pods over `maxSize`. Never
/// touches assigned pods — those are in use and scale down on their own
/// once released, either via recycle or natural sandbox termination.
async fn delete_excess_pods(api: &Api<WarmPod>, excess: u32, pods: &[WarmPod]) -> Result<(), ReconcileError> {
    let mut available: Vec<&WarmPod> = pods.iter().filter(|p| p.status.as_ref().map(WarmPodStatus::is_available).unwrap_or(false)).collect();
    available.sort_by_key(|p| p.spec.creation_timestamp.clone());
    for pod in available.into_iter().take(excess as usize) {
        api.delete(&pod.name_any(), &Default::default()).await?;
    }
    Ok(())
}

/// Ages pods off their last heartbeat rather than creation time — a pod
/// that's been alive for days but heartbeating normally isn't idle, while
/// one that stopped heartbeating shortly after creation is. Pods that
/// haven't heartbeated even once yet fall back to their creation time.
async fn reap_idle_pods(api: &Api<WarmPod>, ttl: &u64, pods: &[WarmPod]) -> Result<(), ReconcileError> {
    if *ttl == 0 {
        return Ok(());
    }
    let now = Utc::now();
    for pod in pods {
        let Some(status) = &pod.status else { continue };
        if status.phase != WarmPodPhase::Ready {
            continue;
        }
        let reference = pod.spec.last_heartbeat.as_deref().or(pod.spec.creation_timestamp.as_deref());
        let Some(idle_since) = reference.and_then(parse_rfc3339) else { continue };
        let idle_for = (now - idle_since).num_seconds().max(0) as u64;
        if idle_for >= *ttl {
            api.delete(&pod.name_any(), &Default::default()).await?;
        }
    }
    Ok(())
}

async fn handle_deletion(pool: &WarmPool, api: &Api<WarmPool>, ctx: &Context) -> Result<Action, ReconcileError> {
    let namespace = pool.namespace().unwrap_or_else(|| "default".to_string());
    let name = pool.name_any();

    if !has_finalizer(pool) {
        return Ok(Action::await_change());
    }

    let pods_api: Api<WarmPod> = Api::namespaced(ctx.client.clone(), &namespace);
    let params = ListParams::default().labels(&format!("{WARM_POD_POOL_LABEL}={name}"));
    let pods = pods_api.list(&params).await?;
    for pod in pods.items {
        pods_api.delete(&pod.name_any(), &Default::default()).await?;
    }

    remove_finalizer(api, &name).await?;
    Ok(Action::await_change())
}

fn has_finalizer(pool: &WarmPool) -> bool {
    pool.meta().finalizers.as_ref().map(|f| f.iter().any(|finalizer| finalizer == WARM_POOL_FINALIZER)).unwrap_or(false)
}

async fn add_finalizer(api: &Api<WarmPool>, name: &str) -> Result<(), ReconcileError> {
    let patch = json!({ "metadata": { "finalizers": [WARM_POOL_FINALIZER] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<WarmPool>, name: &str) -> Result<(), ReconcileError> {
    let current = api.get(name).await?;
    let remaining: Vec<String> = current.meta().finalizers.clone().unwrap_or_default().into_iter().filter(|f| f != WARM_POOL_FINALIZER).collect();
    let patch = json!({ "metadata": { "finalizers": remaining } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn patch_status(api: &Api<WarmPool>, name: &str, mutate: impl FnOnce(&mut WarmPoolStatus)) -> Result<WarmPool, ReconcileError> {
    let current = api.get_status(name).await?;
    let mut status = current.status.clone().unwrap_or_default();
    mutate(&mut status);
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch)).await.map_err(ReconcileError::from)
}

pub fn error_policy(pool: Arc<WarmPool>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let namespace = pool.namespace().unwrap_or_else(|| "default".to_string());
    let key = crate::queue::ResourceKey::new("WarmPool", namespace, pool.name_any());
    match ctx.dispatcher.record_failure(&key, err) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        parse_rfc3339("2026-08-01T12:00:00Z").unwrap()
    }

    #[test]
    fn test_decide_scale_up_when_below_min() {
        let status = WarmPoolStatus { available_pods: 1, assigned_pods: 0, pending_pods: 0, ..Default::default() };
        assert_eq!(decide_scale(&status, 3, 0, &AutoScalingConfig::default(), fixed_now()), ScaleDecision::ScaleUp(2));
    }

    #[test]
    fn test_decide_scale_down_when_above_max_and_autoscaling_disabled() {
        let status = WarmPoolStatus { available_pods: 8, assigned_pods: 0, pending_pods: 0, ..Default::default() };
        assert_eq!(decide_scale(&status, 2, 5, &AutoScalingConfig::default(), fixed_now()), ScaleDecision::ScaleDown(3));
    }

    #[test]
    fn test_decide_hold_within_bounds() {
        let status = WarmPoolStatus { available_pods: 1, assigned_pods: 2, pending_pods: 0, ..Default::default() };
        assert_eq!(decide_scale(&status, 2, 5, &AutoScalingConfig::default(), fixed_now()), ScaleDecision::Hold);
    }

    #[test]
    fn test_decide_scale_up_when_utilization_exceeds_target() {
        let status = WarmPoolStatus { available_pods: 1, assigned_pods: 9, pending_pods: 0, ..Default::default() };
        let auto_scaling = AutoScalingConfig { enabled: true, target_utilization: 80, scale_down_delay: 300 };
        assert_eq!(decide_scale(&status, 2, 20, &auto_scaling, fixed_now()), ScaleDecision::ScaleUp(1));
    }

    #[test]
    fn test_decide_no_scale_up_past_max_even_with_high_utilization() {
        let status = WarmPoolStatus { available_pods: 0, assigned_pods: 10, pending_pods: 0, ..Default::default() };
        let auto_scaling = AutoScalingConfig { enabled: true, target_utilization: 80, scale_down_delay: 300 };
        assert_eq!(decide_scale(&status, 2, 10, &auto_scaling, fixed_now()), ScaleDecision::Hold);
    }

    #[test]
    fn test_decide_scale_down_blocked_until_delay_elapses() {
        let status = WarmPoolStatus {
            available_pods: 5,
            assigned_pods: 0,
            pending_pods: 0,
            last_scale_time: Some("2026-08-01T11:58:00Z".to_string()),
            ..Default::default()
        };
        let auto_scaling = AutoScalingConfig { enabled: true, target_utilization: 80, scale_down_delay: 300 };
        assert_eq!(decide_scale(&status, 2, 20, &auto_scaling, fixed_now()), ScaleDecision::Hold);
    }

    #[test]
    fn test_decide_scale_down_once_delay_elapses() {
        let status = WarmPoolStatus {
            available_pods: 5,
            assigned_pods: 0,
            pending_pods: 0,
            last_scale_time: Some("2026-08-01T11:00:00Z".to_string()),
            ..Default::default()
        };
        let auto_scaling = AutoScalingConfig { enabled: true, target_utilization: 80, scale_down_delay: 300 };
        assert_eq!(decide_scale(&status, 2, 20, &auto_scaling, fixed_now()), ScaleDecision::ScaleDown(1));
    }

    #[test]
    fn test_tally_counts_by_phase() {
        let mut ready = WarmPod::new("a", Default::default());
        ready.status = Some(crate::crd::WarmPodStatus { phase: WarmPodPhase::Ready, ..Default::default() });
        let mut assigned = WarmPod::new("b", Default::default());
        assigned.status = Some(crate::crd::WarmPodStatus { phase: WarmPodPhase::Assigned, ..Default::default() });
        let status = tally(&[ready, assigned]);
        assert_eq!(status.available_pods, 1);
        assert_eq!(status.assigned_pods, 1);
    }
}
