mod common;

use common::{make_runtime_environment, make_sandbox, make_warm_pod, make_warm_pool};
use kube::Resource;
use sandbox_controller::allocator;
use sandbox_controller::crd::{AutoScalingConfig, RecyclingPolicy, WarmPodPhase};
use sandbox_controller::crd::common::parse_rfc3339;
use sandbox_controller::recycle::{self, RecycleDecision, RecycleInput};
use sandbox_controller::reconcile::warm_pool::decide_scale;
use sandbox_controller::validation;

// ══════════════════════════════════════════════════════════════════
// End-to-end scenario tests (no cluster required): these exercise the
// pure decision logic behind each reconciler the way a live cluster
// would drive it, one state transition at a time.
// ══════════════════════════════════════════════════════════════════

#[test]
fn scenario_cold_sandbox_fails_validation_before_any_pod_work() {
    let sandbox = make_sandbox("cold", "python:3.10", 0);
    let failure = validation::validate_sandbox_spec(&sandbox.spec).unwrap_err();
    assert_eq!(failure.reason, "InvalidTimeout");
}

#[test]
fn scenario_warm_allocated_sandbox_picks_oldest_ready_pod() {
    let pods = vec![
        make_warm_pod("wp-new", "py-pool", WarmPodPhase::Ready, "2026-08-01T11:00:00Z"),
        make_warm_pod("wp-old", "py-pool", WarmPodPhase::Ready, "2026-08-01T09:00:00Z"),
        make_warm_pod("wp-assigned", "py-pool", WarmPodPhase::Assigned, "2026-08-01T08:00:00Z"),
    ];

    let candidate = allocator::pick_candidate(&pods).expect("a ready pod should be selectable");
    assert_eq!(candidate.meta().name.as_deref(), Some("wp-old"));
}

#[test]
fn scenario_safe_recycle_returns_pod_to_pool() {
    let mut pod = make_warm_pod("wp-1", "py-pool", WarmPodPhase::Assigned, "2026-08-01T08:00:00Z");
    let policy = RecyclingPolicy::default();

    let input = RecycleInput {
        pod: &pod,
        policy: &policy,
        pool_available_pods: 0,
        pool_min_size: 2,
        cleanup_script_exit_code: Some(0),
        verification_script_exit_code: Some(0),
        security_event: None,
        untrusted_packages_detected: false,
        modified_protected_paths: false,
        resource_usage_exceeded: false,
        active_process_probe: Some(false),
        now: parse_rfc3339("2026-08-01T12:00:00Z").unwrap(),
    };

    assert_eq!(recycle::decide(&input), RecycleDecision::Recycle);

    let mut status = pod.status.take().unwrap();
    recycle::apply_recycle(&mut status);
    assert_eq!(status.phase, WarmPodPhase::Ready);
    assert!(status.assigned_to.is_none());
    assert_eq!(status.recycle_count, 1);
}

#[test]
fn scenario_unsafe_recycle_destroys_pod_on_security_event() {
    let pod = make_warm_pod("wp-2", "py-pool", WarmPodPhase::Assigned, "2026-08-01T08:00:00Z");
    let policy = RecyclingPolicy::default();

    let input = RecycleInput {
        pod: &pod,
        policy: &policy,
        pool_available_pods: 0,
        pool_min_size: 2,
        cleanup_script_exit_code: Some(0),
        verification_script_exit_code: Some(0),
        security_event: Some("seccomp-violation"),
        untrusted_packages_detected: false,
        modified_protected_paths: false,
        resource_usage_exceeded: false,
        active_process_probe: Some(false),
        now: parse_rfc3339("2026-08-01T12:00:00Z").unwrap(),
    };

    assert_eq!(
        recycle::decide(&input),
        RecycleDecision::Destroy("sandbox reported a security event")
    );
}

#[test]
fn scenario_egress_policy_requires_known_runtime() {
    let env = make_runtime_environment("python:3.10", true);
    assert!(validation::validate_runtime("python:3.10", Some(&env)).is_ok());

    let missing = validation::validate_runtime("rust:1.75", None);
    assert_eq!(missing.unwrap_err().reason, "RuntimeNotFound");
}

#[test]
fn scenario_scale_up_under_load_when_pool_below_minimum() {
    use sandbox_controller::crd::WarmPoolStatus;

    let status = WarmPoolStatus { available_pods: 1, assigned_pods: 4, pending_pods: 0, ..Default::default() };
    let decision = decide_scale(&status, 5, 10, &AutoScalingConfig::default(), parse_rfc3339("2026-08-01T12:00:00Z").unwrap());
    assert!(matches!(decision, sandbox_controller::reconcile::warm_pool::ScaleDecision::ScaleUp(_)));
}

#[test]
fn scenario_pool_holds_steady_within_bounds() {
    use sandbox_controller::crd::WarmPoolStatus;

    let pool = make_warm_pool("py-pool", "python:3.10", 2, 10);
    assert_eq!(pool.spec.min_size, 2);

    let status = WarmPoolStatus { available_pods: 3, assigned_pods: 2, pending_pods: 0, ..Default::default() };
    let decision = decide_scale(&status, pool.spec.min_size, pool.spec.max_size, &AutoScalingConfig::default(), parse_rfc3339("2026-08-01T12:00:00Z").unwrap());
    assert_eq!(decision, sandbox_controller::reconcile::warm_pool::ScaleDecision::Hold);
}
