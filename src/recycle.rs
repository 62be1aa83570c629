//! Recycle Engine (§4.6): decides whether a just-released WarmPod can be
//! returned to its pool (cheap) or must be destroyed (safe). The gate
//! cascade is evaluated in order and stops at the first "no" — any single
//! failing gate routes to destroy, matching the teacher's violation
//! detectors short-circuiting on the first disqualifying condition.

use k8s_openapi::chrono::{DateTime, Utc};

use crate::crd::common::parse_rfc3339;
use crate::crd::{RecyclingPolicy, WarmPod, WarmPodStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleDecision {
    Recycle,
    Destroy(&'static str),
}

pub struct RecycleInput<'a> {
    pub pod: &'a WarmPod,
    pub policy: &'a RecyclingPolicy,

    /// Gate 1's "pool needs replenishment" half: current and configured
    /// minimum available-pod counts for the pool this pod belongs to.
    pub pool_available_pods: u32,
    pub pool_min_size: u32,

    pub cleanup_script_exit_code: Option<i32>,
    pub verification_script_exit_code: Option<i32>,

    /// Mirrors the `llmsafespace.dev/security-event` annotation the
    /// released Sandbox carried, if any — read straight off the Sandbox
    /// rather than round-tripped through the API service (Design Notes
    /// "Security events propagation").
    pub security_event: Option<&'a str>,

    /// Gate 6: the sandbox installed packages outside its profile's
    /// allowlist during its run.
    pub untrusted_packages_detected: bool,

    /// Gate 7: the sandbox wrote to a path under recycle protection
    /// (e.g. interpreter site-packages). Always `false` for now — see
    /// the Open Question resolution in DESIGN.md.
    pub modified_protected_paths: bool,

    /// Gate 8: the sandbox's historical resource usage (CPU/memory high
    /// water mark across its lifetime) crossed the pool's tolerance.
    pub resource_usage_exceeded: bool,

    /// Gate 9: whether a live probe found a foreign process, open
    /// connection, held lock, or other leak pattern still present.
    /// `None` when the probe couldn't run at all (pod unreachable);
    /// `policy.fail_closed` decides whether that counts against the pod.
    pub active_process_probe: Option<bool>,

    pub now: DateTime<Utc>,
}

/// Runs the full eligibility cascade. Each gate is a named check; the
/// first failing gate wins.
pub fn decide(input: &RecycleInput) -> RecycleDecision {
    // Gate 1: recycling enabled and the pool still wants this pod back.
    if !input.policy.enabled {
        return RecycleDecision::Destroy("recycling disabled on pool");
    }
    if input.pool_available_pods >= input.pool_min_size {
        return RecycleDecision::Destroy("pool already has enough available pods");
    }

    let Some(status) = &input.pod.status else {
        return RecycleDecision::Destroy("pod has no status");
    };

    if status.phase != crate::crd::WarmPodPhase::Assigned && status.phase != crate::crd::WarmPodPhase::Terminating {
        return RecycleDecision::Destroy("pod not in a releasable phase");
    }

    let age = match input.pod.spec.creation_timestamp.as_deref().and_then(parse_rfc3339) {
        Some(created) => (input.now - created).num_seconds().max(0) as u64,
        None => return RecycleDecision::Destroy("pod has no creation timestamp"),
    };

    // Gate 2: pod age.
    if age >= input.policy.max_pod_age {
        return RecycleDecision::Destroy("pod exceeds max age");
    }

    // Gate 3: recycle count.
    if status.recycle_count >= input.policy.max_pod_recycle_count {
        return RecycleDecision::Destroy("max recycle count reached");
    }

    // Gate 4: minimum runtime before recycling is safe.
    if age < input.policy.min_pod_runtime_before_recycle {
        return RecycleDecision::Destroy("pod has not run long enough to recycle safely");
    }

    // Gate 5: security events always force a destroy.
    if input.security_event.is_some() {
        return RecycleDecision::Destroy("sandbox reported a security event");
    }

    // Gate 6: untrusted packages installed outside the profile allowlist.
    if input.untrusted_packages_detected {
        return RecycleDecision::Destroy("untrusted packages detected");
    }

    // Gate 7: modifications under a protected path.
    if input.modified_protected_paths {
        return RecycleDecision::Destroy("protected path modified");
    }

    // Gate 8: historical resource usage.
    if input.resource_usage_exceeded {
        return RecycleDecision::Destroy("historical resource usage exceeded tolerance");
    }

    // Gate 9: live probe for leftover processes/connections/locks.
    match input.active_process_probe {
        Some(true) => return RecycleDecision::Destroy("active process or connection still present"),
        Some(false) => {}
        None => {
            if input.policy.fail_closed {
                return RecycleDecision::Destroy("process probe did not run");
            }
        }
    }

    match input.cleanup_script_exit_code {
        Some(0) => {}
        Some(_) => return RecycleDecision::Destroy("cleanup script failed"),
        None if input.policy.cleanup_script.is_some() => {
            return gate_on_missing_result(input.policy, "cleanup script did not run")
        }
        None => {}
    }

    match input.verification_script_exit_code {
        Some(0) => {}
        Some(_) => return RecycleDecision::Destroy("verification script failed"),
        None if input.policy.verification_script.is_some() => {
            return gate_on_missing_result(input.policy, "verification script did not run")
        }
        None => {}
    }

    RecycleDecision::Recycle
}

/// `fail_closed` determines whether a missing probe result (exec didn't
/// run at all, e.g. pod unreachable) counts against the pod or is
/// tolerated. Design Notes default to fail-open for this ambiguity.
fn gate_on_missing_result(policy: &RecyclingPolicy, reason: &'static str) -> RecycleDecision {
    if policy.fail_closed {
        RecycleDecision::Destroy(reason)
    } else {
        RecycleDecision::Recycle
    }
}

/// Resets a WarmPod's status back to `Ready` after a successful recycle,
/// bumping the recycle counter and clearing the prior assignment.
pub fn apply_recycle(status: &mut WarmPodStatus) {
    status.phase = crate::crd::WarmPodPhase::Ready;
    status.assigned_to = None;
    status.assigned_at = None;
    status.recycle_count += 1;
}
