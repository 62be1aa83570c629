use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorClass, ReconcileError};

use super::key::ResourceKey;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const IMMEDIATE_REQUEUE: Duration = Duration::from_millis(100);

/// Tracks per-key retry attempts and computes the next requeue delay,
/// the piece of the Work Dispatcher (§4.1) that sits between
/// `kube_runtime`'s `error_policy` callback and the object's next
/// reconcile attempt. Exponential backoff with jitter, capped, reset
/// on success.
pub struct Dispatcher {
    attempts: Mutex<HashMap<ResourceKey, u32>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { attempts: Mutex::new(HashMap::new()) }
    }

    /// Call after a reconcile succeeds to reset backoff state.
    pub fn record_success(&self, key: &ResourceKey) {
        self.attempts.lock().unwrap().remove(key);
    }

    /// Call after a reconcile fails; returns the delay before the next
    /// attempt, or `None` if the error is terminal and must not requeue.
    pub fn record_failure(&self, key: &ResourceKey, err: &ReconcileError) -> Option<Duration> {
        match err.classify() {
            ErrorClass::Terminal => {
                self.attempts.lock().unwrap().remove(key);
                None
            }
            ErrorClass::Immediate => Some(IMMEDIATE_REQUEUE),
            ErrorClass::Transient => {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(key.clone()).or_insert(0);
                *count += 1;
                Some(backoff_for_attempt(*count))
            }
        }
    }

    pub fn attempt_count(&self, key: &ResourceKey) -> u32 {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    let capped = exp.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_error_does_not_requeue() {
        let dispatcher = Dispatcher::new();
        let key = ResourceKey::new("Sandbox", "default", "sbx-1");
        let delay = dispatcher.record_failure(&key, &ReconcileError::Validation("bad".to_string()));
        assert!(delay.is_none());
    }

    #[test]
    fn test_conflict_requeues_immediately() {
        let dispatcher = Dispatcher::new();
        let key = ResourceKey::new("WarmPod", "default", "wp-1");
        let delay = dispatcher
            .record_failure(&key, &ReconcileError::Conflict("resourceVersion".to_string()))
            .unwrap();
        assert!(delay <= Duration::from_millis(200));
    }

    #[test]
    fn test_transient_backoff_grows_with_attempts() {
        let dispatcher = Dispatcher::new();
        let key = ResourceKey::new("WarmPool", "default", "pool-1");
        let first = dispatcher
            .record_failure(&key, &ReconcileError::TransientInfra("timeout".to_string()))
            .unwrap();
        let second = dispatcher
            .record_failure(&key, &ReconcileError::TransientInfra("timeout".to_string()))
            .unwrap();
        assert!(second >= first);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let dispatcher = Dispatcher::new();
        let key = ResourceKey::new("WarmPool", "default", "pool-2");
        for _ in 0..20 {
            dispatcher.record_failure(&key, &ReconcileError::TransientInfra("timeout".to_string()));
        }
        let delay = dispatcher
            .record_failure(&key, &ReconcileError::TransientInfra("timeout".to_string()))
            .unwrap();
        assert!(delay <= MAX_BACKOFF + Duration::from_millis(MAX_BACKOFF.as_millis() as u64 / 4 + 1));
    }

    #[test]
    fn test_success_resets_attempt_count() {
        let dispatcher = Dispatcher::new();
        let key = ResourceKey::new("Sandbox", "default", "sbx-2");
        dispatcher.record_failure(&key, &ReconcileError::TransientInfra("timeout".to_string()));
        assert_eq!(dispatcher.attempt_count(&key), 1);
        dispatcher.record_success(&key);
        assert_eq!(dispatcher.attempt_count(&key), 0);
    }
}
