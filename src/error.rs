use std::fmt;

/// Error taxonomy consumed by `queue::Dispatcher`'s classification step.
/// Mirrors the split the teacher's `error_policy` makes when it inspects a
/// `kube::Error` to decide whether to requeue.
#[derive(Debug)]
pub enum ReconcileError {
    /// The resource as specified cannot ever succeed (bad runtime ref, spec
    /// fails a validator). Requeuing would not help.
    Validation(String),

    /// A referenced object (RuntimeEnvironment, SandboxProfile, WarmPool)
    /// does not exist yet. May appear later; requeue with backoff.
    DependencyMissing(String),

    /// Optimistic-concurrency conflict (HTTP 409) on a status patch or
    /// warm pod assignment race. Requeue immediately, no backoff growth.
    Conflict(String),

    /// Transient infrastructure failure: API server timeout, network
    /// blip, etcd unavailable. Requeue with exponential backoff.
    TransientInfra(String),

    /// In-pod exec (cleanup/verification/preload script) failed.
    ExecFailure(String),

    /// Infrastructure failure that will not resolve on its own (e.g. RBAC
    /// permanently denies a verb). Surface via condition + event, still
    /// requeue at the floor interval so an admin fix is picked up.
    PermanentInfra(String),

    /// Wraps the underlying kube client error for any path that hasn't been
    /// classified into the taxonomy above (falls back to `TransientInfra`
    /// semantics for scheduling purposes).
    Kube(kube::Error),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Validation(msg) => write!(f, "validation error: {msg}"),
            ReconcileError::DependencyMissing(msg) => write!(f, "dependency missing: {msg}"),
            ReconcileError::Conflict(msg) => write!(f, "conflict: {msg}"),
            ReconcileError::TransientInfra(msg) => write!(f, "transient infra error: {msg}"),
            ReconcileError::ExecFailure(msg) => write!(f, "exec failure: {msg}"),
            ReconcileError::PermanentInfra(msg) => write!(f, "permanent infra error: {msg}"),
            ReconcileError::Kube(err) => write!(f, "kube api error: {err}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Kube(err) => Some(err),
            _ => None,
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => ReconcileError::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 404 => ReconcileError::DependencyMissing(resp.message.clone()),
            _ => ReconcileError::Kube(err),
        }
    }
}

/// Classification used by `queue::Dispatcher` to pick a requeue strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Do not requeue; the error was already surfaced via a Failed
    /// condition and requires user action to unblock.
    Terminal,
    /// Requeue with exponential backoff.
    Transient,
    /// Requeue immediately at the dispatcher's floor interval.
    Immediate,
}

impl ReconcileError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            ReconcileError::Validation(_) => ErrorClass::Terminal,
            ReconcileError::DependencyMissing(_) => ErrorClass::Transient,
            ReconcileError::Conflict(_) => ErrorClass::Immediate,
            ReconcileError::TransientInfra(_) => ErrorClass::Transient,
            ReconcileError::ExecFailure(_) => ErrorClass::Transient,
            ReconcileError::PermanentInfra(_) => ErrorClass::Transient,
            ReconcileError::Kube(_) => ErrorClass::Transient,
        }
    }

    pub fn should_requeue(&self) -> bool {
        self.classify() != ErrorClass::Terminal
    }
}
