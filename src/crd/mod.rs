pub mod common;
pub mod runtime_environment;
pub mod sandbox;
pub mod sandbox_profile;
pub mod warm_pod;
pub mod warm_pool;

pub use common::{
    Condition, ConditionStatus, EgressRule, FilesystemConfig, NetworkAccess, ObjectRef,
    PreloadScript, ResourceSpec, SandboxSecurityContext, SecurityLevel, StorageConfig,
};
pub use runtime_environment::{
    RuntimeEnvironment, RuntimeEnvironmentSpec, RuntimeEnvironmentStatus, VulnerabilityStatus,
};
pub use sandbox::{Sandbox, SandboxPhase, SandboxSpec, SandboxStatus, SANDBOX_FINALIZER};
pub use sandbox_profile::{SandboxProfile, SandboxProfileSpec, SandboxProfileStatus};
pub use warm_pod::{WarmPod, WarmPodPhase, WarmPodSpec, WarmPodStatus, WARM_POD_FINALIZER};
pub use warm_pool::{
    AutoScalingConfig, RecyclingPolicy, WarmPool, WarmPoolSpec, WarmPoolStatus, WARM_POOL_FINALIZER,
};
