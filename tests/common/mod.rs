use sandbox_controller::crd::common::ObjectRef;
use sandbox_controller::crd::{
    RuntimeEnvironment, RuntimeEnvironmentSpec, RuntimeEnvironmentStatus, Sandbox, SandboxSpec,
    VulnerabilityStatus, WarmPod, WarmPodPhase, WarmPodSpec, WarmPodStatus, WarmPool, WarmPoolSpec,
};

pub fn make_sandbox(name: &str, runtime: &str, timeout: u32) -> Sandbox {
    Sandbox::new(name, SandboxSpec { runtime: runtime.to_string(), timeout, ..Default::default() })
}

pub fn make_warm_pool(name: &str, runtime: &str, min_size: u32, max_size: u32) -> WarmPool {
    WarmPool::new(
        name,
        WarmPoolSpec { runtime: runtime.to_string(), min_size, max_size, ..Default::default() },
    )
}

pub fn make_warm_pod(name: &str, pool_name: &str, phase: WarmPodPhase, created_at: &str) -> WarmPod {
    let mut pod = WarmPod::new(
        name,
        WarmPodSpec {
            pool_ref: ObjectRef { name: pool_name.to_string(), namespace: None, uid: None },
            creation_timestamp: Some(created_at.to_string()),
            ..Default::default()
        },
    );
    pod.status = Some(WarmPodStatus { phase, ..Default::default() });
    pod
}

pub fn make_runtime_environment(image: &str, available: bool) -> RuntimeEnvironment {
    let mut env = RuntimeEnvironment::new(
        &sandbox_controller::crd::common::normalize_runtime_label(image),
        RuntimeEnvironmentSpec {
            image: image.to_string(),
            language: "python".to_string(),
            version: "3.10".to_string(),
            ..Default::default()
        },
    );
    env.status = Some(RuntimeEnvironmentStatus { available, vulnerability_status: VulnerabilityStatus::Clean, ..Default::default() });
    env
}
