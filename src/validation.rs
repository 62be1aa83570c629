//! Profile & Runtime Validators (§4.8): admission-time checks run by the
//! Sandbox and WarmPool reconcilers before a pod is ever created, in the
//! same evaluate-then-report style the teacher's policy evaluation used
//! for pod governance checks.

use crate::crd::{RuntimeEnvironment, RuntimeEnvironmentStatus, SandboxProfile, SandboxSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reason: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }
}

/// Confirms a RuntimeEnvironment referenced by `spec.runtime` exists,
/// is marked `available`, and isn't flagged by vulnerability scanning.
pub fn validate_runtime(
    requested_runtime: &str,
    env: Option<&RuntimeEnvironment>,
) -> Result<(), ValidationFailure> {
    let env = env.ok_or_else(|| {
        ValidationFailure::new(
            "RuntimeNotFound",
            format!("no RuntimeEnvironment matches runtime '{requested_runtime}'"),
        )
    })?;

    let status: &RuntimeEnvironmentStatus = env.status.as_ref().ok_or_else(|| {
        ValidationFailure::new("RuntimeNotValidated", "RuntimeEnvironment has no status yet")
    })?;

    if !status.available {
        return Err(ValidationFailure::new(
            "RuntimeUnavailable",
            format!("RuntimeEnvironment '{}' is not available", env.spec.image),
        ));
    }

    if status.vulnerability_status == crate::crd::VulnerabilityStatus::Flagged {
        return Err(ValidationFailure::new(
            "RuntimeFlagged",
            format!("RuntimeEnvironment '{}' is flagged by vulnerability scanning", env.spec.image),
        ));
    }

    Ok(())
}

/// Confirms a SandboxProfile referenced by `spec.profileRef` exists and was
/// marked valid by its own reconciler.
pub fn validate_profile(profile: Option<&SandboxProfile>) -> Result<(), ValidationFailure> {
    let Some(profile) = profile else {
        return Ok(());
    };

    let valid = profile.status.as_ref().map(|s| s.valid).unwrap_or(false);
    if !valid {
        return Err(ValidationFailure::new(
            "ProfileInvalid",
            format!("SandboxProfile '{}' has not passed validation", profile.spec.language),
        ));
    }

    Ok(())
}

/// Cross-checks a Sandbox's resource/security requests against sane
/// bounds. Distinct from runtime/profile lookups because it needs no
/// cluster state — pure spec validation, run first and cheaply.
pub fn validate_sandbox_spec(spec: &SandboxSpec) -> Result<(), ValidationFailure> {
    if spec.timeout == 0 || spec.timeout > 3600 {
        return Err(ValidationFailure::new(
            "InvalidTimeout",
            format!("timeout {} is outside the allowed range 1..=3600", spec.timeout),
        ));
    }

    if spec.runtime.trim().is_empty() {
        return Err(ValidationFailure::new("InvalidRuntime", "runtime must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{RuntimeEnvironmentSpec, SandboxProfileSpec};

    fn make_env(available: bool, flagged: bool) -> RuntimeEnvironment {
        let mut env = RuntimeEnvironment::new(
            "python-3-10",
            RuntimeEnvironmentSpec {
                image: "python:3.10".to_string(),
                language: "python".to_string(),
                version: "3.10".to_string(),
                ..Default::default()
            },
        );
        env.status = Some(RuntimeEnvironmentStatus {
            available,
            vulnerability_status: if flagged {
                crate::crd::VulnerabilityStatus::Flagged
            } else {
                crate::crd::VulnerabilityStatus::Clean
            },
            ..Default::default()
        });
        env
    }

    #[test]
    fn test_validate_runtime_missing() {
        let result = validate_runtime("python:3.10", None);
        assert_eq!(result.unwrap_err().reason, "RuntimeNotFound");
    }

    #[test]
    fn test_validate_runtime_unavailable() {
        let env = make_env(false, false);
        let result = validate_runtime("python:3.10", Some(&env));
        assert_eq!(result.unwrap_err().reason, "RuntimeUnavailable");
    }

    #[test]
    fn test_validate_runtime_flagged() {
        let env = make_env(true, true);
        let result = validate_runtime("python:3.10", Some(&env));
        assert_eq!(result.unwrap_err().reason, "RuntimeFlagged");
    }

    #[test]
    fn test_validate_runtime_ok() {
        let env = make_env(true, false);
        assert!(validate_runtime("python:3.10", Some(&env)).is_ok());
    }

    #[test]
    fn test_validate_profile_none_is_ok() {
        assert!(validate_profile(None).is_ok());
    }

    #[test]
    fn test_validate_profile_invalid() {
        let mut profile = SandboxProfile::new(
            "restricted",
            SandboxProfileSpec { language: "python".to_string(), ..Default::default() },
        );
        profile.status = Some(crate::crd::SandboxProfileStatus { valid: false, conditions: vec![] });
        let result = validate_profile(Some(&profile));
        assert_eq!(result.unwrap_err().reason, "ProfileInvalid");
    }

    #[test]
    fn test_validate_sandbox_spec_rejects_zero_timeout() {
        let spec = SandboxSpec { runtime: "python:3.10".to_string(), timeout: 0, ..Default::default() };
        assert_eq!(validate_sandbox_spec(&spec).unwrap_err().reason, "InvalidTimeout");
    }

    #[test]
    fn test_validate_sandbox_spec_rejects_empty_runtime() {
        let spec = SandboxSpec { runtime: "  ".to_string(), timeout: 60, ..Default::default() };
        assert_eq!(validate_sandbox_spec(&spec).unwrap_err().reason, "InvalidRuntime");
    }

    #[test]
    fn test_validate_sandbox_spec_ok() {
        let spec = SandboxSpec { runtime: "python:3.10".to_string(), timeout: 60, ..Default::default() };
        assert!(validate_sandbox_spec(&spec).is_ok());
    }
}
