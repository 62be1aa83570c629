//! In-pod exec interface (§6): used by `recycle.rs` for cleanup/
//! verification scripts and by `reconcile::warm_pod` for package preload.
//! Wraps `kube::api::Api::exec`'s attached stream into a single
//! "run this command, give me its exit code" call.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::{Client, Error};
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::crd::common::PreloadScript;

pub struct ExecChannel {
    api: Api<Pod>,
}

#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub exit_code: Option<i32>,
}

impl ExecChannel {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self { api: Api::namespaced(client, namespace) }
    }

    /// Runs `command` inside `pod_name`'s sandbox container and waits for
    /// completion, capturing stdout and the terminal exit code reported by
    /// the attached status channel.
    pub async fn run(&self, pod_name: &str, command: Vec<&str>) -> Result<ExecOutput, Error> {
        let params = AttachParams::default().stdout(true).stderr(false).container("sandbox");
        let mut attached = self.api.exec(pod_name, command, &params).await?;

        let mut stdout = String::new();
        if let Some(mut stdout_stream) = attached.stdout() {
            let _ = stdout_stream.read_to_string(&mut stdout).await;
        }

        let status = match attached.take_status() {
            Some(status_future) => status_future.await,
            None => None,
        };
        let exit_code = status
            .and_then(|status| status.details.and_then(|details| details.causes))
            .and_then(|causes| causes.into_iter().find(|cause| cause.reason.as_deref() == Some("ExitCode")))
            .and_then(|cause| cause.message.and_then(|message| message.parse().ok()));

        attached.join().await.ok();

        Ok(ExecOutput { stdout, exit_code })
    }
}

pub fn cleanup_command(script: &str) -> Vec<&str> {
    vec!["/bin/sh", "-c", script]
}

fn install_command(packages: &str) -> String {
    format!("pip install --quiet {packages}")
}

/// Execs a WarmPool's `preloadPackages`/`preloadScripts` into a pod's
/// container, in order, one at a time. Best-effort: a failing install or
/// script is logged and skipped rather than aborting the rest, since a
/// pool with several preload entries shouldn't be left entirely
/// unprimed over one bad one.
pub async fn run_preload_scripts(channel: &ExecChannel, pod_name: &str, packages: &[String], scripts: &[PreloadScript]) {
    if !packages.is_empty() {
        let command = install_command(&packages.join(" "));
        if let Err(err) = channel.run(pod_name, cleanup_command(&command)).await {
            warn!(pod = pod_name, %err, "preload package install failed");
        }
    }

    for script in scripts {
        if let Err(err) = channel.run(pod_name, cleanup_command(&script.content)).await {
            warn!(pod = pod_name, script = script.name.as_str(), %err, "preload script failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_command_wraps_script_in_shell() {
        let command = cleanup_command("rm -rf /tmp/*");
        assert_eq!(command, vec!["/bin/sh", "-c", "rm -rf /tmp/*"]);
    }

    #[test]
    fn test_install_command_joins_packages() {
        assert_eq!(install_command("numpy pandas"), "pip install --quiet numpy pandas");
    }
}
