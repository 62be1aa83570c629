//! Leader Election & Shutdown (§4.9). Ported from the teacher's
//! `acquire_leader`/`lease_renewal_loop` pattern over a `coordination.k8s.io`
//! `Lease`: only the holder runs reconciles; everyone else blocks until the
//! lease is free or has expired.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::chrono::Utc;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Error};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};

pub const LEASE_NAME: &str = "sandbox-controller-leader";
pub const LEASE_DURATION_SECONDS: i32 = 15;
pub const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Attempts to become leader by creating (or taking over) the well-known
/// Lease object. Returns `true` if this process now holds it.
pub async fn acquire_leader(client: Client, namespace: &str, identity: &str) -> Result<bool, Error> {
    let api: Api<Lease> = Api::namespaced(client, namespace);
    let now = MicroTime(Utc::now());

    let lease = Lease {
        metadata: ObjectMeta { name: Some(LEASE_NAME.to_string()), ..Default::default() },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            ..Default::default()
        }),
    };

    match api.create(&PostParams::default(), &lease).await {
        Ok(_) => {
            info!(identity, "acquired leader lease");
            Ok(true)
        }
        Err(Error::Api(resp)) if resp.code == 409 => {
            let existing = api.get(LEASE_NAME).await?;
            let spec = existing.spec.unwrap_or_default();
            let is_ours = spec.holder_identity.as_deref() == Some(identity);
            let is_expired = spec
                .renew_time
                .as_ref()
                .zip(spec.lease_duration_seconds)
                .map(|(renew, duration)| {
                    let deadline = renew.0 + k8s_openapi::chrono::Duration::seconds(duration as i64);
                    Utc::now() > deadline
                })
                .unwrap_or(true);

            if !is_ours && !is_expired {
                return Ok(false);
            }

            let now = MicroTime(Utc::now());
            let patch = json!({
                "spec": {
                    "holderIdentity": identity,
                    "leaseDurationSeconds": LEASE_DURATION_SECONDS,
                    "acquireTime": now,
                    "renewTime": now,
                }
            });
            match api.patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch)).await {
                Ok(_) => {
                    info!(identity, took_over_from = spec.holder_identity.as_deref().unwrap_or("?"), "took over leader lease");
                    Ok(true)
                }
                Err(Error::Api(resp)) if resp.code == 409 => Ok(false),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// Renews the lease on a fixed interval until told to shut down. Renewal
/// failures are logged and retried on the next tick rather than treated
/// as loss of leadership — a single missed renew inside the duration
/// window is tolerated.
pub async fn lease_renewal_loop(client: Client, namespace: &str, identity: &str, mut shutdown: broadcast::Receiver<()>) {
    let api: Api<Lease> = Api::namespaced(client, namespace);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(identity, "stopping lease renewal loop");
                return;
            }
            _ = sleep(LEASE_RENEW_INTERVAL) => {
                let now = MicroTime(Utc::now());
                let patch = json!({ "spec": { "renewTime": now } });
                if let Err(err) = api.patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch)).await {
                    warn!(identity, error = %err, "failed to renew leader lease");
                }
            }
        }
    }
}

/// Graceful shutdown coordination: a broadcast channel that fans a single
/// shutdown signal out to every long-running task (lease renewal, informer
/// loops, the metrics server), plus a bounded grace period for in-flight
/// reconciles to finish before the process exits.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    pub grace_period: Duration,
}

impl Shutdown {
    pub fn new(grace_period: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx, grace_period }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn signal(&self) {
        let _ = self.tx.send(());
    }

    pub async fn wait_for_signal() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(err) => warn!(error = %err, "failed to install signal handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_reaches_subscribers() {
        let shutdown = Shutdown::new(Duration::from_secs(1));
        let mut rx1 = shutdown.subscribe();
        let mut rx2 = shutdown.subscribe();
        shutdown.signal();
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_lease_duration_constant_matches_renew_interval_ratio() {
        assert!(LEASE_DURATION_SECONDS as u64 > LEASE_RENEW_INTERVAL.as_secs());
    }
}
