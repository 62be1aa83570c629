//! Ties the informer caches, work dispatcher, leader election, and
//! metrics/health HTTP server together — the counterpart of the teacher's
//! `commands/reconcile.rs::run()` and `commands/watch.rs::watch_loop()`,
//! generalized across five resource kinds instead of one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Controller;
use kube::runtime::watcher;
use kube::{Api, Client};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::crd::{Sandbox, WarmPod, WarmPool};
use crate::leader::{self, Shutdown};
use crate::metrics;
use crate::reconcile::{self, Context};

pub async fn run(config: Config) -> anyhow::Result<()> {
    metrics::init();
    let client = Client::try_default().await?;
    let identity = format!("{}-{}", hostname(), Uuid::new_v4());
    let shutdown = Arc::new(Shutdown::new(Duration::from_secs(config.shutdown_timeout_seconds)));

    let http_handle = tokio::spawn(start_http_server(config.metrics_addr.clone(), shutdown.subscribe()));

    if config.enable_leader_election {
        info!(identity, "waiting to acquire leader lease");
        loop {
            if leader::acquire_leader(client.clone(), &config.namespace, &identity).await? {
                break;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        metrics::LEADER_STATUS.with_label_values(&[&identity]).set(1);
        let namespace = config.namespace.clone();
        let identity_for_renewal = identity.clone();
        let renewal_client = client.clone();
        let renewal_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            leader::lease_renewal_loop(renewal_client, &namespace, &identity_for_renewal, renewal_shutdown).await;
        });
    }

    let ctx = Context::new(client.clone(), None);

    let sandbox_controller = run_sandbox_controller(client.clone(), ctx.clone(), &config.namespace, shutdown.subscribe());
    let warm_pool_controller = run_warm_pool_controller(client.clone(), ctx.clone(), &config.namespace, shutdown.subscribe());
    let warm_pod_controller = run_warm_pod_controller(client.clone(), ctx.clone(), &config.namespace, shutdown.subscribe());

    tokio::select! {
        _ = sandbox_controller => warn!("sandbox controller loop exited"),
        _ = warm_pool_controller => warn!("warm pool controller loop exited"),
        _ = warm_pod_controller => warn!("warm pod controller loop exited"),
        _ = Shutdown::wait_for_signal() => {
            info!("shutting down");
            shutdown.signal();
        }
    }

    let _ = tokio::time::timeout(shutdown.grace_period, http_handle).await;
    Ok(())
}

async fn run_sandbox_controller(client: Client, ctx: Arc<Context>, namespace: &str, mut shutdown: broadcast::Receiver<()>) {
    let api: Api<Sandbox> = Api::namespaced(client.clone(), namespace);
    let pods: Api<Pod> = Api::namespaced(client, namespace);

    let controller = Controller::new(api, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::sandbox::reconcile, reconcile::sandbox::error_policy, ctx)
        .for_each(|result| async move {
            if let Err(err) = result {
                error!(error = %err, "sandbox reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {}
        _ = shutdown.recv() => {}
    }
}

async fn run_warm_pool_controller(client: Client, ctx: Arc<Context>, namespace: &str, mut shutdown: broadcast::Receiver<()>) {
    let api: Api<WarmPool> = Api::namespaced(client.clone(), namespace);
    let pods: Api<WarmPod> = Api::namespaced(client, namespace);

    let controller = Controller::new(api, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::warm_pool::reconcile, reconcile::warm_pool::error_policy, ctx)
        .for_each(|result| async move {
            if let Err(err) = result {
                error!(error = %err, "warm pool reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {}
        _ = shutdown.recv() => {}
    }
}

async fn run_warm_pod_controller(client: Client, ctx: Arc<Context>, namespace: &str, mut shutdown: broadcast::Receiver<()>) {
    let api: Api<WarmPod> = Api::namespaced(client.clone(), namespace);
    let pods: Api<Pod> = Api::namespaced(client, namespace);

    let controller = Controller::new(api, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::warm_pod::reconcile, reconcile::warm_pod::error_policy, ctx)
        .for_each(|result| async move {
            if let Err(err) = result {
                error!(error = %err, "warm pod reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {}
        _ = shutdown.recv() => {}
    }
}

async fn start_http_server(addr: String, mut shutdown: broadcast::Receiver<()>) {
    let router = build_router();
    let socket_addr: SocketAddr = addr.parse().expect("metrics address must be a valid socket address");
    info!(%socket_addr, "starting metrics server");

    let listener = match tokio::net::TcpListener::bind(socket_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to bind metrics server");
            return;
        }
    };

    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });

    if let Err(err) = serve.await {
        error!(error = %err, "metrics server exited with error");
    }
}

fn build_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(ready_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    let families = metrics::REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer).unwrap_or_default();
    (axum::http::StatusCode::OK, buffer)
}

async fn ready_handler() -> impl IntoResponse {
    axum::http::StatusCode::OK
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sandbox-controller".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let app = Router::new().route("/healthz", get(|| async { "ok" }));
        let response = app.oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        metrics::init();
        let app = Router::new().route("/metrics", get(metrics_handler));
        let response = app.oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
