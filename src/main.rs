use crate::client::KubeClusterClient;
use crate::reconciler::Reconciler;
use crate::state::ControllerContext;
use crate::webserver::HealthState;
use anyhow::Context;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod controller;
mod image_reference;
mod reconciler;
mod render;
mod state;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting sriov-webhook-controller {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::load_config(&config_path)?;

    let kube_client = client::create_client()
        .await
        .context("Failed to connect to the Kubernetes API server")?;
    let cluster_client = KubeClusterClient::new(
        kube_client.clone(),
        config.namespace.clone(),
        config.apply_strategy,
    );

    let health = Arc::new(HealthState::default());
    let app = webserver::create_app(health.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind webserver to {}", addr))?;
    let webserver = tokio::spawn(async move { axum::serve(listener, app).await });

    let ctx = Arc::new(ControllerContext {
        resync_period: config.resync_period(),
        reconciler: Reconciler::new(cluster_client, config),
        health,
    });
    controller::run(kube_client, ctx).await;

    webserver.abort();
    Ok(())
}
