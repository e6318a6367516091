//! Wiring of a single node: store, coordinator and HTTP router.

use std::future::Future;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;

use crate::api::{self, AppState};
use crate::cluster::{Coordinator, Topology};
use crate::config::ClusterConfig;
use crate::db::Database;

/// Build the router of a node.
pub fn build_app(db: Database, topology: Topology, config: &ClusterConfig) -> Result<Router> {
    let coordinator = Coordinator::new(db.clone(), topology, config)
        .context("Failed to create replica clients")?;
    Ok(api::create_router(AppState { db, coordinator }, config))
}

/// Serve a node on `listener` until `shutdown` resolves.
///
/// The store is marked accessible while the node serves and inaccessible
/// once it stops.
pub async fn run_node<F>(
    listener: TcpListener,
    db: Database,
    topology: Topology,
    config: ClusterConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = topology.nodes()[topology.local_index()].clone();

    let settings = serde_json::to_string(&config).context("Failed to serialize config")?;
    let addr = listener.local_addr()?;
    let app = build_app(db.clone(), topology, &config)?;

    db.set_accessible(true);
    tracing::info!("Node {} listening on {}", local, addr);
    tracing::debug!(config = %settings, "Cluster configuration");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    db.set_accessible(false);
    tracing::info!("Node {} stopped", local);

    served.context("Server error")
}
