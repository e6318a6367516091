use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kv_cluster::cluster::{NodeClient, Topology};
use kv_cluster::config::ClusterConfig;
use kv_cluster::db::Database;
use kv_cluster::server;

#[derive(Parser)]
#[command(name = "cluster")]
#[command(about = "Replicated key-value storage cluster")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single node
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Address to bind and to advertise in the topology
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory holding this node's store
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Base URL of a cluster node (repeat for each node, including this one)
        #[arg(short, long = "node")]
        nodes: Vec<String>,
    },
    /// Run a whole cluster in this process on consecutive ports
    Cluster {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: u16,

        /// Port of the first node
        #[arg(long, default_value = "8080")]
        base_port: u16,

        /// Directory holding one sub-directory per node
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// Check a node's status
    Status {
        /// Base URL of the node
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
    /// Drop tombstones older than the given age from a stopped node's store
    Purge {
        #[arg(short, long)]
        data: Option<PathBuf>,

        #[arg(long, default_value = "86400")]
        older_than_secs: i64,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "kv_cluster=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_store(dir: Option<PathBuf>) -> anyhow::Result<Database> {
    let db = match dir {
        Some(dir) => Database::open_dir(&dir)?,
        None => Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

/// Resolves on Ctrl-C and tells every node to stop.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn serve(
    host: String,
    port: u16,
    data: Option<PathBuf>,
    nodes: Vec<String>,
) -> anyhow::Result<()> {
    let local = format!("http://{}:{}", host, port);
    let topology = if nodes.is_empty() {
        Topology::single(&local)?
    } else {
        Topology::new(&nodes, &local)?
    };

    let db = open_store(data)?;
    let listener = TcpListener::bind((host.as_str(), port)).await?;
    let shutdown = shutdown_channel();

    server::run_node(
        listener,
        db,
        topology,
        ClusterConfig::from_env(),
        wait_for(shutdown),
    )
    .await
}

async fn run_cluster(count: u16, base_port: u16, data: Option<PathBuf>) -> anyhow::Result<()> {
    let root = match data {
        Some(dir) => dir,
        None => Database::default_dir()?.join("cluster"),
    };
    let ports: Vec<u16> = (0..count)
        .map(|i| base_port.checked_add(i))
        .collect::<Option<_>>()
        .context("Port range overflows")?;
    let urls: Vec<String> = ports
        .iter()
        .map(|p| format!("http://127.0.0.1:{}", p))
        .collect();

    tracing::info!("Starting cluster of {} nodes: {:?}", count, urls);

    let config = ClusterConfig::from_env();
    let shutdown = shutdown_channel();
    let mut nodes = tokio::task::JoinSet::new();

    for (port, url) in ports.iter().zip(&urls) {
        let topology = Topology::new(&urls, url)?;
        let db = open_store(Some(root.join(format!("node-{}", port))))?;
        let listener = TcpListener::bind(("127.0.0.1", *port)).await?;
        nodes.spawn(server::run_node(
            listener,
            db,
            topology,
            config.clone(),
            wait_for(shutdown.clone()),
        ));
    }

    while let Some(joined) = nodes.join_next().await {
        joined??;
    }
    Ok(())
}

async fn status(url: String) -> anyhow::Result<()> {
    let base = reqwest::Url::parse(&url).with_context(|| format!("Invalid url {}", url))?;
    let client = NodeClient::new(base, ClusterConfig::from_env().replica_timeout)?;

    let report = match client.status().await {
        Ok(code) => serde_json::json!({
            "node": url,
            "reachable": true,
            "status": code.as_u16(),
            "accessible": code.is_success(),
        }),
        Err(e) => serde_json::json!({
            "node": url,
            "reachable": false,
            "error": e.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Tombstones written before the returned instant get purged.
fn purge_cutoff(
    now: chrono::DateTime<chrono::Utc>,
    older_than_secs: i64,
) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let age = chrono::TimeDelta::try_seconds(older_than_secs)
        .context("--older-than-secs out of range")?;
    now.checked_sub_signed(age)
        .context("Purge cutoff out of range")
}

fn purge(data: Option<PathBuf>, older_than_secs: i64) -> anyhow::Result<()> {
    let cutoff = purge_cutoff(chrono::Utc::now(), older_than_secs)?;
    let db = open_store(data)?;
    let purged = db.purge_tombstones(cutoff)?;
    println!("Purged {} tombstones", purged);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve {
            port,
            host,
            data,
            nodes,
        }) => serve(host, port, data, nodes).await,
        Some(Commands::Cluster {
            nodes,
            base_port,
            data,
        }) => run_cluster(nodes, base_port, data).await,
        Some(Commands::Status { url }) => status(url).await,
        Some(Commands::Purge {
            data,
            older_than_secs,
        }) => purge(data, older_than_secs),
        None => run_cluster(3, 8080, None).await,
    }
}
