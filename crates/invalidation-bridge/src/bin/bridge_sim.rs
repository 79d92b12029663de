//! # bridge-sim
//!
//! Runs an in-process cluster through the two-node invalidation scenario and
//! prints each node's bridged groups and counters as JSON.
//!
//! ```text
//! bridge-sim [config.toml]
//! ```
//!
//! ```toml
//! [bridge]
//! channel_name = "cache-invalidation"
//!
//! [simulation]
//! nodes = ["x", "y", "z"]
//! ```
//!
//! The first node caches `orders`; every other node caches `orders` and
//! `users`. After the broadcasts, the last node is crashed and the survivors
//! are reported again.

use anyhow::{ensure, Context, Result};
use invalidation_bridge::sim::{InMemoryCluster, NodeReport};
use invalidation_bridge::{
    BridgeConfig, BroadcastOutcome, DeliveryMode, InvalidationBridgeApi, NodeId,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SimulationConfig {
    nodes: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["x".to_string(), "y".to_string()],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimFile {
    bridge: BridgeConfig,
    simulation: SimulationConfig,
}

#[derive(Serialize)]
struct Invocation {
    node: String,
    group: String,
    key: String,
    outcome: String,
}

#[derive(Serialize)]
struct Report {
    converged: Vec<NodeReport>,
    invocations: Vec<Invocation>,
    after_crash: Vec<NodeReport>,
}

fn load(path: Option<PathBuf>) -> Result<SimFile> {
    let Some(path) = path else {
        return Ok(SimFile::default());
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: SimFile =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    file.bridge.validate()?;
    Ok(file)
}

fn outcome_name(outcome: BroadcastOutcome) -> String {
    match outcome {
        BroadcastOutcome::Suppressed => "suppressed",
        BroadcastOutcome::Sent => "sent",
        BroadcastOutcome::Failed => "failed",
    }
    .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let file = load(std::env::args_os().nth(1).map(PathBuf::from))?;
    ensure!(
        file.simulation.nodes.len() >= 2,
        "simulation needs at least two nodes"
    );

    info!(
        channel = %file.bridge.channel_name,
        nodes = file.simulation.nodes.len(),
        "[sim] Building cluster"
    );
    let mut cluster = InMemoryCluster::new(file.bridge);
    for (i, id) in file.simulation.nodes.iter().enumerate() {
        let node = cluster.add_node(id.as_str()).await?;
        node.registry.create_group("orders").await;
        node.registry.put("orders", "42");
        if i > 0 {
            node.registry.create_group("users").await;
            node.registry.put("users", "7");
        }
    }
    cluster.start_all().await.context("starting bridges")?;

    let first = &file.simulation.nodes[0];
    let sender = cluster
        .node(first)
        .context("first node missing")?
        .controller
        .clone();

    let mut invocations = Vec::new();
    for (group, key) in [("orders", "42"), ("inventory", "7")] {
        let outcome = sender.invalidate(group, key.into(), DeliveryMode::Async).await;
        invocations.push(Invocation {
            node: first.clone(),
            group: group.to_string(),
            key: key.to_string(),
            outcome: outcome_name(outcome),
        });
    }
    cluster.settle().await;
    let converged = cluster.report();

    let last = NodeId::new(file.simulation.nodes[file.simulation.nodes.len() - 1].as_str());
    cluster.crash(&last).await;
    let after_crash = cluster.report();

    let report = Report {
        converged,
        invocations,
        after_crash,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    cluster.stop_all().await;
    Ok(())
}
