//! Chord ring simulator

use std::{collections::BTreeSet, path::PathBuf};

use anyhow::Context;
use chord_ring::{ChordConfig, ChordId, Ring};
use clap::Parser;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chord_sim")]
#[command(about = "Run an in-process Chord ring and report its state")]
struct Cli {
	/// JSON config file; command line flags override it
	#[arg(long)]
	config: Option<PathBuf>,

	/// Identifier width in bits
	#[arg(long)]
	bits: Option<u32>,

	/// Node ids to start with (comma-separated)
	#[arg(long, value_delimiter = ',', default_value = "0,50,100,150")]
	nodes: Vec<u64>,

	/// Additional nodes with random ids
	#[arg(long, default_value = "0")]
	random: usize,

	/// Keys to store, each with a generated value (comma-separated)
	#[arg(long, value_delimiter = ',')]
	keys: Vec<String>,

	/// Nodes to remove gracefully after the keys are stored (comma-separated)
	#[arg(long, value_delimiter = ',')]
	leave: Vec<u64>,

	/// Stabilization rounds after each phase
	#[arg(long, default_value = "3")]
	rounds: usize,

	/// Print node snapshots as JSON instead of a ring listing
	#[arg(long)]
	json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let cli = Cli::parse();

	let mut config = match &cli.config {
		Some(path) => ChordConfig::from_file(path)
			.await
			.with_context(|| format!("loading {}", path.display()))?,
		None => ChordConfig::default(),
	};
	if let Some(bits) = cli.bits {
		config.bits = bits;
	}
	config.validate()?;

	let mut ring: Ring<String> = Ring::new(config)?;
	let space = ring.space();

	let mut ids: BTreeSet<u64> = cli.nodes.iter().map(|id| space.wrap(*id).value()).collect();
	let mut rng = rand::thread_rng();
	let capacity = space.max_id().value();
	while ids.len() < cli.nodes.len() + cli.random && (ids.len() as u64) <= capacity {
		ids.insert(rng.gen_range(0..=capacity));
	}

	for id in &ids {
		ring.add_node(*id).await?;
		ring.stabilize_rounds(cli.rounds).await?;
	}
	info!("Started {} nodes", ring.len());

	if !cli.keys.is_empty() {
		let entry = ring.node(*ring.ids().first().context("ring is empty")?).context("entry node vanished")?;
		for key in &cli.keys {
			let owner = entry.put(key, format!("value of {}", key)).await?;
			info!("PUT '{}' (id {}) stored at node {}", key, entry.hash(key), owner);
		}
		for id in ring.ids() {
			let node = ring.node(id).context("node vanished")?;
			for key in &cli.keys {
				let value = node.get(key).await?;
				info!("GET '{}' from node {} = '{}'", key, id, value);
			}
		}
	}

	for id in &cli.leave {
		ring.remove_node(ChordId::from(*id)).await?;
		ring.stabilize_rounds(cli.rounds).await?;
	}

	let snapshots = ring.snapshots().await?;
	if cli.json {
		println!("{}", serde_json::to_string_pretty(&snapshots)?);
	} else {
		println!("Ring structure (clockwise):");
		for snapshot in &snapshots {
			let predecessor = snapshot.predecessor.map_or("none".to_string(), |p| p.to_string());
			println!(
				"  [{}] -> successor: {}, predecessor: {}, keys: {:?}",
				snapshot.id, snapshot.successor, predecessor, snapshot.keys()
			);
		}
	}

	match ring.check().await {
		Ok(()) => info!("All ring properties hold"),
		Err(e) => info!("Ring not yet converged: {}", e),
	}
	ring.shutdown().await;
	Ok(())
}
