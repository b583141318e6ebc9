/*
    Gossip averaging solves the distributed mean problem without a coordinator. Every peer starts with a private real number and only ever talks to its direct neighbors; the goal is for all peers to hold (approximately) the arithmetic mean of the initial values.

    The protocol works in rounds. In each round a peer broadcasts its current value, collects the values its neighbors broadcast for the same round, and moves toward them: value += delta * sum(r - value), with delta = 1 / (1 + degree). Links are reliable, probabilistic (delivered with probability p) or delayed (every message arrives one send late), and every reception may be perturbed by Gaussian noise.

    A peer whose squared deviation from every received value falls below epsilon declares itself converged. It then stops updating, keeps advertising its value with the converged flag raised, and terminates once every neighbor has raised the flag too.
*/

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use simple_gossip::{
    common::config::ConsensusConfig,
    loader::load_network,
    report::CostModel,
    simulation::Simulation,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simple-gossip")]
#[command(about = "Distributed average consensus over a gossip network", long_about = None)]
struct Cli {
    /// Initial values, one per line
    #[arg(long)]
    values: PathBuf,

    /// Topology, one `u v kind` record per line
    #[arg(long)]
    topology: PathBuf,

    /// JSON config file, overridden by the flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Convergence tolerance on the squared deviation
    #[arg(long)]
    epsilon: Option<f64>,

    /// Delivery probability of probabilistic links
    #[arg(long)]
    availability: Option<f64>,

    #[arg(long)]
    noise_mean: Option<f64>,

    #[arg(long)]
    noise_std_dev: Option<f64>,

    /// Seed for reproducible noise and link draws
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    round_timeout_ms: Option<u64>,

    #[arg(long)]
    max_rounds: Option<u64>,

    /// Allow networks with unreachable peers
    #[arg(long)]
    allow_disconnected: bool,
}

impl Cli {
    fn consensus_config(&self) -> Result<ConsensusConfig> {
        let mut config = match &self.config {
            Some(path) => ConsensusConfig::from_json_file(path)?,
            None => ConsensusConfig::default(),
        };
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(availability) = self.availability {
            config.availability = availability;
        }
        if let Some(mean) = self.noise_mean {
            config.noise_mean = mean;
        }
        if let Some(std_dev) = self.noise_std_dev {
            config.noise_std_dev = std_dev;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(timeout) = self.round_timeout_ms {
            config.round_timeout_ms = timeout;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        if self.allow_disconnected {
            config.require_connected = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = cli.consensus_config()?;
    let (topology, values) = load_network(&cli.values, &cli.topology)
        .with_context(|| format!("loading {} and {}", cli.values.display(), cli.topology.display()))?;
    let simulation = Simulation::new(topology, &values, config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling peers");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = simulation.run_with_shutdown(shutdown_rx).await?;
    for peer in report.peers.iter().filter(|p| !p.is_converged()) {
        warn!(peer = %peer.id, outcome = ?peer.outcome, "peer did not converge");
    }

    println!("{report}");
    println!("Estimated cost     = {}", CostModel::default().estimate(&report));

    let unconverged = report.peers.iter().filter(|p| !p.is_converged()).count();
    if unconverged > 0 {
        anyhow::bail!("{unconverged} of {} peers did not converge", report.peer_count());
    }
    Ok(())
}
