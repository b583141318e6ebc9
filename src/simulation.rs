use std::collections::HashMap;

use tokio::sync::watch;
use tracing::info;

use crate::{
    common::{config::ConsensusConfig, error::SimulationError, noise::NoiseSource},
    consensus::ConsensusProcessor,
    network::{mailbox, Node, Topology, Transport},
    report::SimulationReport,
};

/// One run of the averaging protocol over a fixed network.
pub struct Simulation {
    topology: Topology,
    nodes: Vec<Node>,
    config: ConsensusConfig,
}

impl Simulation {
    /// Validates the whole setup. Nothing is spawned if this fails.
    pub fn new(topology: Topology, values: &[f64], config: ConsensusConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        if config.require_connected {
            topology.ensure_connected()?;
        }
        let nodes = topology.nodes(values)?;

        Ok(Simulation {
            topology,
            nodes,
            config,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub async fn run(self) -> Result<SimulationReport, SimulationError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let report = self.run_with_shutdown(shutdown_rx).await;
        drop(shutdown_tx);
        report
    }

    /// Runs every peer as its own task. Raising the shutdown flag cancels all
    /// of them; the report then lists them as cancelled.
    pub async fn run_with_shutdown(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SimulationReport, SimulationError> {
        info!(
            peers = self.topology.peer_count(),
            edges = self.topology.edges().len(),
            epsilon = self.config.epsilon,
            availability = self.config.availability,
            "starting simulation"
        );

        let mut senders = HashMap::new();
        let mut receivers = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let (tx, rx) = mailbox();
            senders.insert(node.id, tx);
            receivers.push(rx);
        }

        let mut handles = Vec::with_capacity(self.nodes.len());
        for (node, msg_rx) in self.nodes.iter().zip(receivers) {
            let mailboxes = node
                .neighbors
                .iter()
                .filter_map(|n| senders.get(&n.id).map(|tx| (n.id, tx.clone())))
                .collect();
            let noise = NoiseSource::new(
                self.config.noise_mean,
                self.config.noise_std_dev,
                self.config.peer_seed(node.id),
            )?;
            let transport = Transport::new(node.id, &node.neighbors, mailboxes, noise, self.config.availability);
            let processor = ConsensusProcessor::new(node, &self.config, transport, msg_rx, shutdown.clone());
            handles.push(tokio::spawn(processor.run()));
        }
        // Only neighbors may hold a peer's mailbox, so it closes once they are all gone.
        drop(senders);

        let mut peers = Vec::with_capacity(handles.len());
        for handle in handles {
            peers.push(handle.await?);
        }

        let report = SimulationReport::new(peers);
        info!(
            converged = report.all_converged(),
            messages = report.metrics.messages,
            rounds = report.metrics.rounds,
            "simulation finished"
        );
        Ok(report)
    }
}
