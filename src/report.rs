use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consensus::{Metrics, PeerOutcome, PeerReport};

/// Outcome of a whole run: every peer's report plus the merged counters.
#[derive(Clone, Debug)]
pub struct SimulationReport {
    /// Sorted by peer id.
    pub peers: Vec<PeerReport>,
    pub metrics: Metrics,
}

impl SimulationReport {
    pub fn new(mut peers: Vec<PeerReport>) -> Self {
        peers.sort_by_key(|p| p.id);
        let mut metrics = Metrics::default();
        for peer in &peers {
            metrics.merge(&peer.metrics);
        }
        SimulationReport { peers, metrics }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn all_converged(&self) -> bool {
        self.peers.iter().all(PeerReport::is_converged)
    }

    pub fn stalled(&self) -> impl Iterator<Item = &PeerReport> {
        self.peers
            .iter()
            .filter(|p| matches!(p.outcome, PeerOutcome::Stalled { .. }))
    }

    /// Arithmetic mean of the initial values.
    pub fn true_mean(&self) -> f64 {
        if self.peers.is_empty() {
            return 0.0;
        }
        self.peers.iter().map(|p| p.initial_value).sum::<f64>() / self.peers.len() as f64
    }

    /// The estimate held by the lowest-numbered peer.
    pub fn approximate_mean(&self) -> Option<f64> {
        self.peers.first().map(|p| p.final_value)
    }

    /// Smallest final value across peers.
    pub fn min_value(&self) -> Option<f64> {
        self.peers.iter().map(|p| p.final_value).reduce(f64::min)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.peers.iter().map(|p| p.final_value).reduce(f64::max)
    }

    /// Distance between the true mean and the approximate one.
    pub fn residual(&self) -> Option<f64> {
        self.approximate_mean().map(|approx| (self.true_mean() - approx).abs())
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "True mean          = {}", self.true_mean())?;
        if let Some(approx) = self.approximate_mean() {
            writeln!(f, "Computed mean      = {approx}")?;
        }
        if let Some(residual) = self.residual() {
            writeln!(f, "Residual           = {residual}")?;
        }
        if let (Some(min), Some(max)) = (self.min_value(), self.max_value()) {
            writeln!(f, "Final value range  = [{min}, {max}]")?;
        }
        writeln!(f, "Peer messages      = {}", self.metrics.messages)?;
        writeln!(f, "  of which rounds  = {}", self.metrics.broadcasts)?;
        writeln!(f, "Messages to center = 0")?;
        writeln!(f, "Additions          = {}", self.metrics.additions)?;
        writeln!(f, "Divisions          = {}", self.metrics.divisions)?;
        write!(f, "Rounds             = {}", self.metrics.rounds)
    }
}

/// Unit costs of the closed-form run estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Per agent, plus one for the launcher.
    pub c_m: f64,
    /// Per peer-to-peer message.
    pub c_l: f64,
    /// Per message to a central node. Gossip never sends any.
    pub c_g: f64,
    pub c_s: f64,
    pub c_d: f64,
    /// Per round.
    pub c_t: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            c_m: 1.0,
            c_l: 0.01,
            c_g: 1000.0,
            c_s: 0.001,
            c_d: 0.005,
            c_t: 1.0,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, report: &SimulationReport) -> f64 {
        let metrics = &report.metrics;
        (report.peer_count() as f64 + 1.0) * self.c_m
            + metrics.messages as f64 * self.c_l
            + 0.0 * self.c_g
            + metrics.additions as f64 * self.c_s
            + metrics.divisions as f64 * self.c_d
            + metrics.rounds as f64 * self.c_t
    }
}
