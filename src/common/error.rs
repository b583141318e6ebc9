use std::path::PathBuf;

use thiserror::Error;

use crate::network::PeerId;

/// Invalid tunables. Detected before any peer starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("availability must lie in [0, 1], got {0}")]
    InvalidAvailability(f64),

    #[error("convergence tolerance must be positive and finite, got {0}")]
    InvalidEpsilon(f64),

    /// Noise mean or standard deviation rejected by the distribution.
    #[error("invalid noise parameters: {0}")]
    InvalidNoise(String),

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Malformed network description.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("network has no peers")]
    EmptyNetwork,

    #[error("edge {index} references unknown peer {peer} (network has {peer_count} peers)")]
    UnknownPeer {
        index: usize,
        peer: u32,
        peer_count: u32,
    },

    #[error("edge {index} connects peer {peer} to itself")]
    SelfLoop { index: usize, peer: PeerId },

    #[error("edge {index} duplicates an existing link between {a} and {b}")]
    DuplicateEdge { index: usize, a: PeerId, b: PeerId },

    #[error("unknown edge kind code {0}, expected 0, 1 or 2")]
    InvalidEdgeKind(u8),

    #[error("initial value {value} of peer {peer} is not a finite number")]
    NonFiniteValue { peer: PeerId, value: f64 },

    #[error("expected {expected} initial values, got {actual}")]
    ValueCountMismatch { expected: usize, actual: usize },

    #[error("network is disconnected, unreachable peers: {unreachable:?}")]
    Disconnected { unreachable: Vec<PeerId> },
}

/// Failure while reading the values or topology files.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("peer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
