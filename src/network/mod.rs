pub mod node;
pub mod transport;

pub use node::*;
pub use transport::*;

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
};

use crate::common::error::TopologyError;

/*
    Links are undirected and come in three reliability classes. A reliable
    link delivers every message, perturbed by additive zero-mean noise. A
    probabilistic link delivers each message independently with probability
    p and silently drops it otherwise. A delayed link holds every message
    back by exactly one send: the first send over it transmits nothing.
    Communication is point-to-point and FIFO per ordered pair of peers; there
    is no ordering across different senders.
*/

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EdgeKind {
    Reliable,
    Probabilistic,
    Delayed,
}

impl TryFrom<u8> for EdgeKind {
    type Error = TopologyError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(EdgeKind::Reliable),
            1 => Ok(EdgeKind::Probabilistic),
            2 => Ok(EdgeKind::Delayed),
            other => Err(TopologyError::InvalidEdgeKind(other)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Edge {
    pub a: PeerId,
    pub b: PeerId,
    pub kind: EdgeKind,
}

/// One endpoint's view of an incident edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Neighbor {
    pub id: PeerId,
    pub kind: EdgeKind,
}

/// Immutable undirected graph over peers `1..=peer_count`.
#[derive(Clone, Debug)]
pub struct Topology {
    peer_count: u32,
    adjacency: BTreeMap<PeerId, Vec<Neighbor>>,
    edges: Vec<Edge>,
}

impl Topology {
    pub fn new(peer_count: u32, edges: Vec<Edge>) -> Result<Self, TopologyError> {
        if peer_count == 0 {
            return Err(TopologyError::EmptyNetwork);
        }

        let mut adjacency: BTreeMap<PeerId, Vec<Neighbor>> =
            (1..=peer_count).map(|id| (PeerId(id), Vec::new())).collect();
        let mut seen = BTreeSet::new();

        for (index, edge) in edges.iter().enumerate() {
            for peer in [edge.a, edge.b] {
                if peer.0 == 0 || peer.0 > peer_count {
                    return Err(TopologyError::UnknownPeer {
                        index,
                        peer: peer.0,
                        peer_count,
                    });
                }
            }
            if edge.a == edge.b {
                return Err(TopologyError::SelfLoop { index, peer: edge.a });
            }
            let pair = (edge.a.min(edge.b), edge.a.max(edge.b));
            if !seen.insert(pair) {
                return Err(TopologyError::DuplicateEdge {
                    index,
                    a: pair.0,
                    b: pair.1,
                });
            }

            if let Some(list) = adjacency.get_mut(&edge.a) {
                list.push(Neighbor { id: edge.b, kind: edge.kind });
            }
            if let Some(list) = adjacency.get_mut(&edge.b) {
                list.push(Neighbor { id: edge.a, kind: edge.kind });
            }
        }

        Ok(Topology {
            peer_count,
            adjacency,
            edges,
        })
    }

    /// Builds a topology from raw `(u, v, kind)` records.
    pub fn from_records(peer_count: u32, records: &[(u32, u32, u8)]) -> Result<Self, TopologyError> {
        let edges = records
            .iter()
            .map(|&(a, b, kind)| {
                Ok(Edge {
                    a: PeerId(a),
                    b: PeerId(b),
                    kind: EdgeKind::try_from(kind)?,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;
        Topology::new(peer_count, edges)
    }

    pub fn peer_count(&self) -> u32 {
        self.peer_count
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn neighbors(&self, id: PeerId) -> &[Neighbor] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Peers not reachable from peer 1.
    pub fn unreachable(&self) -> Vec<PeerId> {
        let start = PeerId(1);
        let mut visited = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            for neighbor in self.neighbors(id) {
                if visited.insert(neighbor.id) {
                    queue.push_back(neighbor.id);
                }
            }
        }

        self.peers().filter(|id| !visited.contains(id)).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.unreachable().is_empty()
    }

    pub fn ensure_connected(&self) -> Result<(), TopologyError> {
        let unreachable = self.unreachable();
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Disconnected { unreachable })
        }
    }

    /// Pairs each peer with its initial value. `values[i]` belongs to peer `i + 1`.
    pub fn nodes(&self, values: &[f64]) -> Result<Vec<Node>, TopologyError> {
        if values.len() != self.peer_count as usize {
            return Err(TopologyError::ValueCountMismatch {
                expected: self.peer_count as usize,
                actual: values.len(),
            });
        }

        if let Some((id, &value)) = self.peers().zip(values).find(|(_, v)| !v.is_finite()) {
            return Err(TopologyError::NonFiniteValue { peer: id, value });
        }

        Ok(self
            .peers()
            .zip(values)
            .map(|(id, &initial_value)| Node {
                id,
                initial_value,
                neighbors: self.neighbors(id).to_vec(),
            })
            .collect())
    }
}
