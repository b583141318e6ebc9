use super::{Neighbor, PeerId};

/// Setup record for one peer: who it is, what it starts with, who it talks to.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: PeerId,
    pub initial_value: f64,
    pub neighbors: Vec<Neighbor>,
}

impl Node {
    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }
}
