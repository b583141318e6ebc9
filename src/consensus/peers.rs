use std::collections::BTreeMap;

use crate::network::{EdgeKind, Neighbor, PeerId};

#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub members: Vec<Neighbor>,
}

impl Neighborhood {
    pub fn new(members: Vec<Neighbor>) -> Self {
        Neighborhood { members }
    }

    pub fn degree(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, id: &PeerId) -> bool {
        self.members.iter().any(|n| &n.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.members.iter().map(|n| n.id)
    }

    fn has_kind(&self, kind: EdgeKind) -> bool {
        self.members.iter().any(|n| n.kind == kind)
    }

    /// Step size of the averaging update, `1 / (1 + degree)`.
    pub fn delta(&self) -> f64 {
        1.0 / (1.0 + self.degree() as f64)
    }

    /// Distinct neighbors that must be heard from before a round completes.
    /// A delayed link and a probabilistic link may each withhold delivery, so
    /// one slot is forgiven for each kind present. Zero means the round takes
    /// whatever arrives.
    pub fn expected_per_round(&self) -> usize {
        let forgiven = usize::from(self.has_kind(EdgeKind::Delayed))
            + usize::from(self.has_kind(EdgeKind::Probabilistic));
        self.degree().saturating_sub(forgiven)
    }
}

/// Latest value received from each neighbor during the current round.
#[derive(Debug, Default, Clone)]
pub struct RoundBuffer {
    values: BTreeMap<PeerId, f64>,
}

impl RoundBuffer {
    pub fn new() -> Self {
        RoundBuffer::default()
    }

    /// Later messages from the same sender overwrite earlier ones.
    pub fn record(&mut self, sender: PeerId, value: f64) {
        self.values.insert(sender, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.values().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
