use std::collections::BTreeMap;

use crate::network::PeerId;

/*
    Termination detection. Every message carries its sender's converged
    flag and a peer remembers the latest flag seen from each neighbor.
    Flags only move from false to true. A converged peer stops once every
    neighbor flag is true; since it keeps broadcasting until then, and its
    neighbors do the same, the condition spreads along edges and no peer of
    a connected network stops while a neighbor still needs its messages.
*/

#[derive(Debug, Clone)]
pub struct TerminationTracker {
    flags: BTreeMap<PeerId, bool>,
}

impl TerminationTracker {
    pub fn new(neighbors: impl IntoIterator<Item = PeerId>) -> Self {
        TerminationTracker {
            flags: neighbors.into_iter().map(|id| (id, false)).collect(),
        }
    }

    /// Records a neighbor's advertised flag. Returns true if this observation
    /// flipped the neighbor to converged.
    pub fn observe(&mut self, sender: PeerId, converged: bool) -> bool {
        match self.flags.get_mut(&sender) {
            Some(flag) if !*flag && converged => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    pub fn has_converged(&self, id: &PeerId) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    pub fn converged_count(&self) -> usize {
        self.flags.values().filter(|&&flag| flag).count()
    }

    /// True when every neighbor has advertised convergence. Vacuously true for
    /// a peer without neighbors.
    pub fn all_converged(&self) -> bool {
        self.flags.values().all(|&flag| flag)
    }
}
