/// Cost counters. Incremented by the engine and transport, interpreted only
/// by the reporting layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    /// Messages that reached a neighbor's mailbox.
    pub messages: u64,
    /// The part of `messages` sent by round broadcasts, as opposed to
    /// convergence adverts.
    pub broadcasts: u64,
    /// Additions and subtractions spent on averaging updates.
    pub additions: u64,
    pub divisions: u64,
    /// Completed Broadcasting/Aggregating rounds.
    pub rounds: u64,
}

impl Metrics {
    /// Folds another peer's counters into this one. Operation counts add up;
    /// rounds run concurrently, so the logical round count is the maximum.
    pub fn merge(&mut self, other: &Metrics) {
        self.messages += other.messages;
        self.broadcasts += other.broadcasts;
        self.additions += other.additions;
        self.divisions += other.divisions;
        self.rounds = self.rounds.max(other.rounds);
    }
}
