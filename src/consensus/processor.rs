use std::time::Duration;

use tokio::{
    sync::watch,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use super::{
    message::Message,
    metrics::Metrics,
    peers::{Neighborhood, RoundBuffer},
    termination::TerminationTracker,
};
use crate::{
    common::config::ConsensusConfig,
    network::{MailboxReceiver, Node, PeerId, Transport},
};

/*
    Each peer runs the same four-phase loop. In Broadcasting it sends its
    current value and converged flag over every incident link. In
    Aggregating it consumes its mailbox until enough distinct neighbors have
    been heard from, then applies the averaging step

        value <- value + delta * sum(r_i - value),   delta = 1 / (1 + degree)

    once, over the values buffered for that round, and tests convergence:
    every received value must lie within epsilon, in squared deviation, of
    the updated value. A converged peer freezes its value and enters
    TerminationWait, where it keeps advertising itself on a fixed tick and
    reads its mailbox only for neighbor flags. It is Done once every
    neighbor has advertised convergence.

    A round owed by no one (every link delayed or probabilistic) closes on
    the first arrival or after one tick, whichever comes first. A Done peer
    closes its mailbox, releases whatever its delayed links still hold and
    keeps advertising until every neighbor has closed its own mailbox, so the
    last flag survives lossy links.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Broadcasting,
    Aggregating,
    TerminationWait,
    Done,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundOutcome {
    Converged,
    Continue,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PeerOutcome {
    Converged,
    /// No progress within the round timeout, or every neighbor went away.
    Stalled {
        stage: Stage,
        round: u64,
        received: usize,
        expected: usize,
    },
    /// Round budget spent without converging.
    Exhausted {
        rounds: u64,
    },
    Cancelled {
        stage: Stage,
    },
}

#[derive(Clone, Debug)]
pub struct PeerReport {
    pub id: PeerId,
    pub initial_value: f64,
    pub final_value: f64,
    pub outcome: PeerOutcome,
    pub metrics: Metrics,
}

impl PeerReport {
    pub fn is_converged(&self) -> bool {
        self.outcome == PeerOutcome::Converged
    }
}

/// Transport-agnostic part of a peer: value, round bookkeeping and neighbor flags.
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub id: PeerId,
    pub value: f64,
    pub delta: f64,
    pub epsilon: f64,
    /// Completed rounds.
    pub round: u64,
    pub converged: bool,
    pub neighbors: Neighborhood,
    pub buffer: RoundBuffer,
    pub termination: TerminationTracker,
    pub metrics: Metrics,
}

impl ConsensusState {
    pub fn new(node: &Node, epsilon: f64) -> Self {
        let neighbors = Neighborhood::new(node.neighbors.clone());
        let mut metrics = Metrics::default();
        if neighbors.degree() > 0 {
            metrics.divisions += 1;
        }

        ConsensusState {
            id: node.id,
            value: node.initial_value,
            delta: neighbors.delta(),
            epsilon,
            round: 0,
            converged: false,
            termination: TerminationTracker::new(neighbors.ids()),
            neighbors,
            buffer: RoundBuffer::new(),
            metrics,
        }
    }

    pub fn expected(&self) -> usize {
        self.neighbors.expected_per_round()
    }

    /// Takes in one delivered message. The converged flag is always recorded;
    /// the value only counts while this peer is still averaging.
    pub fn absorb(&mut self, message: Message) {
        if !self.neighbors.is_member(&message.sender) {
            warn!(peer = %self.id, sender = %message.sender, "message from a non-neighbor dropped");
            return;
        }
        if self.termination.observe(message.sender, message.converged) {
            debug!(
                peer = %self.id,
                neighbor = %message.sender,
                converged = self.termination.converged_count(),
                of = self.neighbors.degree(),
                "neighbor converged"
            );
        }
        if !self.converged {
            self.buffer.record(message.sender, message.value);
        }
    }

    pub fn round_ready(&self) -> bool {
        match self.expected() {
            0 => !self.buffer.is_empty(),
            expected => self.buffer.len() >= expected,
        }
    }

    /// Applies the averaging step over this round's buffer, runs the
    /// convergence test and resets the buffer.
    pub fn complete_round(&mut self) -> RoundOutcome {
        let base = self.value;
        let mut drift = 0.0;
        for received in self.buffer.values() {
            drift += received - base;
            self.metrics.additions += 1;
        }
        self.value = base + self.delta * drift;
        self.round += 1;
        self.metrics.rounds += 1;

        let value = self.value;
        let epsilon = self.epsilon;
        // A round that heard nothing says nothing about convergence.
        let converged = !self.buffer.is_empty()
            && self
                .buffer
                .values()
                .all(|received| (received - value).powi(2) <= epsilon);
        self.buffer.clear();

        if converged {
            self.converged = true;
            RoundOutcome::Converged
        } else {
            RoundOutcome::Continue
        }
    }
}

pub struct ConsensusProcessor {
    pub stage: Stage,
    pub state: ConsensusState,
    pub initial_value: f64,
    pub transport: Transport,
    pub msg_rx: MailboxReceiver,
    pub round_timeout: Duration,
    pub tick: Duration,
    pub max_rounds: u64,
    pub shutdown: watch::Receiver<bool>,
}

impl ConsensusProcessor {
    pub fn new(
        node: &Node,
        config: &ConsensusConfig,
        transport: Transport,
        msg_rx: MailboxReceiver,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ConsensusProcessor {
            stage: Stage::Broadcasting,
            state: ConsensusState::new(node, config.epsilon),
            initial_value: node.initial_value,
            transport,
            msg_rx,
            round_timeout: config.round_timeout(),
            tick: config.termination_tick(),
            max_rounds: config.max_rounds,
            shutdown,
        }
    }

    pub async fn run(mut self) -> PeerReport {
        let id = self.state.id;
        info!(peer = %id, value = self.state.value, degree = self.state.neighbors.degree(), "starting consensus processor");

        if self.state.neighbors.degree() == 0 {
            self.state.converged = true;
            self.stage = Stage::Done;
        }

        let outcome = loop {
            if *self.shutdown.borrow() {
                break PeerOutcome::Cancelled { stage: self.stage };
            }
            let halted = match self.stage {
                Stage::Broadcasting => {
                    self.broadcast();
                    None
                }
                Stage::Aggregating => self.aggregate().await,
                Stage::TerminationWait => self.await_termination().await,
                Stage::Done => break PeerOutcome::Converged,
            };
            if let Some(outcome) = halted {
                break outcome;
            }
        };

        if outcome == PeerOutcome::Converged {
            self.linger().await;
        }

        match outcome {
            PeerOutcome::Converged => {
                info!(peer = %id, value = self.state.value, rounds = self.state.round, "consensus reached")
            }
            PeerOutcome::Stalled { stage, round, received, expected } => warn!(
                peer = %id,
                ?stage,
                round,
                received,
                expected,
                "did not converge"
            ),
            PeerOutcome::Exhausted { rounds } => {
                warn!(peer = %id, rounds, value = self.state.value, "round budget exhausted")
            }
            PeerOutcome::Cancelled { stage } => info!(peer = %id, ?stage, "cancelled"),
        }

        PeerReport {
            id,
            initial_value: self.initial_value,
            final_value: self.state.value,
            outcome,
            metrics: self.state.metrics,
        }
    }

    fn broadcast(&mut self) {
        let round = self.state.round + 1;
        let delivered = self.transport.broadcast(
            self.state.value,
            self.state.converged,
            round,
            &mut self.state.metrics,
        );
        self.state.metrics.broadcasts += delivered as u64;
        debug!(peer = %self.state.id, round, value = self.state.value, delivered, "broadcast");
        self.stage = Stage::Aggregating;
    }

    /// Waits for the round to fill up, then updates. Returns an outcome only
    /// when the processor has to stop early.
    async fn aggregate(&mut self) -> Option<PeerOutcome> {
        let owed = self.state.expected() > 0;
        let deadline = Instant::now() + if owed { self.round_timeout } else { self.tick };

        while !self.state.round_ready() {
            tokio::select! {
                message = self.msg_rx.recv() => match message {
                    Some(message) => self.state.absorb(message),
                    None => return Some(self.stalled()),
                },
                _ = time::sleep_until(deadline) => {
                    if owed {
                        return Some(self.stalled());
                    }
                    break;
                }
                _ = shutdown_requested(&mut self.shutdown) => {
                    return Some(PeerOutcome::Cancelled { stage: self.stage });
                }
            }
        }

        match self.state.complete_round() {
            RoundOutcome::Converged => {
                info!(peer = %self.state.id, round = self.state.round, value = self.state.value, "locally converged");
                self.stage = Stage::TerminationWait;
            }
            RoundOutcome::Continue => {
                debug!(peer = %self.state.id, round = self.state.round, value = self.state.value, "round complete");
                if self.state.round >= self.max_rounds {
                    return Some(PeerOutcome::Exhausted { rounds: self.state.round });
                }
                self.stage = Stage::Broadcasting;
            }
        }
        None
    }

    /// Advertises convergence every tick until all neighbors have done the same.
    /// Only messages showing a neighbor still at work, or newly converged,
    /// push the stall deadline back.
    async fn await_termination(&mut self) -> Option<PeerOutcome> {
        self.advertise();
        let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut deadline = Instant::now() + self.round_timeout;

        while !self.state.termination.all_converged() {
            tokio::select! {
                message = self.msg_rx.recv() => match message {
                    Some(message) => {
                        let progress = !message.converged
                            || !self.state.termination.has_converged(&message.sender);
                        self.state.absorb(message);
                        if progress {
                            deadline = Instant::now() + self.round_timeout;
                        }
                    }
                    None => return Some(self.stalled()),
                },
                _ = ticker.tick() => self.advertise(),
                _ = time::sleep_until(deadline) => return Some(self.stalled()),
                _ = shutdown_requested(&mut self.shutdown) => {
                    return Some(PeerOutcome::Cancelled { stage: self.stage });
                }
            }
        }

        self.stage = Stage::Done;
        None
    }

    /// Runs after Done. Closing the mailbox tells neighbors this peer needs
    /// nothing more; adverts continue until they have all said the same.
    async fn linger(&mut self) {
        self.msg_rx.close();
        self.transport.flush(&mut self.state.metrics);

        let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let deadline = Instant::now() + self.round_timeout;

        while !self.transport.all_closed() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.advertise();
                    self.transport.flush(&mut self.state.metrics);
                }
                _ = time::sleep_until(deadline) => {
                    debug!(peer = %self.state.id, "neighbors still open after linger window");
                    break;
                }
                _ = shutdown_requested(&mut self.shutdown) => break,
            }
        }
    }

    fn advertise(&mut self) {
        self.transport.broadcast(
            self.state.value,
            true,
            self.state.round,
            &mut self.state.metrics,
        );
    }

    fn stalled(&self) -> PeerOutcome {
        let (round, received) = match self.stage {
            Stage::Aggregating => (self.state.round + 1, self.state.buffer.len()),
            _ => (self.state.round, self.state.termination.converged_count()),
        };
        let expected = match self.stage {
            Stage::Aggregating => self.state.expected(),
            _ => self.state.neighbors.degree(),
        };
        PeerOutcome::Stalled {
            stage: self.stage,
            round,
            received,
            expected,
        }
    }
}

/// Resolves once the shutdown flag is raised. Never resolves if the signal
/// sender is gone without raising it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        common::noise::NoiseSource,
        network::{mailbox, EdgeKind, MailboxSender, Neighbor},
    };

    fn node(id: u32, value: f64, neighbors: &[(u32, EdgeKind)]) -> Node {
        Node {
            id: PeerId(id),
            initial_value: value,
            neighbors: neighbors
                .iter()
                .map(|&(id, kind)| Neighbor { id: PeerId(id), kind })
                .collect(),
        }
    }

    fn message(sender: u32, value: f64, converged: bool) -> Message {
        Message {
            sender: PeerId(sender),
            value,
            converged,
            round: 1,
        }
    }

    fn test_config() -> ConsensusConfig {
        ConsensusConfig {
            noise_std_dev: 0.0,
            epsilon: 1e-4,
            round_timeout_ms: 2_000,
            termination_tick_ms: 2,
            seed: Some(1),
            ..Default::default()
        }
    }

    fn processor(
        node: &Node,
        config: &ConsensusConfig,
        mailboxes: HashMap<PeerId, MailboxSender>,
        msg_rx: MailboxReceiver,
        shutdown: watch::Receiver<bool>,
    ) -> ConsensusProcessor {
        let noise = NoiseSource::new(config.noise_mean, config.noise_std_dev, config.peer_seed(node.id)).unwrap();
        let transport = Transport::new(node.id, &node.neighbors, mailboxes, noise, config.availability);
        ConsensusProcessor::new(node, config, transport, msg_rx, shutdown)
    }

    #[test]
    fn test_complete_round_is_convex_combination() {
        let node = node(1, 10.0, &[(2, EdgeKind::Reliable), (3, EdgeKind::Reliable), (4, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 1e-6);

        state.absorb(message(2, 2.0, false));
        state.absorb(message(3, 4.0, false));
        assert!(!state.round_ready());
        state.absorb(message(4, 0.0, false));
        assert!(state.round_ready());

        assert_eq!(state.complete_round(), RoundOutcome::Continue);

        // (10 + 2 + 4 + 0) / 4
        assert!((state.value - 4.0).abs() < 1e-12);
        assert!(state.value >= 0.0 && state.value <= 10.0);
        assert_eq!(state.round, 1);
        assert_eq!(state.metrics.additions, 3);
        assert_eq!(state.metrics.divisions, 1);
        assert!(state.buffer.is_empty());
    }

    #[test]
    fn test_update_ignores_arrival_order() {
        let node = node(1, 1.0, &[(2, EdgeKind::Reliable), (3, EdgeKind::Reliable)]);

        let mut forward = ConsensusState::new(&node, 1e-6);
        forward.absorb(message(2, 7.0, false));
        forward.absorb(message(3, -3.5, false));
        forward.complete_round();

        let mut backward = ConsensusState::new(&node, 1e-6);
        backward.absorb(message(3, -3.5, false));
        backward.absorb(message(2, 7.0, false));
        backward.complete_round();

        assert_eq!(forward.value, backward.value);
    }

    #[test]
    fn test_partial_round_stays_in_hull() {
        // One probabilistic link forgives one slot, so two of three suffice.
        let node = node(1, 0.0, &[(2, EdgeKind::Reliable), (3, EdgeKind::Probabilistic), (4, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 1e-6);

        state.absorb(message(2, 8.0, false));
        state.absorb(message(4, 8.0, false));
        assert!(state.round_ready());
        state.complete_round();

        assert!(state.value > 0.0 && state.value < 8.0);
    }

    #[test]
    fn test_convergence_compares_squared_deviation_with_epsilon() {
        let node = node(1, 0.0, &[(2, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 0.25);

        // updated value 0.45, deviation 0.45, squared 0.2025 <= 0.25
        state.absorb(message(2, 0.9, false));
        assert_eq!(state.complete_round(), RoundOutcome::Converged);
        assert!(state.converged);
    }

    #[test]
    fn test_not_converged_when_any_value_is_far() {
        let node = node(1, 0.0, &[(2, EdgeKind::Reliable), (3, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 0.01);

        state.absorb(message(2, 0.0, false));
        state.absorb(message(3, 3.0, false));

        assert_eq!(state.complete_round(), RoundOutcome::Continue);
        assert!(!state.converged);
    }

    #[test]
    fn test_converged_state_only_tracks_flags() {
        let node = node(1, 5.0, &[(2, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 0.01);
        state.converged = true;

        state.absorb(message(2, 100.0, true));

        assert!(state.buffer.is_empty());
        assert!(state.termination.all_converged());
        assert_eq!(state.value, 5.0);
    }

    #[test]
    fn test_absorb_ignores_non_neighbors() {
        let node = node(1, 5.0, &[(2, EdgeKind::Reliable)]);
        let mut state = ConsensusState::new(&node, 0.01);

        state.absorb(message(7, 100.0, true));

        assert!(state.buffer.is_empty());
        assert!(!state.termination.all_converged());
    }

    #[test]
    fn test_round_owed_by_no_one() {
        // A single delayed link: nothing is owed, the first arrival closes the round.
        let node = node(1, 2.0, &[(2, EdgeKind::Delayed)]);
        let mut state = ConsensusState::new(&node, 0.01);
        assert_eq!(state.expected(), 0);
        assert!(!state.round_ready());

        // Act: a round that heard nothing
        assert_eq!(state.complete_round(), RoundOutcome::Continue);
        assert_eq!(state.value, 2.0);
        assert!(!state.converged);
        assert_eq!(state.round, 1);

        // Act: a round that heard from the neighbor
        state.absorb(message(2, 2.0, false));
        assert!(state.round_ready());
        assert_eq!(state.complete_round(), RoundOutcome::Converged);
    }

    /// Plays peer 2 by hand: sends one converged message to peer 1, then
    /// returns every converged flag peer 1 sent until the first `true`.
    async fn flags_until_converged(
        tx1: MailboxSender,
        rx2: &mut MailboxReceiver,
    ) -> Vec<bool> {
        tx1.send(message(2, 1.0, true)).unwrap();
        let mut flags = Vec::new();
        while let Some(advert) = rx2.recv().await {
            flags.push(advert.converged);
            if advert.converged {
                break;
            }
        }
        flags
    }

    #[tokio::test]
    async fn test_last_flag_crosses_delayed_link() {
        // Arrange: peer 1 reaches peer 2 only over a delayed link
        let config = test_config();
        let node1 = node(1, 1.0, &[(2, EdgeKind::Delayed)]);
        let (tx1, rx1) = mailbox();
        let (tx2, mut rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx).run(),
        );

        // Act: peer 2 is already converged, so peer 1 converges last
        let flags = flags_until_converged(tx1, &mut rx2).await;
        drop(rx2);

        // Assert
        assert_eq!(flags.last(), Some(&true), "flags seen: {flags:?}");
        let report = handle.await.unwrap();
        assert_eq!(report.outcome, PeerOutcome::Converged);
        assert_eq!(report.final_value, 1.0);
        assert_eq!(report.metrics.rounds, 1);
    }

    #[tokio::test]
    async fn test_last_flag_crosses_probabilistic_link() {
        // Arrange: a link that drops most sends
        let config = ConsensusConfig { availability: 0.3, ..test_config() };
        let node1 = node(1, 1.0, &[(2, EdgeKind::Probabilistic)]);
        let (tx1, rx1) = mailbox();
        let (tx2, mut rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx).run(),
        );

        // Act
        let flags = flags_until_converged(tx1, &mut rx2).await;
        drop(rx2);

        // Assert: the flag gets through before peer 1 gives up on peer 2
        assert_eq!(flags.last(), Some(&true), "flags seen: {flags:?}");
        let report = handle.await.unwrap();
        assert_eq!(report.outcome, PeerOutcome::Converged);
        assert_eq!(report.final_value, 1.0);
    }

    #[tokio::test]
    async fn test_isolated_peer_is_done_immediately() {
        let config = test_config();
        let node = node(1, 3.5, &[]);
        let (_tx, rx) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let report = processor(&node, &config, HashMap::new(), rx, shutdown_rx).run().await;

        assert_eq!(report.outcome, PeerOutcome::Converged);
        assert_eq!(report.final_value, 3.5);
        assert_eq!(report.metrics, Metrics::default());
    }

    #[tokio::test]
    async fn test_two_peers_meet_in_the_middle() {
        // Arrange: two peers joined by a noiseless reliable link
        let config = test_config();
        let node1 = node(1, 0.0, &[(2, EdgeKind::Reliable)]);
        let node2 = node(2, 4.0, &[(1, EdgeKind::Reliable)]);
        let (tx1, rx1) = mailbox();
        let (tx2, rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor1 = processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx.clone());
        let processor2 = processor(&node2, &config, HashMap::from([(PeerId(1), tx1)]), rx2, shutdown_rx);

        // Act
        let handle1 = tokio::spawn(processor1.run());
        let handle2 = tokio::spawn(processor2.run());
        let report1 = handle1.await.unwrap();
        let report2 = handle2.await.unwrap();

        // Assert: one round averages both to exactly 2.0
        for report in [&report1, &report2] {
            assert_eq!(report.outcome, PeerOutcome::Converged);
            assert_eq!(report.final_value, 2.0);
        }
        assert_eq!(report1.metrics.rounds, 2);
        assert!(report1.metrics.messages >= 2);
    }

    #[tokio::test]
    async fn test_termination_waits_for_neighbor_flag() {
        // Arrange: the test plays peer 2 by hand
        let config = test_config();
        let node1 = node(1, 1.0, &[(2, EdgeKind::Reliable)]);
        let (tx1, rx1) = mailbox();
        let (tx2, mut rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx).run(),
        );

        // Act: round 1 broadcast from peer 1
        let first = rx2.recv().await.unwrap();
        assert_eq!(first.value, 1.0);
        assert!(!first.converged);

        // Act: agree with peer 1 so it converges locally
        tx1.send(message(2, 1.0, false)).unwrap();

        // Assert: peer 1 keeps advertising convergence while peer 2 has not
        let mut advertised = 0;
        while advertised < 3 {
            let advert = rx2.recv().await.unwrap();
            if advert.converged {
                assert_eq!(advert.value, 1.0);
                advertised += 1;
            }
        }
        assert!(!handle.is_finished());

        // Act: peer 2 converges too and is done listening
        drop(rx2);
        tx1.send(message(2, 1.0, true)).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.outcome, PeerOutcome::Converged);
        assert_eq!(report.final_value, 1.0);
        assert_eq!(report.metrics.rounds, 1);
    }

    #[tokio::test]
    async fn test_silent_neighbor_stalls_round() {
        let config = ConsensusConfig { round_timeout_ms: 50, ..test_config() };
        let node1 = node(1, 1.0, &[(2, EdgeKind::Reliable)]);
        let (_tx1, rx1) = mailbox();
        let (tx2, _rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let report = processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx)
            .run()
            .await;

        assert_eq!(
            report.outcome,
            PeerOutcome::Stalled {
                stage: Stage::Aggregating,
                round: 1,
                received: 0,
                expected: 1,
            }
        );
        assert!(!report.is_converged());
        assert_eq!(report.final_value, 1.0);
    }

    #[tokio::test]
    async fn test_round_budget_is_enforced() {
        // Noise this large never settles under a tiny tolerance.
        let config = ConsensusConfig {
            noise_std_dev: 1.0,
            epsilon: 1e-12,
            max_rounds: 5,
            ..test_config()
        };
        let node1 = node(1, 0.0, &[(2, EdgeKind::Reliable)]);
        let node2 = node(2, 4.0, &[(1, EdgeKind::Reliable)]);
        let (tx1, rx1) = mailbox();
        let (tx2, rx2) = mailbox();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle1 = tokio::spawn(
            processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx.clone()).run(),
        );
        let handle2 = tokio::spawn(
            processor(&node2, &config, HashMap::from([(PeerId(1), tx1)]), rx2, shutdown_rx).run(),
        );

        for report in [handle1.await.unwrap(), handle2.await.unwrap()] {
            assert_eq!(report.outcome, PeerOutcome::Exhausted { rounds: 5 });
            assert_eq!(report.metrics.rounds, 5);
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiting_peer() {
        let config = ConsensusConfig { round_timeout_ms: 60_000, ..test_config() };
        let node1 = node(1, 1.0, &[(2, EdgeKind::Reliable)]);
        let (_tx1, rx1) = mailbox();
        let (tx2, mut rx2) = mailbox();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(
            processor(&node1, &config, HashMap::from([(PeerId(2), tx2)]), rx1, shutdown_rx).run(),
        );
        rx2.recv().await.unwrap();
        shutdown_tx.send(true).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.outcome, PeerOutcome::Cancelled { stage: Stage::Aggregating });
    }
}
