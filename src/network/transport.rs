use std::collections::HashMap;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use super::{EdgeKind, Neighbor, PeerId};
use crate::{
    common::noise::NoiseSource,
    consensus::{message::Message, metrics::Metrics},
};

pub type MailboxSender = UnboundedSender<Message>;
pub type MailboxReceiver = UnboundedReceiver<Message>;

/// Inbound queue of a single peer. FIFO per sender.
pub fn mailbox() -> (MailboxSender, MailboxReceiver) {
    unbounded_channel()
}

/// Sender side of one edge.
#[derive(Debug)]
pub struct Link {
    pub neighbor: PeerId,
    pub kind: EdgeKind,
    staged: Option<Message>,
}

impl Link {
    pub fn new(neighbor: Neighbor) -> Self {
        Link {
            neighbor: neighbor.id,
            kind: neighbor.kind,
            staged: None,
        }
    }

    /// Applies the edge semantics to an outgoing message and returns what, if
    /// anything, goes on the wire now.
    pub fn dispatch(
        &mut self,
        message: Message,
        noise: &mut NoiseSource,
        availability: f64,
    ) -> Option<Message> {
        match self.kind {
            EdgeKind::Reliable => Some(observe(message, noise)),
            EdgeKind::Probabilistic => {
                if noise.draw() >= 1.0 - availability {
                    Some(observe(message, noise))
                } else {
                    None
                }
            }
            EdgeKind::Delayed => self.staged.replace(observe(message, noise)),
        }
    }

    /// Releases a message held back by a delayed link, if any.
    pub fn flush(&mut self) -> Option<Message> {
        self.staged.take()
    }
}

fn observe(message: Message, noise: &mut NoiseSource) -> Message {
    Message {
        value: noise.perturb(message.value),
        ..message
    }
}

/// Outbound side of a peer: one link per neighbor plus the neighbors' mailboxes.
pub struct Transport {
    pub id: PeerId,
    links: Vec<Link>,
    mailboxes: HashMap<PeerId, MailboxSender>,
    noise: NoiseSource,
    availability: f64,
}

impl Transport {
    pub fn new(
        id: PeerId,
        neighbors: &[Neighbor],
        mailboxes: HashMap<PeerId, MailboxSender>,
        noise: NoiseSource,
        availability: f64,
    ) -> Self {
        Transport {
            id,
            links: neighbors.iter().copied().map(Link::new).collect(),
            mailboxes,
            noise,
            availability,
        }
    }

    /// Sends `value` and the converged flag over every link. Returns the number
    /// of messages that reached a mailbox.
    pub fn broadcast(&mut self, value: f64, converged: bool, round: u64, metrics: &mut Metrics) -> usize {
        let mut delivered = 0;
        for link in &mut self.links {
            let message = Message {
                sender: self.id,
                value,
                converged,
                round,
            };
            let Some(outgoing) = link.dispatch(message, &mut self.noise, self.availability) else {
                trace!(from = %self.id, to = %link.neighbor, kind = ?link.kind, "nothing transmitted");
                continue;
            };
            if deliver(&self.mailboxes, link.neighbor, outgoing, metrics) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Pushes out every message still held back by a delayed link.
    pub fn flush(&mut self, metrics: &mut Metrics) -> usize {
        let mut delivered = 0;
        for link in &mut self.links {
            if let Some(outgoing) = link.flush() {
                if deliver(&self.mailboxes, link.neighbor, outgoing, metrics) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// True once every neighbor has closed its mailbox.
    pub fn all_closed(&self) -> bool {
        self.mailboxes.values().all(|tx| tx.is_closed())
    }
}

fn deliver(
    mailboxes: &HashMap<PeerId, MailboxSender>,
    to: PeerId,
    message: Message,
    metrics: &mut Metrics,
) -> bool {
    match mailboxes.get(&to) {
        // A closed mailbox means the neighbor already finished.
        Some(tx) if tx.send(message).is_ok() => {
            metrics.messages += 1;
            trace!(from = %message.sender, to = %to, value = message.value, "delivered");
            true
        }
        _ => {
            trace!(from = %message.sender, to = %to, "mailbox closed");
            false
        }
    }
}
