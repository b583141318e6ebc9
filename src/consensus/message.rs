use crate::network::PeerId;

/*
    A message m carries the sender's observation of its own value, already
    perturbed by channel noise, together with the sender's converged flag.
    The flag is piggybacked on every message in every phase; it is the only
    input the termination protocol has. m.round is the sender's round number
    when the message was produced, which for a delayed link is one round
    before the message is actually transmitted.
*/

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Message {
    pub sender: PeerId,
    pub value: f64,
    pub converged: bool,
    pub round: u64,
}
