pub mod message;
pub mod metrics;
pub mod peers;
pub mod processor;
pub mod termination;

pub use message::*;
pub use metrics::*;
pub use peers::*;
pub use processor::*;
pub use termination::*;
