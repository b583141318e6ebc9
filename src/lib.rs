pub mod common;
pub mod consensus;
pub mod loader;
pub mod network;
pub mod report;
pub mod simulation;
