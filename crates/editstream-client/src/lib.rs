//! Consumer side of the edit event stream: fold frames into a progress log
//! and resolve the operation's single outcome.

pub mod aggregator;
pub mod client;
pub mod error;

pub use aggregator::{AILogEntry, AIProgressState, ProgressAggregator};
pub use client::{consume, EditClient};
pub use error::ClientError;
