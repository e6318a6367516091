//! Domain models for kv-cluster.
//!
//! # Core Concepts
//!
//! - [`Record`]: What a node keeps per key. Either a live value or a tombstone,
//!   stamped with the time the coordinating node accepted the write.
//! - [`Replicas`]: How many replicas a request is sent to (`from`) and how many
//!   must answer (`ack`) before the coordinator replies to the client.

mod record;
mod replicas;

pub use record::*;
pub use replicas::*;
