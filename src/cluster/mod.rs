//! Replication across the nodes of a static cluster.
//!
//! A client request may land on any node. That node becomes the coordinator:
//! it picks the replicas of the key from the [`Topology`], forwards the
//! operation to them through [`NodeClient`], and answers once `ack` of them
//! have responded.

mod client;
mod coordinator;
mod topology;

pub use client::*;
pub use coordinator::*;
pub use topology::*;
