//! Replicated key-value storage node.
//!
//! Several nodes form a static cluster. Any node accepts `GET`, `PUT` and
//! `DELETE` on `/v0/entity?id=<key>&replicas=<ack>/<from>` and coordinates the
//! request across the replicas owning the key.

pub mod api;
pub mod cluster;
pub mod config;
pub mod db;
pub mod models;
pub mod server;
