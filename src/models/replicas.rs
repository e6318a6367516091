use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Replication parameters of a single request: wait for `ack` answers out of
/// `from` replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicas {
    pub ack: usize,
    pub from: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplicasError {
    #[error("expected `ack/from`, got {0:?}")]
    Format(String),

    #[error("ack must be at least 1")]
    ZeroAck,

    #[error("ack {ack} exceeds from {from}")]
    AckExceedsFrom { ack: usize, from: usize },

    #[error("from {from} exceeds cluster size {nodes}")]
    FromExceedsCluster { from: usize, nodes: usize },
}

impl Replicas {
    /// Majority of the whole cluster.
    pub fn quorum(nodes: usize) -> Self {
        let ack = (nodes / 2 + 1).min(nodes);
        Self { ack, from: nodes }
    }

    /// Parse the `replicas` query parameter, falling back to [`Replicas::quorum`]
    /// when it is absent or empty.
    pub fn parse(param: Option<&str>, nodes: usize) -> Result<Self, ReplicasError> {
        let replicas = match param.map(str::trim) {
            None | Some("") => return Ok(Self::quorum(nodes)),
            Some(raw) => raw.parse::<Replicas>()?,
        };

        if replicas.from > nodes {
            return Err(ReplicasError::FromExceedsCluster {
                from: replicas.from,
                nodes,
            });
        }
        Ok(replicas)
    }
}

impl FromStr for Replicas {
    type Err = ReplicasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || ReplicasError::Format(s.to_string());

        let (ack, from) = s.split_once('/').ok_or_else(format_err)?;
        let ack: usize = ack.trim().parse().map_err(|_| format_err())?;
        let from: usize = from.trim().parse().map_err(|_| format_err())?;

        if ack == 0 {
            return Err(ReplicasError::ZeroAck);
        }
        if ack > from {
            return Err(ReplicasError::AckExceedsFrom { ack, from });
        }
        Ok(Self { ack, from })
    }
}

impl fmt::Display for Replicas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ack, self.from)
    }
}
