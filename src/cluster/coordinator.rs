use std::future::Future;
use std::sync::Arc;

use reqwest::Url;
use tokio::task::JoinSet;

use super::client::{ClientError, NodeClient};
use super::topology::Topology;
use crate::config::ClusterConfig;
use crate::db::Database;
use crate::models::{now_micros, Record, Replicas};

/// Result of a quorum read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(Vec<u8>),
    NotFound,
    NotEnoughReplicas { answered: usize, required: usize },
}

/// Result of a quorum write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Acknowledged(usize),
    NotEnoughReplicas { answered: usize, required: usize },
}

impl WriteOutcome {
    fn from_acks(answered: usize, required: usize) -> Self {
        if answered >= required {
            Self::Acknowledged(answered)
        } else {
            Self::NotEnoughReplicas { answered, required }
        }
    }
}

/// Pick the answer of a quorum read from the replicas that responded.
///
/// `None` entries are replicas that answered but have never seen the key.
/// The newest record wins; a tombstone hides older values.
pub fn resolve_read(replies: &[Option<Record>], ack: usize) -> ReadOutcome {
    if replies.len() < ack {
        return ReadOutcome::NotEnoughReplicas {
            answered: replies.len(),
            required: ack,
        };
    }

    let newest = replies
        .iter()
        .flatten()
        .fold(None::<&Record>, |best, r| match best {
            Some(b) if !r.supersedes(b) => Some(b),
            _ => Some(r),
        });

    match newest.cloned().and_then(Record::into_value) {
        Some(value) => ReadOutcome::Found(value),
        None => ReadOutcome::NotFound,
    }
}

/// Sends client requests to the replicas owning a key and counts answers.
#[derive(Clone)]
pub struct Coordinator {
    db: Database,
    topology: Arc<Topology>,
    /// One slot per topology node; `None` for the local node.
    clients: Arc<Vec<Option<NodeClient>>>,
}

impl Coordinator {
    pub fn new(
        db: Database,
        topology: Topology,
        config: &ClusterConfig,
    ) -> Result<Self, ClientError> {
        let clients = topology
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, url)| {
                if topology.is_local(i) {
                    Ok(None)
                } else {
                    NodeClient::new(url.clone(), config.replica_timeout).map(Some)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            db,
            topology: Arc::new(topology),
            clients: Arc::new(clients),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cluster_size(&self) -> usize {
        self.topology.len()
    }

    pub async fn get(&self, id: &str, replicas: Replicas) -> ReadOutcome {
        let db = self.db.clone();
        let key = id.as_bytes().to_vec();
        let replies = self
            .fan_out(
                id,
                replicas,
                move || db.get_record(&key).map_err(|e| e.to_string()),
                |client, id| async move { client.get(&id).await },
            )
            .await;

        let outcome = resolve_read(&replies, replicas.ack);
        tracing::debug!(id, %replicas, ?outcome, "Quorum read finished");
        outcome
    }

    pub async fn put(&self, id: &str, value: Vec<u8>, replicas: Replicas) -> WriteOutcome {
        self.write(id, Record::live(value, now_micros()), replicas)
            .await
    }

    pub async fn delete(&self, id: &str, replicas: Replicas) -> WriteOutcome {
        self.write(id, Record::tombstone(now_micros()), replicas)
            .await
    }

    async fn write(&self, id: &str, record: Record, replicas: Replicas) -> WriteOutcome {
        let db = self.db.clone();
        let key = id.as_bytes().to_vec();
        let local_record = record.clone();
        let record = Arc::new(record);

        let acks = self
            .fan_out(
                id,
                replicas,
                move || {
                    db.upsert_record(&key, &local_record)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                },
                move |client, id| {
                    let record = record.clone();
                    async move { client.send(&id, &record).await }
                },
            )
            .await
            .len();

        let outcome = WriteOutcome::from_acks(acks, replicas.ack);
        tracing::debug!(id, %replicas, ?outcome, "Quorum write finished");
        outcome
    }

    /// Run `local` against the own store and `remote` against every other
    /// replica of `id`, concurrently. Returns the successful answers; failed
    /// replicas are logged and left out.
    async fn fan_out<T, L, R, F>(&self, id: &str, replicas: Replicas, local: L, remote: R) -> Vec<T>
    where
        T: Send + 'static,
        L: FnOnce() -> Result<T, String>,
        R: Fn(NodeClient, String) -> F,
        F: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let targets = self.topology.replicas_for(id.as_bytes(), replicas.from);
        let mut answers = Vec::with_capacity(targets.len());
        let mut pending: JoinSet<(Url, Result<T, ClientError>)> = JoinSet::new();
        let mut local = Some(local);

        for index in targets {
            match &self.clients[index] {
                None => {
                    let Some(run) = local.take() else { continue };
                    tracing::debug!(id, "Applying to local store");
                    match run() {
                        Ok(answer) => answers.push(answer),
                        Err(e) => tracing::warn!(id, "Local replica failed: {}", e),
                    }
                }
                Some(client) => {
                    let url = client.base_url().clone();
                    tracing::debug!(id, node = %url, "Sending to replica");
                    let call = remote(client.clone(), id.to_string());
                    pending.spawn(async move { (url, call.await) });
                }
            }
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(answer))) => answers.push(answer),
                Ok((url, Err(e))) => tracing::warn!(id, node = %url, "Replica failed: {}", e),
                Err(e) => tracing::error!(id, "Replica task panicked: {}", e),
            }
        }

        answers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn live(value: &str, offset_ms: i64) -> Option<Record> {
        Some(Record::live(
            value.as_bytes().to_vec(),
            base() + Duration::milliseconds(offset_ms),
        ))
    }

    fn tombstone(offset_ms: i64) -> Option<Record> {
        Some(Record::tombstone(base() + Duration::milliseconds(offset_ms)))
    }

    fn base() -> chrono::DateTime<chrono::Utc> {
        crate::models::from_micros(1_700_000_000_000_000).unwrap()
    }

    #[test]
    fn too_few_replies_fail() {
        let outcome = resolve_read(&[live("a", 0)], 2);
        assert_eq!(
            outcome,
            ReadOutcome::NotEnoughReplicas {
                answered: 1,
                required: 2
            }
        );
    }

    #[test]
    fn newest_value_wins() {
        let outcome = resolve_read(&[live("old", 0), live("new", 5), None], 2);
        assert_eq!(outcome, ReadOutcome::Found(b"new".to_vec()));
    }

    #[test]
    fn value_found_on_one_replica_is_returned() {
        let outcome = resolve_read(&[None, live("v", 0)], 2);
        assert_eq!(outcome, ReadOutcome::Found(b"v".to_vec()));
    }

    #[test]
    fn newer_tombstone_hides_value() {
        let outcome = resolve_read(&[live("v", 0), tombstone(1)], 2);
        assert_eq!(outcome, ReadOutcome::NotFound);
    }

    #[test]
    fn newer_value_after_delete_is_visible() {
        let outcome = resolve_read(&[tombstone(0), live("again", 1)], 2);
        assert_eq!(outcome, ReadOutcome::Found(b"again".to_vec()));
    }

    #[test]
    fn all_missing_is_not_found() {
        assert_eq!(resolve_read(&[None, None], 2), ReadOutcome::NotFound);
    }

    #[test]
    fn write_needs_ack_answers() {
        assert_eq!(WriteOutcome::from_acks(2, 2), WriteOutcome::Acknowledged(2));
        assert_eq!(
            WriteOutcome::from_acks(1, 2),
            WriteOutcome::NotEnoughReplicas {
                answered: 1,
                required: 2
            }
        );
    }
}
