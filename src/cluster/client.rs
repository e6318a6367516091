//! HTTP client for talking to other nodes of the cluster.
//!
//! Every request carries [`REPLICA_HEADER`] so the receiving node applies it
//! to its own store and never fans it out again.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use thiserror::Error;

use crate::models::{from_micros, to_micros, Record};

/// Marks a node-to-node request.
pub const REPLICA_HEADER: &str = "x-replica-request";
/// Record timestamp in unix microseconds.
pub const TIMESTAMP_HEADER: &str = "x-record-timestamp";
/// Present on a 404 when the key holds a tombstone.
pub const DELETED_HEADER: &str = "x-record-deleted";

pub const ENTITY_PATH: &str = "/v0/entity";
pub const STATUS_PATH: &str = "/v0/status";

/// Node client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid url: {0}")]
    Url(String),

    #[error("Unexpected status {0}")]
    Status(StatusCode),

    #[error("Malformed replica response: {0}")]
    Malformed(String),
}

/// Client for one remote node.
#[derive(Debug, Clone)]
pub struct NodeClient {
    base_url: Url,
    client: Client,
}

impl NodeClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str, id: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ClientError::Url(e.to_string()))?;
        if let Some(id) = id {
            url.query_pairs_mut().append_pair("id", id);
        }
        Ok(url)
    }

    fn request(&self, method: Method, id: &str) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = self.url(ENTITY_PATH, Some(id))?;
        Ok(self
            .client
            .request(method, url)
            .header(REPLICA_HEADER, "true"))
    }

    /// Fetch the replica's record for `id`. `Ok(None)` means the key was
    /// never written on that node.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, ClientError> {
        let response = self.request(Method::GET, id)?.send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {
                let timestamp = read_timestamp(response.headers())?;
                let value = response.bytes().await?.to_vec();
                Ok(Some(Record::live(value, timestamp)))
            }
            StatusCode::NOT_FOUND if response.headers().contains_key(DELETED_HEADER) => {
                let timestamp = read_timestamp(response.headers())?;
                Ok(Some(Record::tombstone(timestamp)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(ClientError::Status(status)),
        }
    }

    /// Replicate a live value or a tombstone. The replica keeps `record.timestamp`.
    pub async fn send(&self, id: &str, record: &Record) -> Result<(), ClientError> {
        let (method, expected) = if record.deleted {
            (Method::DELETE, StatusCode::ACCEPTED)
        } else {
            (Method::PUT, StatusCode::CREATED)
        };

        let mut request = self
            .request(method, id)?
            .header(TIMESTAMP_HEADER, to_micros(record.timestamp).to_string());
        if !record.deleted {
            request = request.body(record.value.clone());
        }

        let status = request.send().await?.status();
        if status == expected {
            Ok(())
        } else {
            Err(ClientError::Status(status))
        }
    }

    /// Whether the node answers its status endpoint with success.
    pub async fn status(&self) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .get(self.url(STATUS_PATH, None)?)
            .send()
            .await?;
        Ok(response.status())
    }
}

fn read_timestamp(headers: &HeaderMap) -> Result<chrono::DateTime<chrono::Utc>, ClientError> {
    let raw = headers
        .get(TIMESTAMP_HEADER)
        .ok_or_else(|| ClientError::Malformed(format!("missing {}", TIMESTAMP_HEADER)))?;
    raw.to_str()
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(from_micros)
        .ok_or_else(|| ClientError::Malformed(format!("bad {}: {:?}", TIMESTAMP_HEADER, raw)))
}
