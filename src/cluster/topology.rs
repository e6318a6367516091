use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid node url {0:?}")]
    InvalidUrl(String),

    #[error("local node {0} is not part of the topology")]
    LocalNodeMissing(String),
}

/// Static cluster membership as seen by one node.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Url>,
    local: usize,
}

impl Topology {
    /// Build a topology from node base URLs. Every node sorts the list the same
    /// way, so replica placement agrees across the cluster.
    pub fn new<I, S>(nodes: I, local: &str) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = nodes
            .into_iter()
            .map(|n| parse_url(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        parsed.dedup_by(|a, b| same_node(a, b));

        let local_url = parse_url(local)?;
        let local = parsed
            .iter()
            .position(|n| same_node(n, &local_url))
            .ok_or_else(|| TopologyError::LocalNodeMissing(local_url.to_string()))?;

        Ok(Self {
            nodes: parsed,
            local,
        })
    }

    /// A cluster made of this node alone.
    pub fn single(local: &str) -> Result<Self, TopologyError> {
        Self::new([local], local)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Url] {
        &self.nodes
    }

    pub fn local_index(&self) -> usize {
        self.local
    }

    pub fn is_local(&self, index: usize) -> bool {
        index == self.local
    }

    /// Indices of the `from` nodes responsible for `key`: a walk around the
    /// ring starting at the key's hash.
    pub fn replicas_for(&self, key: &[u8], from: usize) -> Vec<usize> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        let start = (key_hash(key) % n as u64) as usize;
        (0..from.min(n)).map(|i| (start + i) % n).collect()
    }
}

fn parse_url(raw: &str) -> Result<Url, TopologyError> {
    let url = Url::parse(raw.trim()).map_err(|_| TopologyError::InvalidUrl(raw.to_string()))?;
    if url.host_str().is_none() || url.port_or_known_default().is_none() {
        return Err(TopologyError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

fn same_node(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Placement must not change between builds, so this cannot be
/// `DefaultHasher`.
fn key_hash(key: &[u8]) -> u64 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
