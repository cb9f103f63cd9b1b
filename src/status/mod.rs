use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the status store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StatusError {
    #[error("stream {0} is not registered")]
    UnregisteredStream(String),

    #[error("stream {stream_id} is already registered to network {existing}, not {requested}")]
    NetworkConflict {
        stream_id: String,
        existing: String,
        requested: String,
    },
}

/// Rejected block number input.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid block number {0:?}: expected decimal digits")]
pub struct BlockNumberError(pub String);

/// An arbitrary-size, non-negative decimal block number.
///
/// Kept as the caller's text and ordered by numeric value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockNumber(String);

impl BlockNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without leading zeros ("0" for zero).
    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl FromStr for BlockNumber {
    type Err = BlockNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BlockNumberError(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for BlockNumber {
    type Error = BlockNumberError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlockNumber> for String {
    fn from(n: BlockNumber) -> Self {
        n.0
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for BlockNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for BlockNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Latest reported position of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub timestamp: DateTime<Utc>,
    pub block_number: BlockNumber,
}

/// Indexing status of one network, taken from its slowest stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIndexingStatus {
    pub network: String,
    #[serde(flatten)]
    pub status: IndexingStatus,
}

#[derive(Debug, Default)]
struct StatusTable {
    /// stream id -> network
    networks: HashMap<String, String>,
    /// stream id -> latest status
    statuses: HashMap<String, IndexingStatus>,
}

/// Network indexing status shared by status API handlers and producers.
///
/// Each stream's timestamp and block number are stored together and the
/// whole table is read under one lock, so a reduction never mixes fields
/// of different updates.
#[derive(Debug, Default)]
pub struct StatusStore {
    table: RwLock<StatusTable>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a stream with a network. Repeating the same registration
    /// is a no-op; moving a stream to another network is rejected.
    pub fn register_stream(&self, stream_id: &str, network: &str) -> Result<(), StatusError> {
        let mut table = self.table.write();
        match table.networks.get(stream_id) {
            Some(existing) if existing == network => Ok(()),
            Some(existing) => Err(StatusError::NetworkConflict {
                stream_id: stream_id.to_string(),
                existing: existing.clone(),
                requested: network.to_string(),
            }),
            None => {
                table
                    .networks
                    .insert(stream_id.to_string(), network.to_string());
                Ok(())
            }
        }
    }

    /// Records the latest position of a registered stream.
    pub fn update_status(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
        block_number: BlockNumber,
    ) -> Result<(), StatusError> {
        let mut table = self.table.write();
        if !table.networks.contains_key(stream_id) {
            return Err(StatusError::UnregisteredStream(stream_id.to_string()));
        }

        let status = IndexingStatus {
            timestamp,
            block_number,
        };
        match table.statuses.get_mut(stream_id) {
            Some(existing) => *existing = status,
            None => {
                table.statuses.insert(stream_id.to_string(), status);
            }
        }
        Ok(())
    }

    /// Returns one status per network that has reported at least once: the
    /// member stream with the lowest block number, older timestamp first on
    /// ties. Sorted by network name.
    pub fn get_status(&self) -> Vec<NetworkIndexingStatus> {
        let table = self.table.read();
        let mut slowest: BTreeMap<&str, &IndexingStatus> = BTreeMap::new();

        for (stream_id, status) in &table.statuses {
            let Some(network) = table.networks.get(stream_id) else {
                continue;
            };
            slowest
                .entry(network.as_str())
                .and_modify(|current| {
                    if is_behind(status, current) {
                        *current = status;
                    }
                })
                .or_insert(status);
        }

        slowest
            .into_iter()
            .map(|(network, status)| NetworkIndexingStatus {
                network: network.to_string(),
                status: status.clone(),
            })
            .collect()
    }
}

fn is_behind(candidate: &IndexingStatus, current: &IndexingStatus) -> bool {
    candidate
        .block_number
        .cmp(&current.block_number)
        .then_with(|| candidate.timestamp.cmp(&current.timestamp))
        == Ordering::Less
}
