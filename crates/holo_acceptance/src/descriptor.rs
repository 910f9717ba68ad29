//! Range descriptors as stored in the meta2 keyspace, and extraction of the
//! bootstrap range's replica count from a scan.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Placement of one replica of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: u64,
    pub store_id: u64,
}

/// Ownership record for one contiguous key range. Key ranges are
/// lexicographic and end-exclusive; an empty `start_key` marks the bootstrap
/// range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    #[serde(default)]
    pub range_id: u64,
    pub start_key: Vec<u8>,
    #[serde(default)]
    pub end_key: Vec<u8>,
    pub replicas: Vec<ReplicaDescriptor>,
}

impl RangeDescriptor {
    pub fn is_bootstrap(&self) -> bool {
        self.start_key.is_empty()
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One key/value row returned by a meta2 scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl ScanRow {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// Decode the row's value as a range descriptor.
    pub fn descriptor(&self) -> Result<RangeDescriptor, ExtractError> {
        serde_json::from_slice(&self.value).map_err(|source| ExtractError::Decode {
            key: self.key.clone(),
            source,
        })
    }
}

/// Return the replica count of the bootstrap range among `rows`.
///
/// Rows are decoded in scan order; the first decode failure aborts the
/// extraction even when the bootstrap range appears later.
pub fn count_bootstrap_replicas(rows: &[ScanRow]) -> Result<usize, ExtractError> {
    for row in rows {
        let desc = row.descriptor()?;
        if desc.is_bootstrap() {
            return Ok(desc.replicas.len());
        }
    }
    Err(ExtractError::BootstrapRangeNotFound {
        scanned: rows.len(),
    })
}
