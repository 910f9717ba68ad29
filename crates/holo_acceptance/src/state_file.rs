//! Store client backed by a persisted cluster-state file.
//!
//! Nodes persist their control-plane metadata as `meta/cluster_state.json`,
//! with one entry per range under `shards`. This client re-reads the file on
//! every scan and serves the ranges as meta2 rows, so the check can watch a
//! cluster that is managed elsewhere.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::client::{Connector, Endpoint, StoreClient};
use crate::descriptor::{RangeDescriptor, ReplicaDescriptor, ScanRow};
use crate::keys::{in_span, meta2_key, KEY_MAX};

#[derive(Debug, Deserialize)]
struct ClusterStateFile {
    #[serde(default)]
    shards: Vec<ShardEntry>,
}

#[derive(Debug, Deserialize)]
struct ShardEntry {
    shard_id: u64,
    start_key: Vec<u8>,
    /// Empty means unbounded.
    #[serde(default)]
    end_key: Vec<u8>,
    replicas: Vec<u64>,
}

impl ShardEntry {
    fn into_descriptor(self) -> RangeDescriptor {
        let end_key = if self.end_key.is_empty() {
            KEY_MAX.to_vec()
        } else {
            self.end_key
        };
        RangeDescriptor {
            range_id: self.shard_id,
            start_key: self.start_key,
            end_key,
            replicas: self
                .replicas
                .into_iter()
                .map(|node_id| ReplicaDescriptor {
                    node_id,
                    store_id: node_id,
                })
                .collect(),
        }
    }
}

/// Parse a cluster-state document into meta2 rows sorted by key.
pub fn meta_rows_from_state(json: &[u8]) -> anyhow::Result<Vec<ScanRow>> {
    let state: ClusterStateFile =
        serde_json::from_slice(json).context("parse cluster state json")?;
    let mut rows = Vec::with_capacity(state.shards.len());
    for shard in state.shards {
        let desc = shard.into_descriptor();
        let value = desc.encode().context("encode range descriptor")?;
        rows.push(ScanRow::new(meta2_key(&desc.end_key), value));
    }
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(rows)
}

/// Reads meta2 rows from a cluster-state file on every scan.
#[derive(Clone, Debug)]
pub struct StateFileClient {
    path: PathBuf,
}

impl StateFileClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreClient for StateFileClient {
    async fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> anyhow::Result<Vec<ScanRow>> {
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read cluster state {}", self.path.display()))?;
        let mut rows = meta_rows_from_state(&data)?;
        rows.retain(|row| in_span(&row.key, start, end));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Hands out [`StateFileClient`]s for one state file, whatever node the
/// endpoint names.
#[derive(Clone, Debug)]
pub struct StateFileConnector {
    path: PathBuf,
}

impl StateFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for StateFileConnector {
    type Client = StateFileClient;

    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<StateFileClient> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("stat cluster state {}", self.path.display()))?;
        anyhow::ensure!(meta.is_file(), "{} is not a file", self.path.display());
        tracing::debug!(endpoint = %endpoint, path = %self.path.display(), "reading metadata from state file");
        Ok(StateFileClient::new(self.path.clone()))
    }
}
