//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use holo_acceptance::CheckConfig;
use serde_json::json;
use tempfile::TempDir;

/// Check configuration with progress output disabled.
pub fn quiet_config(tick: Duration) -> CheckConfig {
    CheckConfig::default().with_tick_interval(tick).quiet()
}

/// Per-test scratch directory, removed on drop.
pub fn test_dir(name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .tempdir()
        .expect("create test dir")
}

/// Loopback addresses for `count` nodes.
pub fn node_addrs(count: usize) -> Vec<SocketAddr> {
    let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    (0..count)
        .map(|i| SocketAddr::new(ip, 26257 + i as u16))
        .collect()
}

/// Render a cluster-state document with a bootstrap range `["", "m")` holding
/// `bootstrap_replicas` and a settled range `["m", +inf)` on nodes 1..=3.
pub fn cluster_state_json(bootstrap_replicas: Option<u64>) -> String {
    let mut shards = Vec::new();
    if let Some(count) = bootstrap_replicas {
        shards.push(json!({
            "shard_id": 1,
            "shard_index": 0,
            "start_hash": 0,
            "end_hash": 0,
            "start_key": [],
            "end_key": b"m".to_vec(),
            "replicas": (1..=count).collect::<Vec<u64>>(),
            "leaseholder": 1,
        }));
    }
    shards.push(json!({
        "shard_id": 2,
        "shard_index": 1,
        "start_hash": 0,
        "end_hash": 0,
        "start_key": b"m".to_vec(),
        "end_key": [],
        "replicas": [1, 2, 3],
        "leaseholder": 1,
    }));
    json!({
        "epoch": 1,
        "frozen": false,
        "replication_factor": 3,
        "members": {},
        "shards": shards,
    })
    .to_string()
}

/// Replace the state file atomically so readers never see a partial write.
pub fn write_cluster_state(path: &Path, bootstrap_replicas: Option<u64>) {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, cluster_state_json(bootstrap_replicas)).expect("write state tmp");
    std::fs::rename(&tmp, path).expect("rename state file");
}
