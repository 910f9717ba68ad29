//! Acceptance check that a freshly started cluster replicates its first range.
//!
//! The check connects to one node, scans the meta2 keyspace on a fixed tick,
//! and waits for the bootstrap range (empty start key) to report
//! `min(3, node_count)` replicas. Cluster lifecycle and store access are
//! consumed through the [`ClusterHarness`] and [`Connector`] traits so the
//! polling logic runs unchanged against real clusters, the simulated cluster in
//! [`sim`], or a persisted cluster-state file.

pub mod check;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod factor;
pub mod harness;
pub mod keys;
pub mod poller;
pub mod sim;
pub mod state_file;

pub use check::{check_range_replication, run_range_replication};
pub use client::{Connector, Endpoint, StoreClient};
pub use config::CheckConfig;
pub use descriptor::{count_bootstrap_replicas, RangeDescriptor, ReplicaDescriptor, ScanRow};
pub use error::{CheckError, ExtractError};
pub use factor::{target_replication_factor, DESIRED_REPLICATION_FACTOR};
pub use harness::{ClusterEvent, ClusterFactory, ClusterHarness, ExternalCluster, NodeStatus};
pub use poller::{ConvergencePoller, ConvergenceReport, PollOutcome};
