//! In-process simulated cluster for exercising the check without real nodes.
//!
//! A [`SimStore`] holds the range layout and a replica-count plan: every meta2
//! scan consumes the next planned count for the bootstrap range, and the last
//! entry repeats once the plan runs out. The store doubles as the
//! [`ClusterFactory`] for [`SimCluster`], and [`SimStore::connector`] hands out
//! clients bound to the same state.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::{Connector, Endpoint, StoreClient};
use crate::descriptor::{RangeDescriptor, ReplicaDescriptor, ScanRow};
use crate::factor::target_replication_factor;
use crate::harness::{ClusterEvent, ClusterFactory, ClusterHarness, NodeStatus};
use crate::keys::{in_span, meta2_key, KEY_MAX};

/// First port handed to simulated nodes.
const SIM_BASE_PORT: u16 = 26257;

/// Split points of the simulated keyspace after the bootstrap range.
const SIM_SPLIT_KEYS: [&[u8]; 2] = [b"m", b"t"];

#[derive(Debug, Default)]
struct SimState {
    nodes: Vec<SocketAddr>,
    running: bool,
    plan: VecDeque<usize>,
    scans: usize,
    hide_bootstrap: bool,
    fail_scans: bool,
    corrupt_rows: bool,
}

impl SimState {
    /// Next planned replica count for the bootstrap range.
    fn next_bootstrap_replicas(&mut self) -> usize {
        if self.plan.len() > 1 {
            return self.plan.pop_front().unwrap_or_default();
        }
        match self.plan.front() {
            Some(count) => *count,
            None => target_replication_factor(self.nodes.len()),
        }
    }

    fn replicas(&self, count: usize) -> Vec<ReplicaDescriptor> {
        (1..=count as u64)
            .map(|id| ReplicaDescriptor {
                node_id: id,
                store_id: id,
            })
            .collect()
    }

    fn descriptors(&mut self) -> Vec<RangeDescriptor> {
        let bootstrap_replicas = self.next_bootstrap_replicas();
        let settled = target_replication_factor(self.nodes.len().max(1));

        let mut bounds: Vec<&[u8]> = vec![&b""[..]];
        bounds.extend(SIM_SPLIT_KEYS);
        bounds.push(KEY_MAX);

        let mut out = Vec::with_capacity(bounds.len() - 1);
        for (idx, pair) in bounds.windows(2).enumerate() {
            let replicas = if idx == 0 { bootstrap_replicas } else { settled };
            out.push(RangeDescriptor {
                range_id: idx as u64 + 1,
                start_key: pair[0].to_vec(),
                end_key: pair[1].to_vec(),
                replicas: self.replicas(replicas),
            });
        }
        if self.hide_bootstrap {
            out.retain(|desc| !desc.is_bootstrap());
        }
        out
    }
}

/// Shared state behind a simulated cluster and its clients.
#[derive(Clone, Debug, Default)]
pub struct SimStore {
    inner: Arc<Mutex<SimState>>,
}

impl SimStore {
    /// Build a store whose bootstrap range reports `plan[i]` replicas on scan `i`.
    pub fn new(plan: impl IntoIterator<Item = usize>) -> Self {
        let state = SimState {
            plan: plan.into_iter().collect(),
            ..SimState::default()
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // State stays consistent across a panicking holder; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            store: self.clone(),
        }
    }

    /// Leave the bootstrap range out of every scan.
    pub fn set_hide_bootstrap(&self, hide: bool) {
        self.lock().hide_bootstrap = hide;
    }

    /// Make every scan fail at the transport level.
    pub fn set_fail_scans(&self, fail: bool) {
        self.lock().fail_scans = fail;
    }

    /// Serve undecodable bytes for the first meta2 row.
    pub fn set_corrupt_rows(&self, corrupt: bool) {
        self.lock().corrupt_rows = corrupt;
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> anyhow::Result<Vec<ScanRow>> {
        let mut state = self.lock();
        anyhow::ensure!(state.running, "connection refused: cluster is not running");
        state.scans += 1;
        anyhow::ensure!(!state.fail_scans, "scan failed: connection reset by peer");

        let corrupt = state.corrupt_rows;
        let mut rows = Vec::new();
        for desc in state.descriptors() {
            let key = meta2_key(&desc.end_key);
            if !in_span(&key, start, end) {
                continue;
            }
            let value = if corrupt && rows.is_empty() {
                b"\x08\x01garbage".to_vec()
            } else {
                desc.encode()?
            };
            rows.push(ScanRow::new(key, value));
        }
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows.truncate(limit);
        Ok(rows)
    }
}

impl ClusterFactory for SimStore {
    type Cluster = SimCluster;

    fn create(&self, node_count: usize, event_buffer: usize) -> anyhow::Result<SimCluster> {
        anyhow::ensure!(node_count > 0, "cluster needs at least one node");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let addrs = (0..node_count)
            .map(|i| {
                let port = u16::try_from(i)
                    .ok()
                    .and_then(|i| SIM_BASE_PORT.checked_add(i))
                    .ok_or_else(|| anyhow::anyhow!("too many simulated nodes: {node_count}"))?;
                Ok(SocketAddr::new(ip, port))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        Ok(SimCluster {
            store: self.clone(),
            addrs,
            certs_dir: std::env::temp_dir().join("holo-accept-sim-certs"),
            events_tx,
            events_rx,
        })
    }
}

/// Simulated nodes sharing one [`SimStore`].
pub struct SimCluster {
    store: SimStore,
    addrs: Vec<SocketAddr>,
    certs_dir: PathBuf,
    events_tx: mpsc::Sender<ClusterEvent>,
    events_rx: mpsc::Receiver<ClusterEvent>,
}

impl SimCluster {
    /// Emit one event per node. Events are dropped when the buffer is full.
    fn broadcast(&self, status: NodeStatus) {
        for (node_index, addr) in self.addrs.iter().enumerate() {
            let event = ClusterEvent {
                node_index,
                addr: *addr,
                status,
            };
            if let Err(err) = self.events_tx.try_send(event) {
                tracing::debug!(node_index, error = %err, "dropping cluster event");
            }
        }
    }
}

#[async_trait]
impl ClusterHarness for SimCluster {
    fn node_addresses(&self) -> Vec<SocketAddr> {
        self.addrs.clone()
    }

    fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }

    fn events(&mut self) -> &mut mpsc::Receiver<ClusterEvent> {
        &mut self.events_rx
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        {
            let mut state = self.store.lock();
            anyhow::ensure!(!state.running, "simulated cluster already running");
            state.nodes = self.addrs.clone();
            state.running = true;
        }
        tracing::info!(nodes = self.addrs.len(), "simulated cluster started");
        self.broadcast(NodeStatus::Started);
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        {
            let mut state = self.store.lock();
            if !state.running {
                return Ok(());
            }
            state.running = false;
        }
        tracing::info!(nodes = self.addrs.len(), "simulated cluster stopped");
        self.broadcast(NodeStatus::Stopped);
        Ok(())
    }
}

/// Connects clients to a running [`SimCluster`].
#[derive(Clone, Debug)]
pub struct SimConnector {
    store: SimStore,
}

#[async_trait]
impl Connector for SimConnector {
    type Client = SimClient;

    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<SimClient> {
        let addr = endpoint.socket_addr()?;
        let state = self.store.lock();
        anyhow::ensure!(state.running, "connection refused: {endpoint}");
        anyhow::ensure!(state.nodes.contains(&addr), "no node listening at {addr}");
        anyhow::ensure!(
            !endpoint.certs_dir.as_os_str().is_empty(),
            "secure connection requires a certs directory"
        );
        Ok(SimClient {
            store: self.store.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct SimClient {
    store: SimStore,
}

#[async_trait]
impl StoreClient for SimClient {
    async fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> anyhow::Result<Vec<ScanRow>> {
        self.store.scan(start, end, limit)
    }
}
