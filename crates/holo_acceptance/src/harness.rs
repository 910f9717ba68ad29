//! Cluster harness capability: lifecycle of the nodes under test and the
//! asynchronous events they emit.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Node lifecycle state reported by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Started,
    Stopped,
    Restarted,
}

/// Asynchronous notification from the harness. The check only logs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEvent {
    pub node_index: usize,
    pub addr: SocketAddr,
    pub status: NodeStatus,
}

/// A set of store nodes the check runs against.
#[async_trait]
pub trait ClusterHarness: Send {
    fn node_addresses(&self) -> Vec<SocketAddr>;

    fn certs_dir(&self) -> &Path;

    /// Inbound event stream. Each event is delivered exactly once.
    fn events(&mut self) -> &mut mpsc::Receiver<ClusterEvent>;

    async fn start(&mut self) -> anyhow::Result<()>;

    /// Release all node resources. Calling it more than once is a no-op.
    async fn stop(&mut self) -> anyhow::Result<()>;

    fn node_count(&self) -> usize {
        self.node_addresses().len()
    }
}

/// Creates clusters of a requested size.
pub trait ClusterFactory {
    type Cluster: ClusterHarness;

    fn create(&self, node_count: usize, event_buffer: usize) -> anyhow::Result<Self::Cluster>;
}

/// A cluster started and owned by someone else.
///
/// `start`/`stop` do nothing; events can be fed through [`ExternalCluster::event_sender`]
/// when a supervisor wants them logged alongside the check.
pub struct ExternalCluster {
    addrs: Vec<SocketAddr>,
    certs_dir: PathBuf,
    events_tx: Option<mpsc::Sender<ClusterEvent>>,
    events_rx: mpsc::Receiver<ClusterEvent>,
}

impl ExternalCluster {
    pub fn new(addrs: Vec<SocketAddr>, certs_dir: PathBuf, event_buffer: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        Self {
            addrs,
            certs_dir,
            events_tx: Some(events_tx),
            events_rx,
        }
    }

    pub fn event_sender(&self) -> Option<mpsc::Sender<ClusterEvent>> {
        self.events_tx.clone()
    }

    /// Drop the harness-held sender so the stream closes once external
    /// senders are gone.
    pub fn close_events(&mut self) {
        self.events_tx = None;
    }
}

#[async_trait]
impl ClusterHarness for ExternalCluster {
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
        anyhow::ensure!(!self.addrs.is_empty(), "external cluster has no nodes");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.close_events();
        Ok(())
    }
}
