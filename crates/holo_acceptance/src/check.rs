//! Entry points for the range replication acceptance check.

use tokio_util::sync::CancellationToken;

use crate::client::{Connector, Endpoint};
use crate::config::CheckConfig;
use crate::error::CheckError;
use crate::factor::capped_replication_factor;
use crate::harness::{ClusterFactory, ClusterHarness};
use crate::poller::{ConvergencePoller, ConvergenceReport};

/// Check that the bootstrap range of a running cluster reaches
/// `min(desired_replicas, node_count)` replicas within the attempt budget.
///
/// The client always talks to `cfg.node_index` (node 0 by default).
pub async fn check_range_replication<H, K>(
    cluster: &mut H,
    connector: &K,
    cfg: &CheckConfig,
    cancel: CancellationToken,
) -> Result<ConvergenceReport, CheckError>
where
    H: ClusterHarness + ?Sized,
    K: Connector,
{
    let cfg = cfg.clone().normalized();
    let addrs = cluster.node_addresses();
    let Some(addr) = addrs.get(cfg.node_index).copied() else {
        return Err(CheckError::setup(
            format!("node {}", cfg.node_index),
            anyhow::anyhow!("cluster has only {} nodes", addrs.len()),
        ));
    };
    let endpoint = Endpoint::for_node(&cfg.scheme, &cfg.principal, addr, cluster.certs_dir());

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(CheckError::Interrupted {
                attempts: 0,
                last_observed: None,
            });
        }
        res = connector.connect(&endpoint) => res,
    };
    let client = connected.map_err(|err| CheckError::setup(endpoint.to_string(), err))?;
    tracing::info!(endpoint = %endpoint, nodes = addrs.len(), "connected to cluster");

    let target = capped_replication_factor(cfg.desired_replicas, addrs.len());
    ConvergencePoller::new(&client, cluster.events(), cancel, target, &cfg)
        .run()
        .await
}

/// Create a cluster of `node_count` nodes, start it, run the replication
/// check, and stop the cluster again whatever the outcome.
pub async fn run_range_replication<F, K>(
    factory: &F,
    connector: &K,
    node_count: usize,
    cfg: &CheckConfig,
    cancel: CancellationToken,
) -> Result<ConvergenceReport, CheckError>
where
    F: ClusterFactory,
    K: Connector,
{
    let mut cluster = factory
        .create(node_count, cfg.event_buffer.max(1))
        .map_err(|err| CheckError::harness("create", err))?;

    if let Err(err) = cluster.start().await {
        if let Err(stop_err) = cluster.stop().await {
            tracing::warn!(error = ?stop_err, "cluster stop failed after start failure");
        }
        return Err(CheckError::harness("start", err));
    }

    let result = check_range_replication(&mut cluster, connector, cfg, cancel).await;

    match (result, cluster.stop().await) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(err)) => Err(CheckError::harness("stop", err)),
        (Err(err), stopped) => {
            if let Err(stop_err) = stopped {
                tracing::warn!(error = ?stop_err, "cluster stop failed after check failure");
            }
            Err(err)
        }
    }
}
