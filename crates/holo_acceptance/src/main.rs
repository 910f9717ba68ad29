// holo-accept binary entry point.
//
// Runs the first-range replication check against a simulated cluster or an
// externally managed one whose metadata is persisted to a cluster-state file.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use holo_acceptance::keys::{prefix_end, META2_PREFIX};
use holo_acceptance::sim::SimStore;
use holo_acceptance::state_file::{StateFileClient, StateFileConnector};
use holo_acceptance::{
    check_range_replication, count_bootstrap_replicas, run_range_replication, CheckConfig,
    ConvergenceReport, ExternalCluster, StoreClient,
};

#[derive(Parser)]
#[command(name = "holo-accept")]
#[command(about = "First-range replication acceptance check", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a simulated cluster and wait for its first range to replicate.
    Simulate {
        #[arg(long, env = "HOLO_ACCEPT_NODES", default_value_t = 3)]
        nodes: usize,
        /// Replica counts reported by successive scans; the last one repeats.
        #[arg(long, value_delimiter = ',', default_value = "1,1,2,3")]
        plan: Vec<usize>,
        /// Leave the first range out of the metadata.
        #[arg(long, default_value_t = false)]
        hide_bootstrap: bool,
        /// Fail every metadata scan.
        #[arg(long, default_value_t = false)]
        fail_scans: bool,
        /// Serve an undecodable first metadata row.
        #[arg(long, default_value_t = false)]
        corrupt_rows: bool,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Watch an externally managed cluster through its persisted cluster state.
    Watch {
        /// Node address (host:port); repeat once per node. The first is queried.
        #[arg(long = "node", required = true)]
        nodes: Vec<SocketAddr>,
        #[arg(long, env = "HOLO_ACCEPT_CERTS_DIR")]
        certs_dir: PathBuf,
        /// Path to a node's `meta/cluster_state.json`.
        #[arg(long, env = "HOLO_ACCEPT_STATE_FILE")]
        state_file: PathBuf,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Print the first range's replica count from a cluster-state file.
    Extract {
        #[arg(long, env = "HOLO_ACCEPT_STATE_FILE")]
        state_file: PathBuf,
        #[arg(long, env = "HOLO_ACCEPT_SCAN_LIMIT", default_value_t = 10)]
        scan_limit: usize,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct PollArgs {
    /// Checks to run before giving up.
    #[arg(long, env = "HOLO_ACCEPT_MAX_ATTEMPTS", default_value_t = 20)]
    max_attempts: usize,

    /// Wait between checks (ms).
    #[arg(long, env = "HOLO_ACCEPT_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Requested replication factor; capped by cluster size.
    #[arg(long, env = "HOLO_ACCEPT_DESIRED_REPLICAS", default_value_t = 3)]
    desired_replicas: usize,

    /// Meta2 rows fetched per scan.
    #[arg(long, env = "HOLO_ACCEPT_SCAN_LIMIT", default_value_t = 10)]
    scan_limit: usize,

    /// Capacity of the cluster event channel.
    #[arg(long, env = "HOLO_ACCEPT_EVENT_BUFFER", default_value_t = 10)]
    event_buffer: usize,

    /// Node the client connects to.
    #[arg(long, env = "HOLO_ACCEPT_NODE_INDEX", default_value_t = 0)]
    node_index: usize,

    #[arg(long, env = "HOLO_ACCEPT_SCHEME", default_value = "https")]
    scheme: String,

    #[arg(long, env = "HOLO_ACCEPT_PRINCIPAL", default_value = "root")]
    principal: String,

    /// Suppress per-attempt progress output.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

impl PollArgs {
    fn check_config(&self) -> CheckConfig {
        CheckConfig {
            desired_replicas: self.desired_replicas,
            max_attempts: self.max_attempts,
            tick_interval: Duration::from_millis(self.tick_ms),
            scan_row_limit: self.scan_limit,
            event_buffer: self.event_buffer,
            node_index: self.node_index,
            scheme: self.scheme.clone(),
            principal: self.principal.clone(),
            show_progress: !self.quiet,
        }
        .normalized()
    }
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the requested subcommand.
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Simulate {
            nodes,
            plan,
            hide_bootstrap,
            fail_scans,
            corrupt_rows,
            poll,
        } => {
            let store = SimStore::new(plan);
            store.set_hide_bootstrap(hide_bootstrap);
            store.set_fail_scans(fail_scans);
            store.set_corrupt_rows(corrupt_rows);
            let cancel = cancel_on_ctrl_c();
            let report = run_range_replication(
                &store,
                &store.connector(),
                nodes,
                &poll.check_config(),
                cancel,
            )
            .await?;
            log_report(&report);
            Ok(())
        }
        Command::Watch {
            nodes,
            certs_dir,
            state_file,
            poll,
        } => {
            let cfg = poll.check_config();
            let mut cluster = ExternalCluster::new(nodes, certs_dir, cfg.event_buffer);
            // Nobody feeds events to an external cluster from here.
            cluster.close_events();
            let connector = StateFileConnector::new(state_file);
            let cancel = cancel_on_ctrl_c();
            let report = check_range_replication(&mut cluster, &connector, &cfg, cancel).await?;
            log_report(&report);
            Ok(())
        }
        Command::Extract {
            state_file,
            scan_limit,
        } => {
            let client = StateFileClient::new(state_file);
            let rows = client
                .scan(META2_PREFIX, &prefix_end(META2_PREFIX), scan_limit.max(1))
                .await?;
            let replicas = count_bootstrap_replicas(&rows)
                .with_context(|| format!("extract first range from {}", client.path().display()))?;
            println!("{replicas}");
            Ok(())
        }
    }
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received; stopping replication check");
                trigger.cancel();
            }
            Err(err) => tracing::warn!(error = ?err, "failed to listen for ctrl-c"),
        }
    });
    cancel
}

fn log_report(report: &ConvergenceReport) {
    tracing::info!(
        wanted = report.target,
        attempts = report.attempts,
        observed = ?report.observed,
        events = report.events_drained,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "replication check passed"
    );
}
