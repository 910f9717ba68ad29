//! Convergence polling for the bootstrap range.
//!
//! Each attempt waits one tick while draining cluster events, then scans the
//! meta2 keyspace and compares the bootstrap range's replica count with the
//! target. A mismatch is the expected transient state while replication
//! propagates and only consumes an attempt. Scan and decode failures mean the
//! cluster cannot be evaluated at all and end the check immediately.
//!
//! Cancellation has priority over events and ticks at every wait and before
//! every scan; once observed no further scans are issued.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::StoreClient;
use crate::config::CheckConfig;
use crate::descriptor::count_bootstrap_replicas;
use crate::error::CheckError;
use crate::harness::ClusterEvent;
use crate::keys::{prefix_end, META2_PREFIX};

/// Result of one convergence check.
#[derive(Debug)]
pub enum PollOutcome {
    Converged(usize),
    Mismatch(usize),
    ExtractionFailed(CheckError),
}

/// Summary of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub target: usize,
    /// Checks performed, including the converging one.
    pub attempts: usize,
    /// Replica count seen by each check, in order.
    pub observed: Vec<usize>,
    pub events_drained: usize,
    pub elapsed: Duration,
}

enum Wake {
    Tick,
    Cancelled,
}

/// Drives the bounded poll loop for one check invocation.
pub struct ConvergencePoller<'a, C: StoreClient + ?Sized> {
    client: &'a C,
    events: &'a mut mpsc::Receiver<ClusterEvent>,
    events_open: bool,
    cancel: CancellationToken,
    target: usize,
    max_attempts: usize,
    tick: Duration,
    row_limit: usize,
    show_progress: bool,
}

impl<'a, C: StoreClient + ?Sized> ConvergencePoller<'a, C> {
    pub fn new(
        client: &'a C,
        events: &'a mut mpsc::Receiver<ClusterEvent>,
        cancel: CancellationToken,
        target: usize,
        cfg: &CheckConfig,
    ) -> Self {
        Self {
            client,
            events,
            events_open: true,
            cancel,
            target,
            max_attempts: cfg.max_attempts,
            tick: cfg.tick_interval,
            row_limit: cfg.scan_row_limit,
            show_progress: cfg.show_progress,
        }
    }

    /// Scan meta2 once and classify the bootstrap range's replica count.
    pub async fn check_once(&self) -> PollOutcome {
        let end = prefix_end(META2_PREFIX);
        let rows = match self.client.scan(META2_PREFIX, &end, self.row_limit).await {
            Ok(rows) => rows,
            Err(err) => return PollOutcome::ExtractionFailed(CheckError::transport(err)),
        };
        match count_bootstrap_replicas(&rows) {
            Ok(found) if found == self.target => PollOutcome::Converged(found),
            Ok(found) => PollOutcome::Mismatch(found),
            Err(err) => PollOutcome::ExtractionFailed(err.into()),
        }
    }

    /// Poll until the bootstrap range reaches the target, the attempt budget
    /// runs out, or the check is cancelled.
    pub async fn run(mut self) -> Result<ConvergenceReport, CheckError> {
        let started = Instant::now();
        let mut report = ConvergenceReport {
            target: self.target,
            attempts: 0,
            observed: Vec::with_capacity(self.max_attempts),
            events_drained: 0,
            elapsed: Duration::ZERO,
        };

        tracing::info!(
            wanted = self.target,
            max_attempts = self.max_attempts,
            tick_ms = self.tick.as_millis() as u64,
            "waiting for first range to have {} replicas",
            self.target
        );

        while report.attempts < self.max_attempts {
            let wake = wait_for_tick(
                &self.cancel,
                &mut *self.events,
                &mut self.events_open,
                self.tick,
                &mut report.events_drained,
            )
            .await;
            if matches!(wake, Wake::Cancelled) || self.cancel.is_cancelled() {
                return Err(interrupted(&report));
            }

            let cancel = self.cancel.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(interrupted(&report)),
                outcome = self.check_once() => outcome,
            };

            let found = match outcome {
                PollOutcome::ExtractionFailed(err) => {
                    tracing::warn!(attempt = report.attempts + 1, error = %err, "replication check aborted");
                    return Err(err);
                }
                PollOutcome::Converged(found) | PollOutcome::Mismatch(found) => found,
            };
            report.attempts += 1;
            report.observed.push(found);
            if self.show_progress {
                eprint!("{found} ");
            }

            if found == self.target {
                report.elapsed = started.elapsed();
                if self.show_progress {
                    println!("... correct number of replicas found");
                }
                tracing::info!(
                    wanted = self.target,
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "first range reached target replication"
                );
                return Ok(report);
            }
            tracing::debug!(
                attempt = report.attempts,
                found,
                wanted = self.target,
                "first range not yet at target replication"
            );
        }

        let last_observed = report.observed.last().copied();
        tracing::warn!(
            attempts = report.attempts,
            wanted = self.target,
            last_observed = ?last_observed,
            "failed to replicate first range"
        );
        Err(CheckError::ConvergenceTimeout {
            attempts: report.attempts,
            target: self.target,
            last_observed,
        })
    }
}

/// Wait for the next tick, logging cluster events as they arrive.
///
/// The tick deadline is fixed when the wait starts, so events never push it
/// back, and the deadline is rechecked after every event so a busy stream
/// cannot starve the timer.
async fn wait_for_tick(
    cancel: &CancellationToken,
    events: &mut mpsc::Receiver<ClusterEvent>,
    events_open: &mut bool,
    tick: Duration,
    drained: &mut usize,
) -> Wake {
    let deadline = Instant::now() + tick;
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        if cancel.is_cancelled() {
            return Wake::Cancelled;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Wake::Cancelled,
            maybe = events.recv(), if *events_open => match maybe {
                Some(event) => {
                    *drained += 1;
                    tracing::debug!(
                        node_index = event.node_index,
                        addr = %event.addr,
                        status = ?event.status,
                        "cluster event"
                    );
                    if Instant::now() >= deadline {
                        return Wake::Tick;
                    }
                }
                None => {
                    tracing::debug!("cluster event stream closed");
                    *events_open = false;
                }
            },
            _ = &mut sleep => return Wake::Tick,
        }
    }
}

fn interrupted(report: &ConvergenceReport) -> CheckError {
    tracing::warn!(attempts = report.attempts, "replication check interrupted");
    CheckError::Interrupted {
        attempts: report.attempts,
        last_observed: report.observed.last().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::descriptor::{RangeDescriptor, ReplicaDescriptor, ScanRow};
    use crate::harness::NodeStatus;
    use crate::keys::{meta2_key, KEY_MAX};

    #[derive(Clone, Copy, Debug)]
    enum Step {
        Replicas(usize),
        NoBootstrap,
        Garbage,
        Fail,
    }

    /// Replays a fixed sequence of scan results; the last step repeats.
    struct ScriptedClient {
        steps: Mutex<VecDeque<Step>>,
        scans: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(steps: &[Step]) -> Self {
            Self {
                steps: Mutex::new(steps.iter().copied().collect()),
                scans: AtomicUsize::new(0),
            }
        }

        fn replicas(counts: &[usize]) -> Self {
            let steps = counts.iter().map(|c| Step::Replicas(*c)).collect::<Vec<_>>();
            Self::new(&steps)
        }

        fn scans(&self) -> usize {
            self.scans.load(Ordering::SeqCst)
        }
    }

    fn descriptor_row(start: &[u8], end: &[u8], replicas: usize) -> ScanRow {
        let desc = RangeDescriptor {
            range_id: 1,
            start_key: start.to_vec(),
            end_key: end.to_vec(),
            replicas: (1..=replicas as u64)
                .map(|id| ReplicaDescriptor {
                    node_id: id,
                    store_id: id,
                })
                .collect(),
        };
        ScanRow::new(meta2_key(end), desc.encode().unwrap())
    }

    #[async_trait]
    impl StoreClient for ScriptedClient {
        async fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> anyhow::Result<Vec<ScanRow>> {
            assert_eq!(start, META2_PREFIX);
            assert_eq!(end, prefix_end(META2_PREFIX).as_slice());
            assert_eq!(limit, 10);
            self.scans.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.len() > 1 {
                    steps.pop_front().unwrap()
                } else {
                    *steps.front().unwrap()
                }
            };
            match step {
                Step::Replicas(n) => Ok(vec![descriptor_row(b"", b"m", n), descriptor_row(b"m", KEY_MAX, 1)]),
                Step::NoBootstrap => Ok(vec![descriptor_row(b"a", b"m", 3), descriptor_row(b"m", KEY_MAX, 3)]),
                Step::Garbage => Ok(vec![ScanRow::new(meta2_key(b"m"), b"{".to_vec())]),
                Step::Fail => Err(anyhow::anyhow!("connection reset by peer")),
            }
        }
    }

    fn cfg() -> CheckConfig {
        CheckConfig::default().quiet()
    }

    /// Paused-clock timers fire on millisecond ticks, so allow a small overshoot.
    fn assert_ticks(elapsed: Duration, ticks: u64) {
        let want = Duration::from_secs(ticks);
        assert!(
            elapsed >= want && elapsed < want + Duration::from_millis(50),
            "elapsed {elapsed:?}, expected about {want:?}"
        );
    }

    fn event(node_index: usize) -> ClusterEvent {
        ClusterEvent {
            node_index,
            addr: SocketAddr::from(([127, 0, 0, 1], 26257 + node_index as u16)),
            status: NodeStatus::Started,
        }
    }

    async fn run(
        client: &ScriptedClient,
        events: &mut mpsc::Receiver<ClusterEvent>,
        cancel: CancellationToken,
        target: usize,
    ) -> Result<ConvergenceReport, CheckError> {
        ConvergencePoller::new(client, events, cancel, target, &cfg()).run().await
    }

    #[tokio::test(start_paused = true)]
    async fn single_node_converges_on_first_check() {
        let client = ScriptedClient::replicas(&[1]);
        let (_tx, mut rx) = mpsc::channel(10);
        let report = run(&client, &mut rx, CancellationToken::new(), 1).await.unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.observed, vec![1]);
        assert_ticks(report.elapsed, 1);
        assert_eq!(client.scans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn three_nodes_converge_on_fourth_check() {
        let client = ScriptedClient::replicas(&[1, 1, 2, 3]);
        let (_tx, mut rx) = mpsc::channel(10);
        let report = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap();
        assert_eq!(report.attempts, 4);
        assert_eq!(report.observed, vec![1, 1, 2, 3]);
        assert_ticks(report.elapsed, 4);
        assert_eq!(client.scans(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_replication_times_out_with_last_count() {
        let client = ScriptedClient::replicas(&[1, 2]);
        let (_tx, mut rx) = mpsc::channel(10);
        let err = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap_err();
        match err {
            CheckError::ConvergenceTimeout {
                attempts,
                target,
                last_observed,
            } => {
                assert_eq!(attempts, 20);
                assert_eq!(target, 3);
                assert_eq!(last_observed, Some(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.scans(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_poll_reports_interrupted() {
        let client = ScriptedClient::replicas(&[2]);
        let (_tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            trigger.cancel();
        });

        let err = run(&client, &mut rx, cancel, 3).await.unwrap_err();
        match err {
            CheckError::Interrupted {
                attempts,
                last_observed,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_observed, Some(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.scans(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_ready_events_and_ticks() {
        let client = ScriptedClient::replicas(&[3]);
        let (tx, mut rx) = mpsc::channel(10);
        for i in 0..3 {
            tx.send(event(i)).await.unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run(&client, &mut rx, cancel, 3).await.unwrap_err();
        assert!(err.is_interrupted(), "unexpected error: {err:?}");
        assert_eq!(client.scans(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_bootstrap_range_aborts_immediately() {
        let client = ScriptedClient::new(&[Step::NoBootstrap, Step::Replicas(3)]);
        let (_tx, mut rx) = mpsc::channel(10);
        let started = Instant::now();
        let err = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap_err();
        assert!(matches!(err, CheckError::BootstrapRangeNotFound { scanned: 2 }));
        assert!(err.is_fatal_precondition());
        assert_eq!(client.scans(), 1);
        assert_ticks(started.elapsed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_descriptor_aborts_immediately() {
        let client = ScriptedClient::new(&[Step::Replicas(1), Step::Garbage, Step::Replicas(3)]);
        let (_tx, mut rx) = mpsc::channel(10);
        let err = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap_err();
        match err {
            CheckError::Decode { key, .. } => assert_eq!(key, meta2_key(b"m")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.scans(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_failure_aborts_immediately() {
        let client = ScriptedClient::new(&[Step::Fail, Step::Replicas(3)]);
        let (_tx, mut rx) = mpsc::channel(10);
        let err = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap_err();
        assert!(matches!(err, CheckError::Transport(_)), "unexpected error: {err:?}");
        assert_eq!(client.scans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_events_do_not_consume_attempts() {
        let client = ScriptedClient::replicas(&[1, 3]);
        let (tx, mut rx) = mpsc::channel(10);
        for i in 0..5 {
            tx.send(event(i)).await.unwrap();
        }
        let cfg = cfg().with_max_attempts(2);
        let report = ConvergencePoller::new(&client, &mut rx, CancellationToken::new(), 3, &cfg)
            .run()
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.events_drained, 5);
        assert_ticks(report.elapsed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_event_stream_does_not_delay_ticks() {
        let client = ScriptedClient::replicas(&[2, 2, 3]);
        let (tx, mut rx) = mpsc::channel(10);
        tokio::spawn(async move {
            for i in 0..40 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if tx.send(event(i % 3)).await.is_err() {
                    return;
                }
            }
        });

        let report = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap();
        assert_eq!(report.attempts, 3);
        assert!(report.events_drained > 0);
        assert_ticks(report.elapsed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_stream_still_ticks() {
        let client = ScriptedClient::replicas(&[2, 3]);
        let (tx, mut rx) = mpsc::channel::<ClusterEvent>(10);
        drop(tx);
        let report = run(&client, &mut rx, CancellationToken::new(), 3).await.unwrap();
        assert_eq!(report.attempts, 2);
        assert_ticks(report.elapsed, 2);
    }

    #[tokio::test]
    async fn check_once_classifies_counts() {
        let client = ScriptedClient::new(&[Step::Replicas(2), Step::Replicas(3), Step::NoBootstrap]);
        let (_tx, mut rx) = mpsc::channel(10);
        let poller = ConvergencePoller::new(&client, &mut rx, CancellationToken::new(), 3, &cfg());
        assert!(matches!(poller.check_once().await, PollOutcome::Mismatch(2)));
        assert!(matches!(poller.check_once().await, PollOutcome::Converged(3)));
        assert!(matches!(
            poller.check_once().await,
            PollOutcome::ExtractionFailed(CheckError::BootstrapRangeNotFound { .. })
        ));
    }
}
