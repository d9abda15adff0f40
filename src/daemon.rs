//! Daemon Infrastructure - Periodic backup scheduling
//!
//! The daemon owns the process-wide cancellation token. A spawned bridge task
//! turns SIGINT/SIGTERM into a single cancellation; the loop runs a pass,
//! sleeps for the configured period and starts over until the token fires.

use crate::delay::delay;
use crate::sync::BackupPass;
use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counters kept while the loop runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub passes_started: u64,
    pub passes_failed: u64,
}

/// Daemon state and control
pub struct Daemon<P> {
    pass: P,
    period: Duration,
}

impl<P: BackupPass> Daemon<P> {
    pub fn new(pass: P, period: Duration) -> Self {
        Self { pass, period }
    }

    /// Run until a termination signal arrives
    pub async fn run(&self) -> Result<DaemonStats> {
        info!("Starting backup daemon, period {:?}", self.period);

        let cancel = CancellationToken::new();
        let bridge = spawn_signal_bridge(cancel.clone())?;

        let stats = self.run_until_cancelled(&cancel).await;

        bridge.abort();
        info!(
            "Backup daemon stopped after {} passes ({} failed)",
            stats.passes_started, stats.passes_failed
        );
        Ok(stats)
    }

    /// Main loop: pass, sleep, repeat until `cancel` fires.
    ///
    /// A failed pass is logged and retried after the regular period.
    pub async fn run_until_cancelled(&self, cancel: &CancellationToken) -> DaemonStats {
        let mut stats = DaemonStats::default();

        loop {
            if cancel.is_cancelled() {
                info!("Context cancelled");
                break;
            }

            stats.passes_started += 1;
            let pass_start = Instant::now();
            debug!("Starting scheduled backup pass #{}", stats.passes_started);

            if let Err(e) = self.pass.run_pass(cancel).await {
                stats.passes_failed += 1;
                error!("Error performing backup: {:#}", e);
            } else {
                debug!("Backup pass took {:.2}s", pass_start.elapsed().as_secs_f64());
            }

            if cancel.is_cancelled() {
                continue;
            }

            info!("Sleeping for {} seconds", self.period.as_secs());
            delay(cancel, self.period).await;
        }

        stats
    }
}

/// Cancel `cancel` once the process is asked to terminate.
///
/// Signal handlers are installed before this returns, so a failure to
/// register them surfaces at startup.
pub fn spawn_signal_bridge(cancel: CancellationToken) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => info!("Received SIGTERM"),
                _ = interrupt.recv() => info!("Received SIGINT"),
                _ = cancel.cancelled() => return,
            }
            info!("Received shutdown signal");
            cancel.cancel();
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for ctrl-c: {}", e);
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
            info!("Received shutdown signal");
            cancel.cancel();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncSummary;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingPass {
        runs: Arc<AtomicU64>,
        fail: bool,
    }

    #[async_trait]
    impl BackupPass for CountingPass {
        async fn run_pass(&self, _cancel: &CancellationToken) -> Result<SyncSummary> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("listing failed"))
            } else {
                Ok(SyncSummary::default())
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_pass() {
        let pass = CountingPass::default();
        let daemon = Daemon::new(pass.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = daemon.run_until_cancelled(&cancel).await;

        assert_eq!(stats, DaemonStats::default());
        assert_eq!(pass.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_passes_are_retried_every_period() {
        let pass = CountingPass {
            fail: true,
            ..Default::default()
        };
        let daemon = Arc::new(Daemon::new(pass.clone(), Duration::from_secs(10)));
        let cancel = CancellationToken::new();

        let task = {
            let daemon = daemon.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { daemon.run_until_cancelled(&cancel).await })
        };

        // passes at t=0, 10, 20; cancel at t=25
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats.passes_started, 3);
        assert_eq!(stats.passes_failed, 3);
    }

    #[tokio::test]
    async fn test_signal_bridge_stops_when_token_cancelled() {
        let cancel = CancellationToken::new();
        let bridge = spawn_signal_bridge(cancel.clone()).expect("signal handlers install");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), bridge).await;
        assert!(result.is_ok(), "bridge should exit once the token is cancelled");
    }
}
