use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::supervisor::Supervisor;

/// Drives the supervisor: one launch attempt per tick until cancelled or
/// until a launch fails in a way the next tick cannot fix.
pub struct Runner {
    supervisor: Arc<Supervisor>,
    interval: Duration,
}

impl Runner {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Run the scheduling loop.
    ///
    /// The first attempt happens immediately. Running out of room is logged
    /// and retried on the next tick; any other launch error ends the loop
    /// after a failure notification, leaving running plots alone. On
    /// cancellation every tracked process is signalled and the loop returns
    /// `Ok(())`; cancellation wins over a tick that is ready at the same
    /// moment.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_concurrency = self.supervisor.max_concurrency(),
            "Runner started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, runner exiting");
                    let killed = self.supervisor.kill_all().await;
                    tracing::info!(killed, "Signalled running plot processes");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    self.attempt().await?;
                }
            }
        }
    }

    async fn attempt(&self) -> Result<()> {
        match self.supervisor.launch_one().await {
            Ok(job_id) => {
                tracing::debug!(job_id = %job_id, "Launch attempt started a plot");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                tracing::info!(reason = %e, "No plot started this tick");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Plot process failed to start, runner stopping");
                let status = self.supervisor.status_snapshot().await;
                self.supervisor.notifications().post(
                    "plot process FAILED to start",
                    format!(
                        "plot process FAILED to start:\n{}\n\nCURRENT STATUS:\n\n{}",
                        e, status
                    ),
                );
                Err(e)
            }
        }
    }
}
