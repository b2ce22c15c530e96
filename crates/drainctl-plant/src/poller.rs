//! The polled plant: cached stats refreshed by a background task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use drainctl_control::{Plant, SetpointSender};

use crate::source::{MetricsSource, gauge_value, rate_value};

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<u64>> + Send>,
>;

/// Callback reporting the managed pool's current worker count.
///
/// The pool is the authority on its own size; the metrics service is not.
pub type WorkerCountFn = Box<dyn Fn() -> BoxFuture + Send + Sync>;

/// Poller tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often the cached stats are refreshed.
    pub poll_period: Duration,
    /// Fetch attempts per refresh before declaring telemetry lost.
    pub fetch_attempts: u32,
    /// Initial wait between attempts; doubles per failure.
    pub retry_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(60),
            fetch_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// The last reduced telemetry reading. Rates are kept per-minute and
/// scaled on demand.
#[derive(Debug, Clone, Copy, Default)]
struct QueueStats {
    arrivals_per_min: f64,
    departures_per_min: f64,
    backlog: u64,
    in_system: u64,
    workers: u64,
}

/// Plant view over the poller's cached stats.
pub struct PolledPlant {
    stats: Arc<Mutex<QueueStats>>,
    setpoints: SetpointSender,
}

/// Background task refreshing a [`PolledPlant`]'s stats.
pub struct PlantPoller {
    source: Box<dyn MetricsSource>,
    worker_count: WorkerCountFn,
    stats: Arc<Mutex<QueueStats>>,
    config: PollerConfig,
    fatal: watch::Sender<bool>,
}

/// Build a plant backed by `source`, plus the poller task that keeps it
/// fresh. `fatal` is flipped when telemetry is lost for good, so the rest
/// of the process can stop with the plant.
pub fn polled_plant(
    source: Box<dyn MetricsSource>,
    worker_count: WorkerCountFn,
    config: PollerConfig,
    setpoints: SetpointSender,
    fatal: watch::Sender<bool>,
) -> (PolledPlant, PlantPoller) {
    let stats = Arc::new(Mutex::new(QueueStats::default()));
    (
        PolledPlant {
            stats: stats.clone(),
            setpoints,
        },
        PlantPoller {
            source,
            worker_count,
            stats,
            config,
            fatal,
        },
    )
}

impl Plant for PolledPlant {
    fn rates(&self, unit: Duration) -> (f64, f64) {
        let stats = self.stats.lock().unwrap();
        let factor = Duration::from_secs(60).as_secs_f64() / unit.as_secs_f64();
        (
            stats.arrivals_per_min / factor,
            stats.departures_per_min / factor,
        )
    }

    fn in_system(&self) -> u64 {
        self.stats.lock().unwrap().in_system
    }

    fn backlog(&self) -> u64 {
        self.stats.lock().unwrap().backlog
    }

    fn workers(&self) -> u64 {
        self.stats.lock().unwrap().workers
    }

    fn service_time(&self) -> Option<f64> {
        // Queue metrics don't expose per-message service time; the
        // controller falls back to Little's Law.
        None
    }

    fn setpoints(&self) -> &SetpointSender {
        &self.setpoints
    }
}

impl PlantPoller {
    /// Run the refresh loop until shutdown, or until telemetry is lost
    /// beyond the retry budget (which flips the fatal watch and exits).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = self.config.poll_period.as_secs(),
            "metrics poller started"
        );

        // Prime immediately so the controller never reads zeroed stats.
        if !self.refresh_with_retry().await {
            self.fail_stop();
            return;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_period) => {
                    if !self.refresh_with_retry().await {
                        self.fail_stop();
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics poller shutting down");
                    return;
                }
            }
        }
    }

    async fn refresh_with_retry(&self) -> bool {
        let mut backoff = self.config.retry_backoff;
        for attempt in 1..=self.config.fetch_attempts {
            match self.refresh().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(attempt, error = %e, "telemetry refresh failed");
                    if attempt < self.config.fetch_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        false
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        let sample = self.source.fetch().await?;

        let arrivals = rate_value(&sample.sent)?;
        let departures = rate_value(&sample.deleted)?;
        let visible = gauge_value(&sample.visible)?;
        let in_flight = gauge_value(&sample.in_flight)?;
        let workers = (self.worker_count)().await?;

        let mut stats = self.stats.lock().unwrap();
        stats.arrivals_per_min = arrivals;
        stats.departures_per_min = departures;
        stats.backlog = visible.round() as u64;
        stats.in_system = (visible + in_flight).round() as u64;
        stats.workers = workers;
        Ok(())
    }

    fn fail_stop(&self) {
        error!(
            attempts = self.config.fetch_attempts,
            "telemetry unavailable, stopping"
        );
        let _ = self.fatal.send(true);
    }
}
