//! The periodic control loop.
//!
//! Once per period the controller samples the plant, refreshes its
//! smoothers, picks an operating regime (queued / in-flight / idle) and
//! computes the worker-count setpoint it pushes into the plant's mailbox.
//! All controller state is owned by the loop task; hosts that want to tick
//! the controller themselves call [`Controller::step`] directly.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use drainctl_ema::Ema;

use crate::error::ControlError;
use crate::plant::Plant;

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Control period, in units.
    pub period: u64,
    /// Maximum acceptable time to drain the current backlog, in units.
    pub drain_horizon: u64,
    /// The time unit rates are expressed in.
    pub unit: Duration,
    /// Window of the output smoother. 1 disables smoothing.
    pub ema_size: usize,
    /// Window of the completion and worker-count integrators.
    pub emi_size: usize,
    /// Window of the internal-concurrency smoother.
    pub concurrency_size: usize,
    /// Worker count seeded when traffic exists but the pool is stopped and
    /// unobserved. The loop self-corrects, so this only shapes the first
    /// few periods.
    pub initial_guess: f64,
    /// Compute everything, send nothing.
    pub dry_run: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period: 1,
            drain_horizon: 60,
            unit: Duration::from_secs(1),
            ema_size: 1,
            emi_size: 100,
            concurrency_size: 20,
            initial_guess: 1.0,
            dry_run: false,
        }
    }
}

impl ControlConfig {
    fn validate(&self) -> Result<(), ControlError> {
        if self.period == 0 {
            return Err(ControlError::ZeroPeriod);
        }
        if self.drain_horizon == 0 {
            return Err(ControlError::ZeroDrainHorizon);
        }
        if self.ema_size == 0 || self.emi_size == 0 || self.concurrency_size == 0 {
            return Err(ControlError::ZeroSmootherSize);
        }
        if !self.initial_guess.is_finite() || self.initial_guess < 0.0 {
            return Err(ControlError::BadInitialGuess(self.initial_guess));
        }
        Ok(())
    }
}

/// Last-committed controller state, published after every period.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlStatus {
    pub arrival_rate: f64,
    pub departure_rate: f64,
    pub rate: f64,
    pub base: f64,
    pub burst: f64,
    pub setpoint: f64,
    pub internal_concurrency: f64,
}

/// The worker-count controller for a single plant.
pub struct Controller<P> {
    plant: P,

    period: u64,
    drain_horizon: u64,
    unit: Duration,
    initial_guess: f64,
    dry_run: bool,

    // Last-committed sample and law outputs.
    arrival_rate: f64,
    departure_rate: f64,
    rate: f64,
    base: f64,
    burst: f64,

    // Completion and worker-count integrators; only ever read as the ratio
    // of one another or compared against 1.
    departure_integral: Ema,
    worker_integral: Ema,

    // W/β samples taken while the pool is saturated.
    concurrency: Ema,

    // Output smoother over the base term.
    output: Ema,

    first_period: bool,
    status_tx: watch::Sender<ControlStatus>,
}

impl<P: Plant> Controller<P> {
    pub fn new(plant: P, config: ControlConfig) -> Result<Self, ControlError> {
        config.validate()?;
        let (status_tx, _) = watch::channel(ControlStatus::default());
        Ok(Self {
            plant,
            period: config.period,
            drain_horizon: config.drain_horizon,
            unit: config.unit,
            initial_guess: config.initial_guess,
            dry_run: config.dry_run,
            arrival_rate: 0.0,
            departure_rate: 0.0,
            rate: 0.0,
            base: 0.0,
            burst: 0.0,
            departure_integral: Ema::integral(config.emi_size),
            worker_integral: Ema::integral(config.emi_size),
            concurrency: Ema::average(config.concurrency_size),
            output: Ema::average(config.ema_size),
            first_period: true,
            status_tx,
        })
    }

    /// Run the control loop until shutdown fires or the setpoint mailbox
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let sleep_for = self.unit * self.period as u32;
        info!(
            period_ms = sleep_for.as_millis() as u64,
            drain_horizon = self.drain_horizon,
            dry_run = self.dry_run,
            "control loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    if !self.tick().await {
                        info!("setpoint mailbox closed, control loop exiting");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }
    }

    /// One full period: sample, compute, emit. Returns `false` once the
    /// setpoint mailbox has closed and the loop should stop.
    pub async fn tick(&mut self) -> bool {
        let Some(setpoint) = self.step() else {
            return true;
        };
        if self.dry_run {
            return true;
        }
        self.plant.setpoints().send(setpoint).await.is_ok()
    }

    /// One iteration of the control law, without the emission. Returns the
    /// setpoint that would be emitted, or `None` on the very first period
    /// (the integrators have seen a single sample; acting on it would be
    /// acting on noise).
    pub fn step(&mut self) -> Option<f64> {
        let (arrival_rate, departure_rate) = self.plant.rates(self.unit);
        self.arrival_rate = arrival_rate;
        self.departure_rate = departure_rate;
        let workers = self.plant.workers();
        let backlog = self.plant.backlog();
        let in_flight = self.plant.in_system().saturating_sub(backlog);

        // Integrate completions and worker counts. Strictly both should be
        // scaled by the period, but they are only ever used as a ratio of
        // one another or compared against 1, so the factor cancels.
        self.departure_integral.add(departure_rate);
        self.worker_integral.add(workers as f64);

        let observed = self.departure_integral.value() * self.period as f64 >= 1.0
            && self.worker_integral.value() >= 1.0;

        if !observed {
            // Nothing has flowed through the pool yet, so there is no rate
            // to estimate.
            if backlog + in_flight == 0 {
                // No messages anywhere: the pool can stay stopped.
                self.base = 0.0;
            } else if workers > 0 {
                self.base = workers as f64;
            } else {
                // Messages but no workers: seed the pool and let the loop
                // correct itself as it learns the service rate.
                self.base = self.initial_guess;
            }
            debug!(
                workers,
                backlog,
                in_flight,
                base = self.base,
                "warm-up: pool not observed yet"
            );
        } else {
            // Per-worker service rate. The historical estimate stays sane
            // while workers are starved; the instantaneous one recovers
            // faster right after a scale-up. Take the larger.
            let mut rate = self.departure_integral.value() / self.worker_integral.value();
            if workers > 0 {
                let instantaneous = departure_rate / workers as f64;
                if instantaneous > rate {
                    rate = instantaneous;
                }
                // W/β only reveals internal concurrency while the pool is
                // saturated; sampled every observed period, consumed in the
                // in-flight branch.
                self.concurrency.add(in_flight as f64 / workers as f64);
            }

            if backlog > workers {
                // Queued. A backlog no larger than the pool is
                // indistinguishable from noise under high traffic, so
                // "queued" starts past the worker count. Workers run at
                // full speed; size the burst term to drain the backlog
                // within the horizon.
                self.rate = rate;
                self.base = arrival_rate / rate;
                self.burst = backlog as f64 / rate / self.drain_horizon as f64;
                debug!(
                    backlog,
                    workers,
                    rate = self.rate,
                    base = self.base,
                    burst = self.burst,
                    "queued: draining within horizon"
                );
            } else if in_flight > 0 {
                // Equilibrium or overscaled. Estimate busy workers for
                // Little's Law: a saturated-pool concurrency above 1 means
                // W counts messages, not workers.
                let mut busy_workers = in_flight as f64;
                let concurrency = self.concurrency.value();
                if concurrency > 1.0 {
                    busy_workers /= concurrency;
                }
                // Harmonic mean of the rate-side and Little's-Law worker
                // estimates; it leans toward the smaller one, which keeps
                // an overscaled reading from whipsawing the pool.
                let from_rates = rate / arrival_rate;
                let from_littles_law = 1.0 / busy_workers;
                self.base = 2.0 / (from_rates + from_littles_law);
                self.rate = arrival_rate / self.base;
                self.burst = 0.0;
                debug!(
                    in_flight,
                    busy_workers,
                    base = self.base,
                    "in-flight: balancing toward equilibrium"
                );
            } else {
                // Nothing queued, nothing in flight: traffic stopped, or
                // messages drain faster than we can observe. No busy
                // workers for Little's Law, so take the arithmetic-mean
                // degenerate case and halve the pool; an underestimated
                // rate corrects itself over the following periods.
                self.base = arrival_rate / rate / 2.0;
                self.rate = rate;
                self.burst = 0.0;
                debug!(base = self.base, "idle: halving the pool");
            }
        }

        if self.first_period {
            // A single integrated sample is not a trend.
            self.first_period = false;
            self.publish_status();
            return None;
        }

        // The burst term stays unsmoothed: backlog response must be snappy.
        self.output.add(self.base);
        self.publish_status();
        Some(self.output.value() + self.burst)
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ControlStatus {
            arrival_rate: self.arrival_rate,
            departure_rate: self.departure_rate,
            rate: self.rate,
            base: self.base,
            burst: self.burst,
            setpoint: self.setpoint(),
            internal_concurrency: self.concurrency.value(),
        });
    }

    /// Subscribe to the per-period status snapshots.
    pub fn status(&self) -> watch::Receiver<ControlStatus> {
        self.status_tx.subscribe()
    }

    /// Arrival rate sampled in the last period.
    pub fn arrival_rate(&self) -> f64 {
        self.arrival_rate
    }

    /// Completion rate sampled in the last period.
    pub fn departure_rate(&self) -> f64 {
        self.departure_rate
    }

    /// Estimated per-worker service rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Steady-state component of the last computed setpoint.
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Backlog-drain component of the last computed setpoint.
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// The setpoint as currently emitted: smoothed base plus burst.
    pub fn setpoint(&self) -> f64 {
        self.output.value() + self.burst
    }

    /// Smoothed messages-per-worker ratio observed under saturation.
    pub fn internal_concurrency(&self) -> f64 {
        self.concurrency.value()
    }

    /// Mean per-message service time: the plant's own measurement when it
    /// has one, otherwise Little's Law over the last sample, 0 with no
    /// data at all.
    pub fn service_time(&self) -> f64 {
        if let Some(mu) = self.plant.service_time() {
            return mu;
        }
        if self.arrival_rate > 0.0 {
            return self.plant.in_system() as f64 / self.arrival_rate;
        }
        0.0
    }

    /// Expected messages in-system for the current arrival rate, from the
    /// service time (milliseconds per message).
    pub fn expected_in_system(&self) -> u64 {
        if self.arrival_rate > 0.0 {
            (self.service_time() / 1000.0 * self.arrival_rate).round() as u64
        } else {
            0
        }
    }
}
