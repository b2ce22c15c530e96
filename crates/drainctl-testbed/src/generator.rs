//! Synthetic traffic.
//!
//! Emits messages into a sink with log-normal inter-arrival gaps. The
//! traffic level can be shifted while running, and short bursts at a
//! faster rate can be layered on top.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::log_normal_units;

/// Log-normal arrival process feeding a message sink.
pub struct Generator {
    sink: mpsc::Sender<()>,
    /// Bits of the current log-mean, so it can shift under a running task.
    log_mu: Arc<AtomicU64>,
    log_sigma: f64,
    unit: Duration,
}

impl Generator {
    pub fn new(sink: mpsc::Sender<()>, log_mu: f64, log_sigma: f64, unit: Duration) -> Self {
        Self {
            sink,
            log_mu: Arc::new(AtomicU64::new(log_mu.to_bits())),
            log_sigma,
            unit,
        }
    }

    /// Start emitting. The task stops when shutdown fires or the sink
    /// closes.
    pub fn start(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let log_mu = self.log_mu.clone();
        let log_sigma = self.log_sigma;
        let unit = self.unit;

        tokio::spawn(async move {
            loop {
                let mu = f64::from_bits(log_mu.load(Ordering::Relaxed));
                let gap = unit.mul_f64(log_normal_units(mu, log_sigma));
                tokio::select! {
                    _ = tokio::time::sleep(gap) => {
                        if sink.send(()).await.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        })
    }

    /// Shift the traffic level: positive slows arrivals down, negative
    /// speeds them up.
    pub fn shift_log_mu(&self, delta: f64) {
        let mut current = self.log_mu.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.log_mu.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Fire `size` extra messages with gaps drawn at `log_mu − rel_mu`,
    /// layered over the steady stream.
    pub fn burst(&self, rel_mu: f64, size: u64) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let burst_mu = f64::from_bits(self.log_mu.load(Ordering::Relaxed)) - rel_mu;
        let log_sigma = self.log_sigma;
        let unit = self.unit;

        debug!(size, burst_mu, "burst started");
        tokio::spawn(async move {
            for _ in 0..size {
                let gap = unit.mul_f64(log_normal_units(burst_mu, log_sigma));
                tokio::time::sleep(gap).await;
                if sink.send(()).await.is_err() {
                    return;
                }
            }
        })
    }
}
