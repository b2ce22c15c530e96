//! Simulated workers.
//!
//! A worker pops a message, holds it for a log-normal service time, then
//! reports the drawn duration on the `processed` channel. Killing a worker
//! takes effect between messages; one already being processed finishes.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::log_normal_units;
use crate::queue::Queue;

/// Service times above this many units are clipped.
const MAX_SERVICE_UNITS: f64 = 30_000.0;

/// Log-normal service-time parameters, in log-units.
#[derive(Debug, Clone, Copy)]
pub struct ServiceProfile {
    pub log_mu: f64,
    pub log_sigma: f64,
}

impl ServiceProfile {
    /// One service-time draw, in units.
    pub(crate) fn draw(&self) -> f64 {
        log_normal_units(self.log_mu, self.log_sigma).min(MAX_SERVICE_UNITS)
    }
}

pub(crate) struct Worker {
    kill: watch::Sender<bool>,
}

impl Worker {
    pub(crate) fn spawn(
        queue: Queue,
        processed: mpsc::Sender<f64>,
        service: ServiceProfile,
        unit: Duration,
    ) -> Self {
        let (kill, mut killed) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = killed.changed() => return,
                    popped = queue.pop() => {
                        if !popped {
                            return;
                        }
                        let drawn = service.draw();
                        tokio::time::sleep(unit.mul_f64(drawn)).await;
                        if processed.send(drawn).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self { kill }
    }

    pub(crate) fn kill(self) {
        let _ = self.kill.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn processes_messages_and_reports_durations() {
        let queue = Queue::new(2);
        let (processed_tx, mut processed_rx) = mpsc::channel(8);
        let _worker = Worker::spawn(
            queue.clone(),
            processed_tx,
            ServiceProfile {
                log_mu: 0.0,
                log_sigma: 0.1,
            },
            Duration::from_millis(1),
        );

        let first = processed_rx.recv().await.unwrap();
        let second = processed_rx.recv().await.unwrap();
        assert!(first > 0.0 && first <= MAX_SERVICE_UNITS);
        assert!(second > 0.0 && second <= MAX_SERVICE_UNITS);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_takes_effect_between_messages() {
        let queue = Queue::new(0);
        let (processed_tx, mut processed_rx) = mpsc::channel(8);
        let worker = Worker::spawn(
            queue.clone(),
            processed_tx,
            ServiceProfile {
                log_mu: 0.0,
                log_sigma: 0.1,
            },
            Duration::from_millis(1),
        );

        worker.kill();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The worker is gone: a fresh message stays in the queue.
        queue.push();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.pending(), 1);
        assert!(processed_rx.try_recv().is_err());
    }

    #[test]
    fn draws_are_clipped() {
        let service = ServiceProfile {
            log_mu: 15.0, // e^15 ≫ the clip
            log_sigma: 0.1,
        };
        for _ in 0..32 {
            assert!(service.draw() <= MAX_SERVICE_UNITS);
        }
    }
}
