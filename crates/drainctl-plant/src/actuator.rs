//! Applies setpoints to the managed worker pool.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use drainctl_control::SetpointReceiver;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// Callback resizing the managed pool to the given worker count.
pub type ScaleFn = Box<dyn Fn(u64) -> BoxFuture + Send + Sync>;

/// Drains the setpoint mailbox and applies each target to the pool.
///
/// The controller emits fractional setpoints; rounding to a whole worker
/// count happens here. A failed application is logged and dropped — the
/// controller emits again next period anyway.
pub struct Actuator {
    setpoints: SetpointReceiver,
    scale: ScaleFn,
}

impl Actuator {
    pub fn new(setpoints: SetpointReceiver, scale: ScaleFn) -> Self {
        Self { setpoints, scale }
    }

    /// Run until shutdown fires or the mailbox closes (controller gone).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("actuator started");

        loop {
            tokio::select! {
                setpoint = self.setpoints.recv() => {
                    let Some(setpoint) = setpoint else {
                        info!("setpoint mailbox closed, actuator exiting");
                        break;
                    };
                    let target = setpoint.max(0.0).round() as u64;
                    debug!(setpoint, target, "applying setpoint");
                    if let Err(e) = (self.scale)(target).await {
                        warn!(target, error = %e, "scaling action failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("actuator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drainctl_control::setpoint_channel;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn applies_rounded_targets_in_order() {
        let (tx, rx) = setpoint_channel();
        let (applied_tx, mut applied_rx) = mpsc::unbounded_channel();
        let scale: ScaleFn = Box::new(move |target| {
            let applied_tx = applied_tx.clone();
            Box::pin(async move {
                applied_tx.send(target).unwrap();
                Ok(())
            })
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Actuator::new(rx, scale).run(shutdown_rx));

        tx.send(9.4).await.unwrap();
        tx.send(9.5).await.unwrap();
        tx.send(0.2).await.unwrap();
        drop(tx);

        assert_eq!(applied_rx.recv().await, Some(9));
        assert_eq!(applied_rx.recv().await, Some(10));
        assert_eq!(applied_rx.recv().await, Some(0));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_scaling_is_swallowed() {
        let (tx, rx) = setpoint_channel();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let scale: ScaleFn = Box::new(move |target| {
            let seen = seen.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if target == 3 {
                    anyhow::bail!("pool api rejected the resize")
                }
                Ok(())
            })
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Actuator::new(rx, scale).run(shutdown_rx));

        tx.send(3.0).await.unwrap(); // fails, is dropped
        tx.send(5.0).await.unwrap(); // still applied
        drop(tx);
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_actuator() {
        let (_tx, rx) = setpoint_channel();
        let scale: ScaleFn = Box::new(|_| Box::pin(async { Ok(()) }));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Actuator::new(rx, scale).run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
