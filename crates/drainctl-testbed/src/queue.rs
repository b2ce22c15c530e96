//! The simulated message queue.
//!
//! Messages carry no payload, so the queue is a counter with wakeups: a
//! semaphore whose permit count is the visible backlog.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// A counting queue of empty messages.
#[derive(Clone)]
pub struct Queue {
    pending: Arc<Semaphore>,
}

impl Queue {
    /// A queue seeded with `initial` pending messages.
    pub fn new(initial: u64) -> Self {
        Self {
            pending: Arc::new(Semaphore::new(initial as usize)),
        }
    }

    /// Enqueue one message.
    pub fn push(&self) {
        self.pending.add_permits(1);
    }

    /// Dequeue one message, waiting until one is available. Returns
    /// `false` once the queue has been closed.
    pub async fn pop(&self) -> bool {
        match self.pending.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Messages currently awaiting pickup.
    pub fn pending(&self) -> u64 {
        self.pending.available_permits() as u64
    }

    /// Close the queue: pending and future `pop`s return `false`.
    pub fn close(&self) {
        self.pending.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn counts_pushes_and_pops() {
        let queue = Queue::new(2);
        assert_eq!(queue.pending(), 2);

        queue.push();
        assert_eq!(queue.pending(), 3);

        assert!(queue.pop().await);
        assert_eq!(queue.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_waits_for_a_message() {
        let queue = Queue::new(0);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        // Nothing to take yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        queue.push();
        assert!(waiter.await.unwrap());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn close_releases_waiters() {
        let queue = Queue::new(0);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        queue.close();
        assert!(!waiter.await.unwrap());
    }
}
