//! Last-wins async signaling between cooperating producers and consumers.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A reusable single-waiter signal with last-wins value storage.
///
/// `resolve` completes a pending `wait` immediately; with no waiter pending
/// the value is stored (overwriting any previous one) and handed out
/// synchronously on the next `wait`. This is deliberately NOT a channel: a
/// channel is consume-once and would queue values, while this primitive
/// coalesces bursts of signals into the latest value.
///
/// The contract assumes at most one `wait` pending at a time; with several
/// concurrent waiters only one is woken per `resolve`.
#[derive(Debug, Default)]
pub struct WaitObject<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Send> WaitObject<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Wait for the next value. Returns immediately if one is stored.
    pub async fn wait(&self) -> T {
        loop {
            // Register interest before checking the slot so a resolve that
            // lands between the check and the await is not lost.
            let notified = self.notify.notified();
            if let Some(v) = self.slot.lock().take() {
                return v;
            }
            notified.await;
        }
    }

    /// Complete a pending `wait`, or store the value for the next one.
    /// A stored value that was never waited for is overwritten: last wins.
    pub fn resolve(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.notify.notify_one();
    }

    /// Discard any stored value. Pending waiters are unaffected.
    pub fn reset(&self) {
        self.slot.lock().take();
    }

    /// Whether a value is currently stored.
    pub fn has_value(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_then_wait_is_synchronous() {
        let w = WaitObject::new();
        w.resolve(5);
        assert_eq!(w.wait().await, 5);
        assert!(!w.has_value());
    }

    #[tokio::test]
    async fn test_wait_then_resolve() {
        let w = Arc::new(WaitObject::new());
        let waiter = {
            let w = w.clone();
            tokio::spawn(async move { w.wait().await })
        };
        // Give the waiter a chance to park before resolving.
        tokio::time::sleep(Duration::from_millis(10)).await;
        w.resolve("ping");
        assert_eq!(waiter.await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_last_wins() {
        let w = WaitObject::new();
        w.resolve(1);
        w.resolve(2);
        w.resolve(3);
        assert_eq!(w.wait().await, 3);
    }

    #[tokio::test]
    async fn test_reset_clears_stored_value() {
        let w = WaitObject::new();
        w.resolve(9);
        w.reset();
        assert!(!w.has_value());

        // A later resolve still works as usual.
        w.resolve(10);
        assert_eq!(w.wait().await, 10);
    }

    #[tokio::test]
    async fn test_signal_reusable_across_rounds() {
        let w = Arc::new(WaitObject::new());
        for round in 0..3u32 {
            let waiter = {
                let w = w.clone();
                tokio::spawn(async move { w.wait().await })
            };
            tokio::time::sleep(Duration::from_millis(5)).await;
            w.resolve(round);
            assert_eq!(waiter.await.unwrap(), round);
        }
    }
}
