//! Subscribe/notify primitive used by the registries

use std::sync::Mutex;
use tokio::sync::mpsc;

/// Fans events out to every live subscriber
///
/// Each subscriber gets its own unbounded queue, so `notify` never blocks
/// and a slow listener never delays the others. Subscribers whose receiver
/// was dropped are pruned on the next notification.
#[derive(Debug)]
pub struct Notifier<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> Notifier<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to all subscribers, in subscription order
    pub fn notify(&self, event: E) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
        // A panic while holding the lock cannot leave the list inconsistent
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_reaches_all_subscribers() {
        let notifier = Notifier::new();
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.notify(1u32);
        notifier.notify(2u32);

        assert_eq!(rx1.try_recv().unwrap(), 1);
        assert_eq!(rx1.try_recv().unwrap(), 2);
        assert_eq!(rx2.try_recv().unwrap(), 1);
        assert_eq!(rx2.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let notifier = Notifier::new();
        let rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        drop(rx1);
        notifier.notify("event");

        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(rx2.try_recv().unwrap(), "event");
    }

    #[test]
    fn test_async_receive() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.notify(7u8);

        let received = tokio_test::block_on(rx.recv());
        assert_eq!(received, Some(7));
    }
}
