use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use engine_types::{EngineError, Notification, NotificationFilter};

use crate::queue::Queue;

type Callback = Box<dyn Fn(&Notification) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: NotificationFilter,
    callback: Callback,
}

/// Single-writer fan-out bus: every `Engine`, `Event`, and `DataHandler`
/// notification passes through `publish`, and a lazily-started publisher
/// thread dispatches it to each matching subscriber in subscription order.
///
/// A subscriber that panics, or whose callback we can't prove won't, is
/// isolated: the panic is caught and logged, and the bus keeps running.
pub struct NotificationBus {
    queue: Queue<Notification>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    fn ensure_started(self: &Arc<Self>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let bus = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name("notification-bus".to_string())
                .spawn(move || bus.dispatch_loop())
                .expect("failed to spawn notification bus thread");
            *self.handle.lock().expect("notification bus mutex poisoned") = Some(handle);
        }
    }

    fn dispatch_loop(&self) {
        loop {
            let notification = match self.queue.get() {
                Ok(n) => n,
                Err(EngineError::Shutdown) => break,
                Err(_) => break,
            };
            let subscribers = self.subscribers.lock().expect("notification bus mutex poisoned");
            for subscriber in subscribers.iter() {
                if subscriber.filter.matches(&notification) {
                    let result = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&notification)));
                    if result.is_err() {
                        tracing::error!(subscriber_id = subscriber.id, "notification subscriber panicked");
                    }
                }
            }
        }
    }

    /// Registers a subscriber and starts the publisher thread if this is
    /// the first subscription. Returns an id usable with `unsubscribe`.
    pub fn subscribe<F>(self: &Arc<Self>, filter: NotificationFilter, callback: F) -> u64
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.ensure_started();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("notification bus mutex poisoned")
            .push(Subscriber { id, filter, callback: Box::new(callback) });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().expect("notification bus mutex poisoned").retain(|s| s.id != id);
    }

    pub fn publish(&self, notification: Notification) {
        if let Err(err) = self.queue.put(notification) {
            tracing::warn!(%err, "dropped notification published after bus shutdown");
        }
    }

    /// Drains remaining queued notifications, then joins the publisher
    /// thread (a no-op if it was never started).
    pub fn shutdown(&self) {
        self.queue.shutdown(false);
        if let Some(handle) = self.handle.lock().expect("notification bus mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::{DataCoordinates, NotificationCategory};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn subscriber_receives_matching_notifications_only() {
        let bus = Arc::new(NotificationBus::new());
        let (tx, rx) = mpsc::channel();
        bus.subscribe(NotificationFilter::Category(NotificationCategory::Storage), move |n| {
            tx.send(n.clone()).unwrap();
        });
        bus.publish(Notification::event_executed(None));
        bus.publish(Notification::data_stored(DataCoordinates::new([("time", 0i64)])));
        let received = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(received.category(), NotificationCategory::Storage);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        bus.shutdown();
    }

    #[test]
    fn panicking_subscriber_does_not_kill_the_bus() {
        let bus = Arc::new(NotificationBus::new());
        bus.subscribe(NotificationFilter::Any, |_| panic!("boom"));
        let (tx, rx) = mpsc::channel();
        bus.subscribe(NotificationFilter::Any, move |n| tx.send(n.clone()).unwrap());
        bus.publish(Notification::event_executed(None));
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        bus.shutdown();
    }
}
