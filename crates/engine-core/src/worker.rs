use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use engine_types::{EngineError, Notification, NotificationTag};

use crate::event::{Event, EventContext};
use crate::future::FutureInner;
use crate::queue::PriorityQueue;

/// A submitted event together with the scheduling/retry state the worker
/// mutates between attempts. Moved back into the queue, by value, on each
/// retry — there is exactly one live copy at any time, which is what makes
/// the `finished` guard in the retry loop a pure safety net rather than
/// something load-bearing.
pub(crate) struct QueuedEvent<D, M> {
    pub(crate) event: Box<dyn Event<D, M>>,
    pub(crate) retries_remaining: u32,
    pub(crate) notification_types: HashSet<NotificationTag>,
    pub(crate) future_weak: Weak<FutureInner<D, M>>,
    pub(crate) finished: bool,
}

/// One named worker thread and its priority queue. Events submitted with
/// this thread's name, or routed here by the engine's free-thread
/// selection, execute strictly serially in `(priority, arrival order)`.
pub struct ThreadManager<D, M> {
    pub(crate) name: String,
    pub(crate) queue: Arc<PriorityQueue<QueuedEvent<D, M>>>,
    executing: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<D, M> ThreadManager<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn spawn(
        name: impl Into<String>,
        publish: Arc<dyn Fn(Notification) + Send + Sync>,
        data_handler: Option<Arc<crate::data_handler::DataHandler<D, M>>>,
        stop_requested: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let name = name.into();
        let queue: Arc<PriorityQueue<QueuedEvent<D, M>>> = Arc::new(PriorityQueue::new());
        let executing = Arc::new(AtomicBool::new(false));

        let thread_name = name.clone();
        let handle = {
            let queue = Arc::clone(&queue);
            let executing = Arc::clone(&executing);
            let stop_requested = Arc::clone(&stop_requested);
            let worker_name = name.clone();
            std::thread::Builder::new()
                .name(format!("worker-{thread_name}"))
                .spawn(move || run_loop(worker_name, queue, executing, publish, data_handler, stop_requested))
                .expect("failed to spawn worker thread")
        };

        Arc::new(Self {
            name,
            queue,
            executing,
            stop_requested,
            handle: std::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn enqueue(&self, item: QueuedEvent<D, M>, priority: i64) -> Result<(), EngineError> {
        self.queue.put(item, priority)
    }

    /// Best-effort idle check: no work queued and nothing currently
    /// executing. Racy against a concurrent enqueue/dequeue by construction,
    /// so callers use it as a heuristic for free-thread selection, not a
    /// hard guarantee.
    pub fn is_idle(&self) -> bool {
        self.queue.empty() && !self.executing.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Cooperative shutdown: lets the worker drain whatever is already
    /// queued, then joins it.
    pub fn shutdown(&self) {
        self.queue.shutdown(false);
        if let Some(handle) = self.handle.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }

    /// Discards anything still queued and joins as soon as the in-flight
    /// event (if any) finishes.
    pub fn terminate(&self) {
        self.queue.shutdown(true);
        if let Some(handle) = self.handle.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<D, M>(
    name: String,
    queue: Arc<PriorityQueue<QueuedEvent<D, M>>>,
    executing: Arc<AtomicBool>,
    publish: Arc<dyn Fn(Notification) + Send + Sync>,
    data_handler: Option<Arc<crate::data_handler::DataHandler<D, M>>>,
    stop_requested: Arc<AtomicBool>,
) where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    crate::proxy::mark_current_thread_as_worker(name);

    loop {
        let mut item = match queue.get() {
            Ok(item) => item,
            Err(EngineError::Shutdown) => break,
            Err(_) => break,
        };

        if item.finished {
            tracing::error!("worker dequeued an event already marked finished; dropping it");
            queue.task_done();
            continue;
        }

        let future_weak = item.future_weak.clone();

        executing.store(true, Ordering::SeqCst);
        let ctx = EventContext {
            publish: {
                let publish = Arc::clone(&publish);
                Box::new(move |n: Notification| (publish)(n))
            },
            data_handler: data_handler.clone(),
            future: item.future_weak.clone(),
            stop_requested: Arc::clone(&stop_requested),
            allowed: item.notification_types.clone(),
        };
        let result = item.event.execute(&ctx);
        executing.store(false, Ordering::SeqCst);

        let final_result: Option<Result<serde_json::Value, EngineError>> = match result {
            Ok(value) => Some(Ok(value)),
            Err(err) => {
                if item.retries_remaining == 0 {
                    Some(Err(err))
                } else {
                    tracing::warn!(
                        error = %err,
                        retries_remaining = item.retries_remaining,
                        "event raised an exception, retrying"
                    );
                    item.retries_remaining -= 1;
                    match queue.put(item, 0) {
                        Ok(()) => None,
                        Err(requeue_err) => {
                            tracing::error!(error = %requeue_err, "failed to requeue event for retry");
                            Some(Err(err))
                        }
                    }
                }
            }
        };

        if let Some(result) = final_result {
            let error_message = result.as_ref().err().map(|e| e.to_string());
            (publish)(Notification::event_executed(error_message));
            if let Some(future) = future_weak.upgrade() {
                match result {
                    Ok(value) => future.notify_execution_complete(Some(value), None),
                    Err(err) => future.notify_execution_complete(None, Some(err.to_string())),
                }
            }
            queue.task_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AnonymousCallableEvent, Event};
    use crate::future::Future;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn spawn_manager() -> (Arc<ThreadManager<i32, String>>, Arc<StdMutex<Vec<Notification>>>) {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let publish: Arc<dyn Fn(Notification) + Send + Sync> = {
            let received = Arc::clone(&received);
            Arc::new(move |n: Notification| received.lock().unwrap().push(n))
        };
        let manager = ThreadManager::spawn("test", publish, None, Arc::new(AtomicBool::new(false)));
        (manager, received)
    }

    #[test]
    fn single_event_runs_once_and_signals_future() {
        let (manager, received) = spawn_manager();
        let future: Future<i32, String> = Future::new(None);
        let event: Box<dyn Event<i32, String>> =
            Box::new(AnonymousCallableEvent::new(|_| Ok(serde_json::json!("ok"))));
        let queued = QueuedEvent {
            event,
            retries_remaining: 0,
            notification_types: HashSet::new(),
            future_weak: Arc::downgrade(&future.inner),
            finished: false,
        };
        manager.enqueue(queued, 1).unwrap();
        let result = future.await_execution(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(result, serde_json::json!("ok"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(received.lock().unwrap().len(), 1);
        manager.shutdown();
    }

    #[test]
    fn exhausted_retries_surface_the_error() {
        let (manager, _received) = spawn_manager();
        let future: Future<i32, String> = Future::new(None);
        let event: Box<dyn Event<i32, String>> = Box::new(AnonymousCallableEvent::new(|_| {
            Err(EngineError::Device("boom".to_string()))
        }));
        let queued = QueuedEvent {
            event,
            retries_remaining: 1,
            notification_types: HashSet::new(),
            future_weak: Arc::downgrade(&future.inner),
            finished: false,
        };
        manager.enqueue(queued, 1).unwrap();
        let err = future.await_execution(Some(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, EngineError::Device(msg) if msg == "boom"));
        manager.shutdown();
    }

    #[test]
    fn idle_detection_reports_no_work() {
        let (manager, _received) = spawn_manager();
        std::thread::sleep(Duration::from_millis(10));
        assert!(manager.is_idle());
        manager.shutdown();
    }
}
