use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use engine_types::{DataStorage, EngineError, Notification, NotificationTag};
use serde::{Deserialize, Serialize};

use crate::data_handler::{DataHandler, Processor};
use crate::event::Event;
use crate::future::Future;
use crate::notification_bus::NotificationBus;
use crate::worker::{QueuedEvent, ThreadManager};

/// Serializable engine configuration: worker naming and scheduling
/// defaults. Concrete collaborators (a processor, a storage back-end) are
/// attached separately through [`Engine::install_data_handler`], since
/// trait objects don't serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker name used when an event declares neither `thread_name` nor
    /// `use_free_thread`.
    pub default_worker_name: String,
    /// Priority assigned to events whose declaration doesn't override it.
    pub default_priority: i64,
    /// Retry budget assigned to events whose declaration doesn't override
    /// it.
    pub default_retries_on_exception: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_worker_name: "main".to_string(),
            default_priority: 1,
            default_retries_on_exception: 0,
        }
    }
}

/// Singleton-like coordinator: a named pool of [`ThreadManager`] workers, a
/// device-id registry, a [`NotificationBus`], an accumulated exception log,
/// and an optional [`DataHandler`].
///
/// Constructed via [`Engine::new`] rather than a process-wide global:
/// "construct one and share it via `Arc`" composes with ordinary Rust
/// ownership instead of hidden global state.
pub struct Engine<D, M> {
    config: EngineConfig,
    bus: Arc<NotificationBus>,
    workers: Mutex<HashMap<String, Arc<ThreadManager<D, M>>>>,
    /// Names eligible for `free_worker`'s idle scan: the default/"main"
    /// worker and every anonymous (`anon-N`) worker spun up so far. Workers
    /// created to satisfy a `thread_name` pin are never added here, so a
    /// device's affinity thread can't be handed unrelated free-thread work.
    free_pool: Mutex<HashSet<String>>,
    free_worker_count: AtomicU64,
    devices: Mutex<HashSet<String>>,
    data_handler: Mutex<Option<Arc<DataHandler<D, M>>>>,
    stop_requested: Arc<AtomicBool>,
    shutting_down: AtomicBool,
    exceptions: Arc<Mutex<Vec<EngineError>>>,
}

impl<D, M> Engine<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let bus = Arc::new(NotificationBus::new());
        let exceptions = Arc::new(Mutex::new(Vec::new()));
        {
            let exceptions = Arc::clone(&exceptions);
            bus.subscribe(
                engine_types::NotificationFilter::Tag(NotificationTag::EventExecuted),
                move |notification| {
                    if let engine_types::NotificationKind::EventExecuted { error: Some(message) } = &notification.kind {
                        exceptions.lock().expect("engine mutex poisoned").push(EngineError::Device(message.clone()));
                    }
                },
            );
        }
        let engine = Arc::new(Self {
            config,
            bus,
            workers: Mutex::new(HashMap::new()),
            free_pool: Mutex::new(HashSet::new()),
            free_worker_count: AtomicU64::new(0),
            devices: Mutex::new(HashSet::new()),
            data_handler: Mutex::new(None),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shutting_down: AtomicBool::new(false),
            exceptions,
        });

        // One worker, named per `default_worker_name` ("main" by default),
        // exists from construction rather than being spun up lazily on
        // first submission.
        let main_name = engine.config.default_worker_name.clone();
        engine.worker(&main_name);
        engine.free_pool.lock().expect("engine mutex poisoned").insert(main_name);

        engine
    }

    /// Attaches a `DataHandler` built from an optional processor and
    /// optional storage back-end. Events whose `execute` calls
    /// `EventContext::put_data` will fail with `EngineError::NotFound`
    /// until this has been called.
    pub fn install_data_handler(
        &self,
        processor: Option<Processor<D, M>>,
        storage: Option<Arc<dyn DataStorage<D, M>>>,
    ) {
        let bus = Arc::clone(&self.bus);
        let publish: Box<dyn Fn(Notification) + Send + Sync> = Box::new(move |n| bus.publish(n));
        let handler = DataHandler::new(processor, storage, publish);
        *self.data_handler.lock().expect("engine mutex poisoned") = Some(handler);
    }

    pub fn data_handler(&self) -> Option<Arc<DataHandler<D, M>>> {
        self.data_handler.lock().expect("engine mutex poisoned").clone()
    }

    /// Registers a device id. Append-only: registering the same id twice
    /// is an error, mirroring the "unique ids, exclusive ownership"
    /// invariant on the device registry — there is no `unregister`.
    pub fn register_device(&self, id: impl Into<String>) -> Result<(), EngineError> {
        let id = id.into();
        let mut devices = self.devices.lock().expect("engine mutex poisoned");
        if !devices.insert(id.clone()) {
            return Err(EngineError::Device(format!("device id {id:?} is already registered")));
        }
        Ok(())
    }

    pub fn is_device_registered(&self, id: &str) -> bool {
        self.devices.lock().expect("engine mutex poisoned").contains(id)
    }

    /// Whether a worker named `name` currently exists in the pool.
    pub fn has_worker(&self, name: &str) -> bool {
        self.workers.lock().expect("engine mutex poisoned").contains_key(name)
    }

    pub fn subscribe<F>(&self, filter: engine_types::NotificationFilter, callback: F) -> u64
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(filter, callback)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.bus.unsubscribe(id);
    }

    fn worker(&self, name: &str) -> Arc<ThreadManager<D, M>> {
        let mut workers = self.workers.lock().expect("engine mutex poisoned");
        if let Some(worker) = workers.get(name) {
            return Arc::clone(worker);
        }
        let bus = Arc::clone(&self.bus);
        let publish: Arc<dyn Fn(Notification) + Send + Sync> = Arc::new(move |n| bus.publish(n));
        let worker = ThreadManager::spawn(
            name.to_string(),
            publish,
            self.data_handler(),
            Arc::clone(&self.stop_requested),
        );
        workers.insert(name.to_string(), Arc::clone(&worker));
        worker
    }

    /// If *main* is idle, picks it; else the first idle previously spun-up
    /// `anon-N` worker; else spins up a new `anon-N` one. Never considers
    /// workers created to satisfy a `thread_name` pin.
    fn free_worker(&self) -> Arc<ThreadManager<D, M>> {
        {
            let workers = self.workers.lock().expect("engine mutex poisoned");
            if let Some(main) = workers.get(&self.config.default_worker_name) {
                if main.is_idle() {
                    return Arc::clone(main);
                }
            }
            let free_pool = self.free_pool.lock().expect("engine mutex poisoned");
            let idle_anon = free_pool
                .iter()
                .filter(|name| **name != self.config.default_worker_name)
                .filter_map(|name| workers.get(name))
                .find(|w| w.is_idle());
            if let Some(worker) = idle_anon {
                return Arc::clone(worker);
            }
        }
        let index = self.free_worker_count.fetch_add(1, Ordering::SeqCst);
        let name = format!("anon-{index}");
        let worker = self.worker(&name);
        self.free_pool.lock().expect("engine mutex poisoned").insert(name);
        worker
    }

    /// Submits an event for execution.
    ///
    /// `thread_name` pins the event to a named worker (creating it if
    /// necessary); `use_free_thread` asks the engine to pick an idle
    /// worker instead. Per the precedence rule: if both are given,
    /// `thread_name` wins and a warning is logged. If neither is given,
    /// the event's own declared `thread_name` is used, falling back to
    /// `EngineConfig::default_worker_name`.
    pub fn submit(
        self: &Arc<Self>,
        event: Box<dyn Event<D, M>>,
        thread_name: Option<String>,
        use_free_thread: bool,
    ) -> Result<Future<D, M>, EngineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }

        let declaration = event.declaration();
        let coordinates_iterator = event.coordinates_iterator();

        let mut notification_types = declaration.notification_types.clone();
        notification_types.insert(NotificationTag::EventExecuted);

        if thread_name.is_some() && use_free_thread {
            tracing::warn!("submit() called with both thread_name and use_free_thread; thread_name wins");
        }

        let worker = if let Some(name) = thread_name {
            self.worker(&name)
        } else if let Some(name) = &declaration.thread_name {
            self.worker(name)
        } else if use_free_thread {
            self.free_worker()
        } else {
            self.worker(&self.config.default_worker_name)
        };

        let future = Future::new(coordinates_iterator);
        let future_weak = std::sync::Arc::downgrade(&future.inner);

        let queued = QueuedEvent {
            event,
            retries_remaining: declaration.retries_on_exception,
            notification_types,
            future_weak,
            finished: false,
        };

        worker.enqueue(queued, declaration.priority)?;
        Ok(future)
    }

    /// Drains the accumulated exception log. `Ok(())` if nothing has
    /// failed since the last call; `Err(EngineError::Device)` for a single
    /// failure; `Err(EngineError::Multiple)` if more than one accumulated.
    pub fn check_exceptions(&self) -> Result<(), EngineError> {
        let mut exceptions = self.exceptions.lock().expect("engine mutex poisoned");
        let drained: Vec<EngineError> = exceptions.drain(..).collect();
        match drained.len() {
            0 => Ok(()),
            1 => Err(drained.into_iter().next().expect("checked len == 1")),
            _ => Err(EngineError::Multiple(drained)),
        }
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Shuts the engine down: stops accepting new registrations and
    /// submissions, drains and joins every worker, finishes the data
    /// handler, then stops and joins the notification bus.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
        self.devices.lock().expect("engine mutex poisoned").clear();

        let workers = std::mem::take(&mut *self.workers.lock().expect("engine mutex poisoned"));
        for (_, worker) in workers {
            worker.shutdown();
        }

        if let Some(handler) = self.data_handler.lock().expect("engine mutex poisoned").take() {
            handler.finish();
        }

        self.bus.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AnonymousCallableEvent;
    use std::time::Duration;

    #[test]
    fn simple_submit_runs_on_default_worker() {
        let _ = tracing_subscriber::fmt::try_init();
        let engine: Arc<Engine<i32, String>> = Engine::new(EngineConfig::default());
        let event: Box<dyn Event<i32, String>> =
            Box::new(AnonymousCallableEvent::new(|_| Ok(serde_json::json!(1))));
        let future = engine.submit(event, None, false).unwrap();
        assert_eq!(future.await_execution(Some(Duration::from_secs(5))).unwrap(), serde_json::json!(1));
        engine.shutdown();
    }

    #[test]
    fn check_exceptions_drains_and_composes() {
        let engine: Arc<Engine<i32, String>> = Engine::new(EngineConfig::default());
        for _ in 0..2 {
            let event: Box<dyn Event<i32, String>> = Box::new(AnonymousCallableEvent::new(|_| {
                Err(EngineError::Device("boom".to_string()))
            }));
            let future = engine.submit(event, None, false).unwrap();
            let _ = future.await_execution(Some(Duration::from_secs(5)));
        }
        std::thread::sleep(Duration::from_millis(50));
        let result = engine.check_exceptions();
        assert!(matches!(result, Err(EngineError::Multiple(errors)) if errors.len() == 2));
        assert!(engine.check_exceptions().is_ok(), "log should be drained by the previous call");
        engine.shutdown();
    }

    #[test]
    fn duplicate_device_registration_is_rejected() {
        let engine: Arc<Engine<i32, String>> = Engine::new(EngineConfig::default());
        engine.register_device("camera-1").unwrap();
        assert!(matches!(engine.register_device("camera-1"), Err(EngineError::Device(_))));
        engine.shutdown();
    }

    #[test]
    fn thread_name_wins_over_use_free_thread() {
        let engine: Arc<Engine<i32, String>> = Engine::new(EngineConfig::default());
        let event: Box<dyn Event<i32, String>> =
            Box::new(AnonymousCallableEvent::new(|_| Ok(serde_json::json!("pinned"))));
        let future = engine.submit(event, Some("camera-thread".to_string()), true).unwrap();
        assert_eq!(future.await_execution(Some(Duration::from_secs(5))).unwrap(), serde_json::json!("pinned"));
        assert!(engine.workers.lock().unwrap().contains_key("camera-thread"));
        engine.shutdown();
    }
}
