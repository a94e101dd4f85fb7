use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use engine_types::{DataCoordinates, DataCoordinatesIterator, EngineError, Notification, NotificationTag};

use crate::future::FutureInner;

/// Declared-at-construction metadata for an event: its notification
/// whitelist, its default priority, and how many times it may be retried on
/// exception. The engine-wide `EventExecuted` notification is always
/// implicitly permitted on top of whatever this declares.
#[derive(Debug, Clone)]
pub struct EventDeclaration {
    pub notification_types: HashSet<NotificationTag>,
    pub priority: i64,
    pub retries_on_exception: u32,
    pub thread_name: Option<String>,
}

impl Default for EventDeclaration {
    fn default() -> Self {
        Self {
            notification_types: HashSet::new(),
            priority: 1,
            retries_on_exception: 0,
            thread_name: None,
        }
    }
}

/// Execution-time handle passed to [`Event::execute`]: publishing
/// notifications, checking for a cooperative stop request, and handing off
/// produced data to the data pipeline.
pub struct EventContext<D, M> {
    pub(crate) publish: Box<dyn Fn(Notification) + Send + Sync>,
    pub(crate) data_handler: Option<Arc<crate::data_handler::DataHandler<D, M>>>,
    pub(crate) future: Weak<FutureInner<D, M>>,
    pub(crate) stop_requested: Arc<AtomicBool>,
    pub(crate) allowed: HashSet<NotificationTag>,
}

impl<D, M> EventContext<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Publishes a notification to the engine's bus and, if a waiter still
    /// holds this event's future, records it in the future's own log.
    ///
    /// If `notification`'s tag was not declared in the event's
    /// `notification_types`, this still publishes but logs a warning — a
    /// declaration mismatch is a bug worth surfacing, not a reason to drop
    /// the message.
    pub fn publish_notification(&self, notification: Notification) {
        if !self.allowed.contains(&notification.tag()) {
            tracing::warn!(tag = ?notification.tag(), "publishing a notification outside the event's declared notification_types");
        }
        if let Some(future) = self.future.upgrade() {
            future.notify_of_event_notification(notification.clone());
        }
        (self.publish)(notification);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Hands produced data to the engine's `DataHandler`, associating it
    /// with this event's future so `Future::await_data` callers waiting on
    /// `coords` are woken as the datum advances through its lifecycle.
    pub fn put_data(&self, coords: DataCoordinates, data: D, metadata: M) -> Result<(), EngineError> {
        let handler = self
            .data_handler
            .as_ref()
            .ok_or_else(|| EngineError::NotFound("no DataHandler configured for this engine".to_string()))?;
        handler.put(coords, data, metadata, self.future.clone())
    }
}

/// User-implemented unit of work submitted to the engine.
///
/// Implementors provide `execute`; `declaration()` supplies the
/// priority/retry/affinity/notification metadata the engine and worker use
/// to schedule and bound retries, and `coordinates_iterator()` optionally
/// lets `Future::await_data` reject impossible waits early.
pub trait Event<D, M>: Send
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn execute(&mut self, ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError>;

    fn declaration(&self) -> EventDeclaration {
        EventDeclaration::default()
    }

    fn coordinates_iterator(&self) -> Option<Arc<dyn DataCoordinatesIterator>> {
        None
    }
}

/// An [`Event`] built from a plain closure, for callers who don't need a
/// dedicated type to submit a one-off unit of work.
pub struct AnonymousCallableEvent<D, M> {
    callable: Option<Box<dyn FnOnce(&EventContext<D, M>) -> Result<serde_json::Value, EngineError> + Send>>,
    declaration: EventDeclaration,
}

impl<D, M> AnonymousCallableEvent<D, M> {
    pub fn new<F>(callable: F) -> Self
    where
        F: FnOnce(&EventContext<D, M>) -> Result<serde_json::Value, EngineError> + Send + 'static,
    {
        Self { callable: Some(Box::new(callable)), declaration: EventDeclaration::default() }
    }

    pub fn with_declaration(mut self, declaration: EventDeclaration) -> Self {
        self.declaration = declaration;
        self
    }
}

impl<D, M> Event<D, M> for AnonymousCallableEvent<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn execute(&mut self, ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError> {
        let callable = self.callable.take().ok_or(EngineError::AlreadyExecuted)?;
        callable(ctx)
    }

    fn declaration(&self) -> EventDeclaration {
        self.declaration.clone()
    }
}
