use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use engine_types::{DataCoordinates, DataCoordinatesIterator, EngineError, Notification, Possibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum DataStage {
    Acquired = 1,
    Processed = 2,
    Stored = 3,
}

struct DataRecord<D, M> {
    stage: DataStage,
    data: Option<D>,
    metadata: Option<M>,
}

struct FutureState<D, M> {
    complete: bool,
    return_value: Option<serde_json::Value>,
    exception: Option<String>,
    notifications: Vec<Notification>,
    data: HashMap<DataCoordinates, DataRecord<D, M>>,
}

/// Shared state behind a [`Future`], also reachable (via `Weak`) from the
/// event that owns it and from the `DataHandler`. See the module-level
/// design note on the event↔future weak back-reference.
pub(crate) struct FutureInner<D, M> {
    state: Mutex<FutureState<D, M>>,
    execution_condvar: Condvar,
    data_condvar: Condvar,
    coordinates_iterator: Option<Arc<dyn DataCoordinatesIterator>>,
}

impl<D, M> FutureInner<D, M> {
    fn new(coordinates_iterator: Option<Arc<dyn DataCoordinatesIterator>>) -> Self {
        Self {
            state: Mutex::new(FutureState {
                complete: false,
                return_value: None,
                exception: None,
                notifications: Vec::new(),
                data: HashMap::new(),
            }),
            execution_condvar: Condvar::new(),
            data_condvar: Condvar::new(),
            coordinates_iterator,
        }
    }

    /// Appends a notification the owning event published, in emission
    /// order. Called before `notify_execution_complete` for the final
    /// `EventExecuted` notification, which is how publish-then-signal
    /// ordering is implemented.
    pub(crate) fn notify_of_event_notification(&self, notification: Notification) {
        let mut state = self.state.lock().expect("future mutex poisoned");
        state.notifications.push(notification);
    }

    pub(crate) fn notify_execution_complete(
        &self,
        return_value: Option<serde_json::Value>,
        exception: Option<String>,
    ) {
        let mut state = self.state.lock().expect("future mutex poisoned");
        state.return_value = return_value;
        state.exception = exception;
        state.complete = true;
        self.execution_condvar.notify_all();
    }

    pub(crate) fn notify_data(&self, coords: DataCoordinates, stage: DataStage, data: Option<D>, metadata: Option<M>)
    where
        D: Clone,
        M: Clone,
    {
        let mut state = self.state.lock().expect("future mutex poisoned");
        let entry = state.data.entry(coords).or_insert_with(|| DataRecord {
            stage: DataStage::Acquired,
            data: None,
            metadata: None,
        });
        if stage >= entry.stage {
            entry.stage = stage;
        }
        if let Some(data) = data {
            entry.data = Some(data);
        }
        if let Some(metadata) = metadata {
            entry.metadata = Some(metadata);
        }
        drop(state);
        self.data_condvar.notify_all();
    }
}

/// Per-event handle returned by `Engine::submit`. Synchronizes between the
/// submitter, the worker executing the event, and the data pipeline.
///
/// `event_complete` is signalled exactly once, and a waiter that observes
/// completion is guaranteed to see every notification the event published
/// before it finished (publish-then-signal ordering).
pub struct Future<D, M> {
    pub(crate) inner: Arc<FutureInner<D, M>>,
}

impl<D, M> Clone for Future<D, M> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<D, M> Future<D, M>
where
    D: Clone,
    M: Clone,
{
    pub(crate) fn new(coordinates_iterator: Option<Arc<dyn DataCoordinatesIterator>>) -> Self {
        Self { inner: Arc::new(FutureInner::new(coordinates_iterator)) }
    }

    /// Blocks until the event completes, returning its result, or fails
    /// with `Timeout` if `timeout` elapses first. Re-raises the event's
    /// exception (as `EngineError::Device`) if it raised one.
    pub fn await_execution(&self, timeout: Option<Duration>) -> Result<serde_json::Value, EngineError> {
        let mut state = self.inner.state.lock().expect("future mutex poisoned");
        let deadline = timeout.map(|d| Instant::now() + d);
        while !state.complete {
            state = match deadline {
                None => self.inner.execution_condvar.wait(state).expect("future mutex poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EngineError::Timeout("await_execution".to_string()));
                    }
                    let (guard, result) = self
                        .inner
                        .execution_condvar
                        .wait_timeout(state, deadline - now)
                        .expect("future mutex poisoned");
                    if result.timed_out() && !guard.complete {
                        return Err(EngineError::Timeout("await_execution".to_string()));
                    }
                    guard
                }
            };
        }
        if let Some(message) = &state.exception {
            return Err(EngineError::Device(message.clone()));
        }
        Ok(state.return_value.clone().unwrap_or(serde_json::Value::Null))
    }

    /// Blocks until the datum at `coords` has reached the requested
    /// lifecycle stage (`processed`/`stored`), returning the requested
    /// parts. Fails fast with `InvalidCoordinates` if the event's declared
    /// iterator proves `coords` unreachable; logs a warning and proceeds if
    /// the iterator cannot decide.
    pub fn await_data(
        &self,
        coords: DataCoordinates,
        return_data: bool,
        return_metadata: bool,
        processed: bool,
        stored: bool,
        timeout: Option<Duration>,
    ) -> Result<(Option<D>, Option<M>), EngineError> {
        if let Some(iterator) = &self.inner.coordinates_iterator {
            match iterator.might_produce(&coords) {
                Possibility::No => {
                    return Err(EngineError::InvalidCoordinates(coords.to_string()));
                }
                Possibility::Unknown => {
                    tracing::warn!(%coords, "await_data: coordinates possibly outside the event's declared iterator");
                }
                Possibility::Yes => {}
            }
        }

        let required = if stored {
            DataStage::Stored
        } else if processed {
            DataStage::Processed
        } else {
            DataStage::Acquired
        };

        let mut state = self.inner.state.lock().expect("future mutex poisoned");
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if let Some(record) = state.data.get(&coords) {
                if record.stage >= required {
                    let data = if return_data { record.data.clone() } else { None };
                    let metadata = if return_metadata { record.metadata.clone() } else { None };
                    return Ok((data, metadata));
                }
            }
            state = match deadline {
                None => self.inner.data_condvar.wait(state).expect("future mutex poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EngineError::Timeout(format!("await_data({coords})")));
                    }
                    let (guard, result) = self
                        .inner
                        .data_condvar
                        .wait_timeout(state, deadline - now)
                        .expect("future mutex poisoned");
                    if result.timed_out() {
                        let satisfied = guard.data.get(&coords).is_some_and(|r| r.stage >= required);
                        if !satisfied {
                            return Err(EngineError::Timeout(format!("await_data({coords})")));
                        }
                    }
                    guard
                }
            };
        }
    }

    /// The notifications this event published, in emission order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.state.lock().expect("future mutex poisoned").notifications.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().expect("future mutex poisoned").complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn future() -> Future<i32, String> {
        Future::new(None)
    }

    #[test]
    fn await_execution_blocks_until_signalled() {
        let f = future();
        let inner = Arc::clone(&f.inner);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            inner.notify_execution_complete(Some(serde_json::json!(42)), None);
        });
        let result = f.await_execution(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(result, serde_json::json!(42));
        handle.join().unwrap();
    }

    #[test]
    fn await_execution_reraises_exception() {
        let f = future();
        f.inner.notify_execution_complete(None, Some("boom".to_string()));
        let err = f.await_execution(Some(Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, EngineError::Device(msg) if msg == "boom"));
    }

    #[test]
    fn await_execution_times_out() {
        let f = future();
        let err = f.await_execution(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[test]
    fn signalled_exactly_once_observed_by_many_waiters() {
        let f = future();
        let inner = Arc::clone(&f.inner);
        inner.notify_execution_complete(Some(serde_json::json!(1)), None);
        for _ in 0..3 {
            assert_eq!(f.await_execution(Some(Duration::from_millis(10))).unwrap(), serde_json::json!(1));
        }
    }

    #[test]
    fn await_data_monotonic_stage_satisfies_earlier_requests() {
        let f = future();
        f.inner.notify_data(
            DataCoordinates::new([("time", 0i64)]),
            DataStage::Stored,
            Some(7),
            Some("meta".to_string()),
        );
        // A later-arriving "processed" request is already satisfied by "stored".
        let (data, meta) = f
            .await_data(DataCoordinates::new([("time", 0i64)]), true, true, true, false, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(data, Some(7));
        assert_eq!(meta, Some("meta".to_string()));
    }

    #[test]
    fn await_data_rejects_impossible_coordinates() {
        use engine_types::FixedCoordinatesIterator;
        let iterator: Arc<dyn DataCoordinatesIterator> =
            Arc::new(FixedCoordinatesIterator::new(vec![DataCoordinates::new([("time", 0i64)])]));
        let f: Future<i32, String> = Future::new(Some(iterator));
        let err = f
            .await_data(DataCoordinates::new([("time", 99i64)]), true, true, false, false, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCoordinates(_)));
    }
}
