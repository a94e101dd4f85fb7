use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use engine_types::{DataCoordinates, DataStorage, EngineError, Notification};

use crate::future::{DataStage, FutureInner};
use crate::queue::Queue;

/// User-supplied transform run by the intake worker between the "acquired"
/// and "processed" lifecycle stages.
///
/// Returns zero, one, or many produced `(coords, data, metadata)` entries —
/// an empty `Vec` discards the datum entirely, and a non-empty one fans out
/// to every returned coordinate. If none of the returned coordinates match
/// the ones the processor was given, the original in-flight entry is
/// dropped rather than silently re-keyed — a processor that renames its
/// output is expected to have already consumed the original via its own
/// side channel. Without a processor configured at all, the intake worker
/// skips this stage entirely and transfers straight toward storage.
pub type Processor<D, M> = Box<dyn Fn(DataCoordinates, D, M) -> Vec<(DataCoordinates, D, M)> + Send + Sync>;

struct IntakeItem<D, M> {
    coords: DataCoordinates,
    data: D,
    metadata: M,
    future: Weak<FutureInner<D, M>>,
}

struct InFlightEntry<D, M> {
    data: Option<D>,
    metadata: Option<M>,
    future: Weak<FutureInner<D, M>>,
}

struct Shared<D, M> {
    intake: Queue<IntakeItem<D, M>>,
    processed: Queue<DataCoordinates>,
    in_flight: Mutex<HashMap<DataCoordinates, InFlightEntry<D, M>>>,
    storage: Option<Arc<dyn DataStorage<D, M>>>,
    publish: Box<dyn Fn(Notification) + Send + Sync>,
}

/// Intake → (optional processor) → (optional storage) pipeline for
/// produced data, with live access to in-flight entries so `Future::
/// await_data` and `DataHandler::get` can observe a datum before it is
/// stored.
///
/// The intake and processed queues are ordinary FIFO [`Queue`]s rather than
/// peek-then-remove queues: visibility is achieved instead by inserting into
/// `in_flight` *before* the item is pushed onto the queue (see `put` and the
/// processor branch of `intake_loop`), so a concurrent `get` can never
/// observe a coordinate as dequeued-but-not-yet-visible. An item stays in
/// `in_flight` from the moment `put` is called until it is handed off to
/// storage (if one is configured) or, absent storage, until whichever stage
/// — acquired with no processor, processed with one — turns out to be
/// terminal for it.
pub struct DataHandler<D, M> {
    shared: Arc<Shared<D, M>>,
    intake_handle: Mutex<Option<JoinHandle<()>>>,
    storage_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D, M> DataHandler<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn new(
        processor: Option<Processor<D, M>>,
        storage: Option<Arc<dyn DataStorage<D, M>>>,
        publish: Box<dyn Fn(Notification) + Send + Sync>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            intake: Queue::new(),
            processed: Queue::new(),
            in_flight: Mutex::new(HashMap::new()),
            storage: storage.clone(),
            publish,
        });

        let intake_handle = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("data-handler-intake".to_string())
                .spawn(move || intake_loop(shared, processor))
                .expect("failed to spawn data handler intake thread")
        };

        let storage_handle = storage.map(|_| {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("data-handler-storage".to_string())
                .spawn(move || storage_loop(shared))
                .expect("failed to spawn data handler storage thread")
        });

        Arc::new(Self {
            shared,
            intake_handle: Mutex::new(Some(intake_handle)),
            storage_handle: Mutex::new(storage_handle),
        })
    }

    /// Enqueues a produced datum for processing/storage, associating it
    /// with the owning event's future (if the caller still holds one).
    pub fn put(
        &self,
        coords: DataCoordinates,
        data: D,
        metadata: M,
        future: Weak<FutureInner<D, M>>,
    ) -> Result<(), EngineError> {
        {
            let mut in_flight = self.shared.in_flight.lock().expect("data handler mutex poisoned");
            in_flight.insert(
                coords.clone(),
                InFlightEntry { data: Some(data.clone()), metadata: Some(metadata.clone()), future: future.clone() },
            );
        }
        if let Some(f) = future.upgrade() {
            f.notify_data(coords.clone(), DataStage::Acquired, Some(data.clone()), Some(metadata.clone()));
        }
        (self.shared.publish)(Notification::data_acquired(coords.clone()));
        self.shared.intake.put(IntakeItem { coords, data, metadata, future })
    }

    /// Returns the data/metadata currently known for `coords`: from the
    /// in-flight map if still present, falling back to the storage
    /// back-end (if configured) once the entry has been finalized there.
    pub fn get(&self, coords: &DataCoordinates) -> Option<(Option<D>, Option<M>)> {
        {
            let in_flight = self.shared.in_flight.lock().expect("data handler mutex poisoned");
            if let Some(entry) = in_flight.get(coords) {
                return Some((entry.data.clone(), entry.metadata.clone()));
            }
        }
        self.shared.storage.as_ref().and_then(|storage| {
            if storage.contains(coords) {
                Some((storage.get_data(coords), storage.get_metadata(coords)))
            } else {
                None
            }
        })
    }

    /// Shuts down the intake and (if configured) storage worker threads,
    /// draining whatever has already been enqueued, and waits for both to
    /// exit.
    pub fn finish(&self) {
        self.shared.intake.shutdown(false);
        if let Some(handle) = self.intake_handle.lock().expect("data handler mutex poisoned").take() {
            let _ = handle.join();
        }
        self.shared.processed.shutdown(false);
        if let Some(handle) = self.storage_handle.lock().expect("data handler mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn intake_loop<D, M>(shared: Arc<Shared<D, M>>, processor: Option<Processor<D, M>>)
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    loop {
        let item = match shared.intake.get() {
            Ok(item) => item,
            Err(EngineError::Shutdown) => break,
            Err(_) => break,
        };

        match &processor {
            None => {
                // No processing stage configured: the acquired entry already
                // in `in_flight` is the datum's state as far as this worker
                // is concerned, so transfer it straight toward storage
                // without a "processed" notification.
                if shared.storage.is_some() {
                    let _ = shared.processed.put(item.coords.clone());
                }
            }
            Some(processor) => {
                let outputs = processor(item.coords.clone(), item.data.clone(), item.metadata.clone());

                if outputs.is_empty() {
                    tracing::debug!(coords = %item.coords, "processor discarded datum");
                    shared.in_flight.lock().expect("data handler mutex poisoned").remove(&item.coords);
                } else {
                    if !outputs.iter().any(|(coords, ..)| *coords == item.coords) {
                        tracing::warn!(
                            original = %item.coords,
                            "processor did not reproduce original coordinates; dropping original in-flight entry"
                        );
                        shared.in_flight.lock().expect("data handler mutex poisoned").remove(&item.coords);
                    }

                    for (coords, data, metadata) in outputs {
                        {
                            let mut in_flight = shared.in_flight.lock().expect("data handler mutex poisoned");
                            in_flight.insert(
                                coords.clone(),
                                InFlightEntry {
                                    data: Some(data.clone()),
                                    metadata: Some(metadata.clone()),
                                    future: item.future.clone(),
                                },
                            );
                        }
                        if let Some(f) = item.future.upgrade() {
                            f.notify_data(coords.clone(), DataStage::Processed, Some(data), Some(metadata));
                        }
                        (shared.publish)(Notification::data_processed(coords.clone()));

                        if shared.storage.is_some() {
                            let _ = shared.processed.put(coords);
                        }
                    }
                }
            }
        }
        shared.intake.task_done();
    }
}

fn storage_loop<D, M>(shared: Arc<Shared<D, M>>)
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    let storage = shared.storage.clone().expect("storage_loop spawned without a configured DataStorage");
    loop {
        let coords = match shared.processed.get() {
            Ok(coords) => coords,
            Err(EngineError::Shutdown) => break,
            Err(_) => break,
        };

        let entry = shared.in_flight.lock().expect("data handler mutex poisoned").remove(&coords);
        if let Some(entry) = entry {
            if let (Some(data), Some(metadata)) = (entry.data.clone(), entry.metadata.clone()) {
                if let Err(err) = storage.put(coords.clone(), data, metadata) {
                    tracing::error!(coords = %coords, error = %err, "storage backend rejected datum");
                }
            }
            if let Some(f) = entry.future.upgrade() {
                f.notify_data(coords.clone(), DataStage::Stored, None, None);
            }
        }
        (shared.publish)(Notification::data_stored(coords));
        shared.processed.task_done();
    }
    storage.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::InMemoryStorage;
    use std::sync::mpsc;
    use std::time::Duration;

    fn no_op_publish() -> Box<dyn Fn(Notification) + Send + Sync> {
        Box::new(|_| {})
    }

    #[test]
    fn round_trip_without_storage_or_processor() {
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(None, None, no_op_publish());
        let coords = DataCoordinates::new([("time", 0i64)]);
        handler.put(coords.clone(), 42, "meta".to_string(), Weak::new()).unwrap();
        // Give the intake worker a moment to process the single item.
        std::thread::sleep(Duration::from_millis(50));
        let (data, metadata) = handler.get(&coords).unwrap();
        assert_eq!(data, Some(42));
        assert_eq!(metadata, Some("meta".to_string()));
        handler.finish();
    }

    #[test]
    fn stores_through_to_backend_when_configured() {
        let storage: Arc<InMemoryStorage<i32, String>> = Arc::new(InMemoryStorage::new());
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(None, Some(storage.clone()), no_op_publish());
        let coords = DataCoordinates::new([("time", 0i64)]);
        handler.put(coords.clone(), 7, "m".to_string(), Weak::new()).unwrap();
        handler.finish();
        assert!(storage.is_finished());
        assert_eq!(storage.get_data(&coords), Some(7));
    }

    #[test]
    fn processor_discard_drops_in_flight_entry() {
        let (tx, rx) = mpsc::channel();
        let processor: Processor<i32, String> = Box::new(move |coords, data, metadata| {
            tx.send(()).unwrap();
            let _ = (&coords, &data, &metadata);
            Vec::new()
        });
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(Some(processor), None, no_op_publish());
        let coords = DataCoordinates::new([("time", 0i64)]);
        handler.put(coords.clone(), 1, "m".to_string(), Weak::new()).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(handler.get(&coords).is_none());
        handler.finish();
    }

    #[test]
    fn processor_renaming_coordinates_drops_original_entry() {
        let renamed = DataCoordinates::new([("time", 1i64)]);
        let renamed_clone = renamed.clone();
        let processor: Processor<i32, String> =
            Box::new(move |_coords, data, metadata| vec![(renamed_clone.clone(), data, metadata)]);
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(Some(processor), None, no_op_publish());
        let original = DataCoordinates::new([("time", 0i64)]);
        handler.put(original.clone(), 1, "m".to_string(), Weak::new()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handler.get(&original).is_none(), "original coordinates must be dropped on rename");
        let (data, metadata) = handler.get(&renamed).unwrap();
        assert_eq!(data, Some(1));
        assert_eq!(metadata, Some("m".to_string()));
        handler.finish();
    }

    #[test]
    fn processor_fans_out_to_multiple_coordinates() {
        let a = DataCoordinates::new([("time", 0i64)]);
        let b = DataCoordinates::new([("time", 1i64)]);
        let (a_clone, b_clone) = (a.clone(), b.clone());
        let processor: Processor<i32, String> = Box::new(move |_coords, data, metadata| {
            vec![(a_clone.clone(), data, metadata.clone()), (b_clone.clone(), data * 2, metadata)]
        });
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(Some(processor), None, no_op_publish());
        handler.put(a.clone(), 5, "m".to_string(), Weak::new()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handler.get(&a).unwrap().0, Some(5));
        assert_eq!(handler.get(&b).unwrap().0, Some(10));
        handler.finish();
    }

    #[test]
    fn no_processor_skips_the_processed_notification() {
        let received: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let publish: Box<dyn Fn(Notification) + Send + Sync> =
            Box::new(move |n| sink.lock().unwrap().push(n));
        let handler: Arc<DataHandler<i32, String>> = DataHandler::new(None, None, publish);
        let coords = DataCoordinates::new([("time", 0i64)]);
        handler.put(coords.clone(), 1, "m".to_string(), Weak::new()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let tags: Vec<_> = received.lock().unwrap().iter().map(|n| n.tag()).collect();
        assert!(tags.contains(&engine_types::NotificationTag::DataAcquired));
        assert!(!tags.contains(&engine_types::NotificationTag::DataProcessed));
        handler.finish();
    }
}
