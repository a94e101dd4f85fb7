use std::collections::HashMap;
use std::sync::Mutex;

use crate::coordinates::DataCoordinates;
use crate::error::EngineError;

/// External collaborator: a concrete storage back-end for acquired data.
///
/// A concrete storage back-end is out of scope here — only the interface is
/// defined. `put` consumes ownership of the data: once it returns, the
/// caller must not assume it still has access to the value.
pub trait DataStorage<D, M>: Send + Sync {
    fn put(&self, coords: DataCoordinates, data: D, metadata: M) -> Result<(), EngineError>;
    fn get_data(&self, coords: &DataCoordinates) -> Option<D>;
    fn get_metadata(&self, coords: &DataCoordinates) -> Option<M>;
    fn contains(&self, coords: &DataCoordinates) -> bool;
    /// Signals the end of the stream; called once by the data handler's
    /// storage worker on shutdown.
    fn finish(&self);
}

/// A reference `DataStorage` used by the demo binary and the crate's own
/// tests — not a production storage back-end.
#[derive(Default)]
pub struct InMemoryStorage<D, M> {
    entries: Mutex<HashMap<DataCoordinates, (D, M)>>,
    finished: Mutex<bool>,
}

impl<D, M> InMemoryStorage<D, M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            finished: Mutex::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().expect("storage mutex poisoned")
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("storage mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D, M> DataStorage<D, M> for InMemoryStorage<D, M>
where
    D: Clone + Send,
    M: Clone + Send,
{
    fn put(&self, coords: DataCoordinates, data: D, metadata: M) -> Result<(), EngineError> {
        self.entries
            .lock()
            .expect("storage mutex poisoned")
            .insert(coords, (data, metadata));
        Ok(())
    }

    fn get_data(&self, coords: &DataCoordinates) -> Option<D> {
        self.entries
            .lock()
            .expect("storage mutex poisoned")
            .get(coords)
            .map(|(data, _)| data.clone())
    }

    fn get_metadata(&self, coords: &DataCoordinates) -> Option<M> {
        self.entries
            .lock()
            .expect("storage mutex poisoned")
            .get(coords)
            .map(|(_, metadata)| metadata.clone())
    }

    fn contains(&self, coords: &DataCoordinates) -> bool {
        self.entries.lock().expect("storage mutex poisoned").contains_key(coords)
    }

    fn finish(&self) {
        *self.finished.lock().expect("storage mutex poisoned") = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_put_get() {
        let storage: InMemoryStorage<Vec<u8>, serde_json::Value> = InMemoryStorage::new();
        let coords = DataCoordinates::new([("time", 0i64)]);
        storage.put(coords.clone(), vec![1, 2, 3], serde_json::json!({"ok": true})).unwrap();
        assert_eq!(storage.get_data(&coords), Some(vec![1, 2, 3]));
        assert!(storage.contains(&coords));
        assert!(!storage.is_finished());
        storage.finish();
        assert!(storage.is_finished());
    }
}
