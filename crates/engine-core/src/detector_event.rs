use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use engine_types::{DataCoordinates, Detector, EngineError};

use crate::event::{Event, EventContext, EventDeclaration};

/// Built-in event: polls a [`Detector`] once for its next frame and, if one
/// arrives within `timeout`, hands it to the data pipeline at `coords` via
/// `EventContext::put_data`. Declares `thread_name` so repeated acquisitions
/// against the same detector serialize onto one worker.
pub struct AcquireFrameEvent<Det, D, M> {
    detector: Arc<Det>,
    coords: DataCoordinates,
    timeout: Option<Duration>,
    thread_name: Option<String>,
    _data: PhantomData<fn() -> (D, M)>,
}

impl<Det, D, M> AcquireFrameEvent<Det, D, M> {
    pub fn new(detector: Arc<Det>, coords: DataCoordinates, timeout: Option<Duration>) -> Self {
        Self { detector, coords, timeout, thread_name: None, _data: PhantomData }
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = Some(thread_name.into());
        self
    }
}

impl<Det, D, M> Event<D, M> for AcquireFrameEvent<Det, D, M>
where
    Det: Detector<D, M> + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Returns `true` if a frame arrived and was handed off, `false` on a
    /// timed-out poll — not an error, since "no frame yet" is routine.
    fn execute(&mut self, ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError> {
        match self.detector.pop_data(self.timeout) {
            Some((data, metadata)) => {
                ctx.put_data(self.coords.clone(), data, metadata)?;
                Ok(serde_json::json!(true))
            }
            None => Ok(serde_json::json!(false)),
        }
    }

    fn declaration(&self) -> EventDeclaration {
        EventDeclaration { thread_name: self.thread_name.clone(), ..EventDeclaration::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use engine_types::MockDetector;
    use std::time::Duration;

    #[test]
    fn acquires_a_queued_frame_and_hands_it_to_the_pipeline() {
        let engine: Arc<Engine<Vec<u8>, String>> = Engine::new(EngineConfig::default());
        engine.install_data_handler(None, None);
        let detector = Arc::new(MockDetector::new(vec![(vec![1u8, 2, 3], "frame-0".to_string())]));
        detector.arm(Some(1));

        let coords = DataCoordinates::new([("frame", 0i64)]);
        let event = AcquireFrameEvent::new(detector, coords.clone(), Some(Duration::from_millis(100)));
        let future = engine.submit(Box::new(event), None, false).unwrap();
        let acquired = future.await_execution(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(acquired, serde_json::json!(true));

        let (data, metadata) = future
            .await_data(coords, true, true, false, false, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(data, Some(vec![1, 2, 3]));
        assert_eq!(metadata, Some("frame-0".to_string()));
        engine.shutdown();
    }

    #[test]
    fn reports_false_when_the_detector_has_nothing_queued() {
        let engine: Arc<Engine<Vec<u8>, String>> = Engine::new(EngineConfig::default());
        let detector: Arc<MockDetector<Vec<u8>, String>> = Arc::new(MockDetector::new(Vec::new()));
        detector.arm(None);
        let coords = DataCoordinates::new([("frame", 0i64)]);
        let event = AcquireFrameEvent::new(detector, coords, Some(Duration::from_millis(10)));
        let future = engine.submit(Box::new(event), None, false).unwrap();
        assert_eq!(
            future.await_execution(Some(Duration::from_secs(5))).unwrap(),
            serde_json::json!(false)
        );
        engine.shutdown();
    }
}
