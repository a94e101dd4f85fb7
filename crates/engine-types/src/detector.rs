use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// External collaborator: the representative device interface used by
/// built-in camera/detector events. A concrete hardware driver is out of
/// scope here — only the interface is defined.
pub trait Detector<D, M>: Send + Sync {
    fn arm(&self, count: Option<u32>);
    fn start(&self);
    fn stop(&self);
    fn is_stopped(&self) -> bool;
    fn pop_data(&self, timeout: Option<Duration>) -> Option<(D, M)>;
}

/// A reference `Detector` that replays a fixed queue of frames — used by the
/// demo binary and the crate's own tests, not a production hardware driver.
pub struct MockDetector<D, M> {
    frames: Mutex<VecDeque<(D, M)>>,
    stopped: Mutex<bool>,
}

impl<D, M> MockDetector<D, M> {
    pub fn new(frames: Vec<(D, M)>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            stopped: Mutex::new(true),
        }
    }
}

impl<D, M> Detector<D, M> for MockDetector<D, M>
where
    D: Send,
    M: Send,
{
    fn arm(&self, _count: Option<u32>) {
        *self.stopped.lock().expect("detector mutex poisoned") = false;
    }

    fn start(&self) {
        *self.stopped.lock().expect("detector mutex poisoned") = false;
    }

    fn stop(&self) {
        *self.stopped.lock().expect("detector mutex poisoned") = true;
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock().expect("detector mutex poisoned")
    }

    fn pop_data(&self, _timeout: Option<Duration>) -> Option<(D, M)> {
        self.frames.lock().expect("detector mutex poisoned").pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_queued_frames_in_order() {
        let detector = MockDetector::new(vec![(1u8, "a"), (2u8, "b")]);
        detector.arm(Some(2));
        assert!(!detector.is_stopped());
        assert_eq!(detector.pop_data(None), Some((1u8, "a")));
        assert_eq!(detector.pop_data(None), Some((2u8, "b")));
        assert_eq!(detector.pop_data(None), None);
        detector.stop();
        assert!(detector.is_stopped());
    }
}
