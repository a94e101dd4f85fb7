//! Shared data model for the execution engine core.
//!
//! No thread, queue, or dispatch logic lives here, only the value types and
//! external-collaborator traits that `engine-core` and any device/storage
//! back-end implementation depend on.

mod coordinates;
mod detector;
mod error;
mod notification;
mod storage;

pub use coordinates::{
    AxisIndex, DataCoordinates, DataCoordinatesIterator, FixedCoordinatesIterator, Possibility,
    UnboundedCoordinatesIterator,
};
pub use detector::{Detector, MockDetector};
pub use error::EngineError;
pub use notification::{Notification, NotificationCategory, NotificationFilter, NotificationKind, NotificationTag};
pub use storage::{DataStorage, InMemoryStorage};
