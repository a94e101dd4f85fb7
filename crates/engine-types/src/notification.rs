use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinates::DataCoordinates;

/// Broad category a [`Notification`] belongs to, used for coarse-grained
/// subscriber filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCategory {
    Event,
    Data,
    Storage,
    Device,
}

/// The concrete payload/kind of a notification.
///
/// `Custom` is the escape hatch for user-defined notification types,
/// carrying a type name (for filtering) and an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationKind {
    /// An event finished executing. `error` is the device error message, if
    /// the event raised one.
    EventExecuted { error: Option<String> },
    /// Data reached the "acquired" lifecycle stage at `coords`.
    DataAcquired { coords: DataCoordinates },
    /// Data reached the "processed" lifecycle stage at `coords`.
    DataProcessed { coords: DataCoordinates },
    /// Data was handed off to the storage back-end at `coords`.
    DataStored { coords: DataCoordinates },
    /// A user-defined notification, identified by `name` for filtering.
    Custom { name: String, payload: serde_json::Value },
}

impl NotificationKind {
    pub fn category(&self) -> NotificationCategory {
        match self {
            NotificationKind::EventExecuted { .. } => NotificationCategory::Event,
            NotificationKind::DataAcquired { .. } | NotificationKind::DataProcessed { .. } => {
                NotificationCategory::Data
            }
            NotificationKind::DataStored { .. } => NotificationCategory::Storage,
            NotificationKind::Custom { .. } => NotificationCategory::Device,
        }
    }

    fn tag(&self) -> NotificationTag {
        match self {
            NotificationKind::EventExecuted { .. } => NotificationTag::EventExecuted,
            NotificationKind::DataAcquired { .. } => NotificationTag::DataAcquired,
            NotificationKind::DataProcessed { .. } => NotificationTag::DataProcessed,
            NotificationKind::DataStored { .. } => NotificationTag::DataStored,
            NotificationKind::Custom { name, .. } => NotificationTag::Custom(name.clone()),
        }
    }
}

/// A concrete [`NotificationKind`] discriminant, used to subscribe to one
/// specific notification type rather than a whole category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationTag {
    EventExecuted,
    DataAcquired,
    DataProcessed,
    DataStored,
    Custom(String),
}

/// A timestamped, categorized, typed message published by events, the
/// engine, or the data handler.
///
/// Identity is by `uuid`: two notifications with identical contents are
/// still distinct values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub uuid: Uuid,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(description: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            description: description.into(),
            timestamp: Utc::now(),
            uuid: Uuid::new_v4(),
            kind,
        }
    }

    pub fn event_executed(error: Option<String>) -> Self {
        Self::new(
            "An event has completed execution",
            NotificationKind::EventExecuted { error },
        )
    }

    pub fn data_acquired(coords: DataCoordinates) -> Self {
        Self::new("Data has been acquired", NotificationKind::DataAcquired { coords })
    }

    pub fn data_processed(coords: DataCoordinates) -> Self {
        Self::new("Data has been processed", NotificationKind::DataProcessed { coords })
    }

    pub fn data_stored(coords: DataCoordinates) -> Self {
        Self::new(
            "Data has been stored in a Storage object",
            NotificationKind::DataStored { coords },
        )
    }

    pub fn category(&self) -> NotificationCategory {
        self.kind.category()
    }

    pub fn tag(&self) -> NotificationTag {
        self.kind.tag()
    }
}

impl PartialEq for Notification {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}
impl Eq for Notification {}

/// Subscriber filter: select notifications by broad category, by a specific
/// notification type, or accept everything (`None`-equivalent).
#[derive(Debug, Clone)]
pub enum NotificationFilter {
    Any,
    Category(NotificationCategory),
    Tag(NotificationTag),
}

impl NotificationFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            NotificationFilter::Any => true,
            NotificationFilter::Category(category) => notification.category() == *category,
            NotificationFilter::Tag(tag) => notification.tag() == *tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_by_uuid_not_contents() {
        let a = Notification::event_executed(None);
        let b = Notification::event_executed(None);
        assert_ne!(a, b, "two notifications with identical contents are still distinct");
    }

    #[test]
    fn filter_by_category() {
        let n = Notification::data_stored(DataCoordinates::new([("time", 0i64)]));
        assert!(NotificationFilter::Category(NotificationCategory::Storage).matches(&n));
        assert!(!NotificationFilter::Category(NotificationCategory::Event).matches(&n));
    }

    #[test]
    fn filter_by_tag() {
        let n = Notification::data_acquired(DataCoordinates::new([("time", 0i64)]));
        assert!(NotificationFilter::Tag(NotificationTag::DataAcquired).matches(&n));
        assert!(!NotificationFilter::Tag(NotificationTag::DataStored).matches(&n));
    }
}
