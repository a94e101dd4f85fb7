use std::fmt;

use serde::{Deserialize, Serialize};

/// An index along one axis of a [`DataCoordinates`] value: either an integer
/// position (e.g. a time point) or a string label (e.g. a channel name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisIndex {
    Int(i64),
    Name(String),
}

impl From<i64> for AxisIndex {
    fn from(value: i64) -> Self {
        AxisIndex::Int(value)
    }
}

impl From<&str> for AxisIndex {
    fn from(value: &str) -> Self {
        AxisIndex::Name(value.to_string())
    }
}

impl From<String> for AxisIndex {
    fn from(value: String) -> Self {
        AxisIndex::Name(value)
    }
}

/// An ordered, axis-keyed identifier for a produced datum.
///
/// Equality and hashing are defined over the ordered sequence of
/// `(axis, index)` pairs: two coordinates are equal only if they name the
/// same axes in the same order with the same indices. Axis names must be
/// unique within a single value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataCoordinates {
    axes: Vec<(String, AxisIndex)>,
}

impl DataCoordinates {
    /// Builds coordinates from an ordered list of `(axis, index)` pairs.
    ///
    /// Panics if an axis name repeats, since that would violate the
    /// uniqueness invariant silently.
    pub fn new<I, A, X>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, X)>,
        A: Into<String>,
        X: Into<AxisIndex>,
    {
        let mut axes = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (axis, index) in pairs {
            let axis = axis.into();
            if !seen.insert(axis.clone()) {
                panic!("duplicate axis name in DataCoordinates: {axis}");
            }
            axes.push((axis, index.into()));
        }
        Self { axes }
    }

    pub fn get(&self, axis: &str) -> Option<&AxisIndex> {
        self.axes.iter().find(|(name, _)| name == axis).map(|(_, idx)| idx)
    }

    pub fn axes(&self) -> impl Iterator<Item = (&str, &AxisIndex)> {
        self.axes.iter().map(|(name, idx)| (name.as_str(), idx))
    }

    /// True if every `(axis, index)` pair in `self` also appears in `other`
    /// (`self ⊆ other`).
    pub fn is_subset_of(&self, other: &DataCoordinates) -> bool {
        self.axes.iter().all(|pair| other.axes.contains(pair))
    }
}

impl fmt::Display for DataCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (axis, idx)) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match idx {
                AxisIndex::Int(v) => write!(f, "{axis}: {v}")?,
                AxisIndex::Name(v) => write!(f, "{axis}: {v:?}")?,
            }
        }
        write!(f, "}}")
    }
}

/// Three-valued answer to "could this iterator ever produce these
/// coordinates?", used by [`Future::await_data`] to reject impossible waits
/// early without falsely rejecting waits it cannot prove impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Possibility {
    Yes,
    No,
    Unknown,
}

/// A lazy, finite-or-infinite stream of [`DataCoordinates`].
pub trait DataCoordinatesIterator: Send + Sync {
    /// Best-effort predicate used to reject impossible `await_data` calls
    /// early. Implementations that cannot decide should return
    /// [`Possibility::Unknown`] rather than guessing.
    fn might_produce(&self, coords: &DataCoordinates) -> Possibility;
}

/// A [`DataCoordinatesIterator`] backed by a fixed, known-in-advance list of
/// coordinates — the common case for events that declare their full
/// acquisition plan up front.
#[derive(Debug, Clone)]
pub struct FixedCoordinatesIterator {
    coords: Vec<DataCoordinates>,
}

impl FixedCoordinatesIterator {
    pub fn new(coords: Vec<DataCoordinates>) -> Self {
        Self { coords }
    }

    pub fn coords(&self) -> &[DataCoordinates] {
        &self.coords
    }
}

impl DataCoordinatesIterator for FixedCoordinatesIterator {
    fn might_produce(&self, coords: &DataCoordinates) -> Possibility {
        if self.coords.contains(coords) {
            Possibility::Yes
        } else {
            Possibility::No
        }
    }
}

/// A [`DataCoordinatesIterator`] that cannot decide membership — used by
/// events that generate coordinates dynamically (e.g. from a processor) and
/// have no fixed plan to check against.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedCoordinatesIterator;

impl DataCoordinatesIterator for UnboundedCoordinatesIterator {
    fn might_produce(&self, _coords: &DataCoordinates) -> Possibility {
        Possibility::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_requires_same_order_and_pairs() {
        let a = DataCoordinates::new([("time", AxisIndex::Int(0)), ("channel", AxisIndex::from("DAPI"))]);
        let b = DataCoordinates::new([("time", AxisIndex::Int(0)), ("channel", AxisIndex::from("DAPI"))]);
        let c = DataCoordinates::new([("channel", AxisIndex::from("DAPI")), ("time", AxisIndex::Int(0))]);
        assert_eq!(a, b);
        assert_ne!(a, c, "pair order is significant for equality");
    }

    #[test]
    fn subset_predicate() {
        let a = DataCoordinates::new([("time", AxisIndex::Int(0))]);
        let b = DataCoordinates::new([("time", AxisIndex::Int(0)), ("channel", AxisIndex::from("DAPI"))]);
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
    }

    #[test]
    fn fixed_iterator_might_produce() {
        let iter = FixedCoordinatesIterator::new(vec![DataCoordinates::new([("time", AxisIndex::Int(0))])]);
        assert_eq!(
            iter.might_produce(&DataCoordinates::new([("time", AxisIndex::Int(0))])),
            Possibility::Yes
        );
        assert_eq!(
            iter.might_produce(&DataCoordinates::new([("time", AxisIndex::Int(1))])),
            Possibility::No
        );
    }

    #[test]
    #[should_panic(expected = "duplicate axis name")]
    fn duplicate_axis_names_panic() {
        DataCoordinates::new([("time", AxisIndex::Int(0)), ("time", AxisIndex::Int(1))]);
    }
}
