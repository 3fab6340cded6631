use std::collections::BTreeSet;

use serde::Serialize;

use crate::{db::SensorId, error::InputError};

/// Sensors reporting "active" at one sampling tick. Ordered ascending, so
/// every derived list (opens, closes, versus participants) is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActiveSet(BTreeSet<SensorId>);

impl ActiveSet {
    /// Validates a reported list. Duplicates are rejected rather than merged;
    /// with a non-empty `roster`, unknown ids are rejected too.
    pub fn from_reported(reported: &[SensorId], roster: &[SensorId]) -> Result<Self, InputError> {
        let mut set = BTreeSet::new();
        for sensor_id in reported {
            if !roster.is_empty() && !roster.contains(sensor_id) {
                return Err(InputError::UnknownSensor(*sensor_id));
            }
            if !set.insert(*sensor_id) {
                return Err(InputError::DuplicateSensor(*sensor_id));
            }
        }
        Ok(Self(set))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, sensor_id: SensorId) -> bool {
        self.0.contains(&sensor_id)
    }

    /// Members of `self` missing from `other`, ascending.
    pub fn minus(&self, other: &ActiveSet) -> Vec<SensorId> {
        self.0.difference(&other.0).copied().collect()
    }

    /// The `n` lowest ids, ascending.
    pub fn lowest(&self, n: usize) -> Vec<SensorId> {
        self.0.iter().take(n).copied().collect()
    }

    pub fn to_vec(&self) -> Vec<SensorId> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<SensorId> for ActiveSet {
    fn from_iter<I: IntoIterator<Item = SensorId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_lists_are_canonicalised() {
        let set = ActiveSet::from_reported(&[9, 5, 13], &[]).unwrap();
        assert_eq!(set.to_vec(), vec![5, 9, 13]);
        assert_eq!(set.lowest(2), vec![5, 9]);
        assert_eq!(set.lowest(10), vec![5, 9, 13]);
    }

    #[test]
    fn duplicates_and_unknown_ids_are_rejected() {
        assert_eq!(
            ActiveSet::from_reported(&[5, 5], &[]),
            Err(InputError::DuplicateSensor(5))
        );
        assert_eq!(
            ActiveSet::from_reported(&[5, 42], &[5, 9]),
            Err(InputError::UnknownSensor(42))
        );
        assert!(ActiveSet::from_reported(&[], &[5]).unwrap().is_empty());
    }

    #[test]
    fn minus_is_set_difference() {
        let previous: ActiveSet = [5, 9].into_iter().collect();
        let current: ActiveSet = [9, 13].into_iter().collect();
        assert_eq!(previous.minus(&current), vec![5]);
        assert_eq!(current.minus(&previous), vec![13]);
        assert!(current.contains(13));
    }
}
