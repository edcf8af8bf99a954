//! Ordered, deduplicated list of discovered peripherals
//! Indices are stable for the lifetime of an entry, so a list view can select by row.

use std::collections::HashMap;

use log::debug;

use crate::core::bluetooth::constants::UNKNOWN_RSSI;
use crate::core::bluetooth::types::{PeripheralId, PeripheralRecord};
use crate::error::{SessionError, SessionResult};

/// Outcome of [`DeviceRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(usize),
    Updated(usize),
}

impl Upsert {
    pub fn index(&self) -> usize {
        match self {
            Self::Inserted(i) | Self::Updated(i) => *i,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<PeripheralRecord>,
    index: HashMap<PeripheralId, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new record or refreshes the existing one in place.
    ///
    /// A refresh keeps the original position and discovery time, takes the latest
    /// RSSI unless the sighting has no reading (`UNKNOWN_RSSI`), replaces the name
    /// only when the sighting carries one, and merges the advertised services.
    pub fn upsert(&mut self, record: PeripheralRecord) -> Upsert {
        if let Some(&i) = self.index.get(&record.id) {
            let existing = &mut self.records[i];
            if record.last_rssi != UNKNOWN_RSSI {
                existing.last_rssi = record.last_rssi;
            }
            if record.display_name.is_some() {
                existing.display_name = record.display_name;
            }
            existing.services_advertised.extend(record.services_advertised);
            debug!("Updated peripheral {} at index {}", existing.id, i);
            Upsert::Updated(i)
        } else {
            let i = self.records.len();
            debug!("Registered new peripheral {} at index {}", record.id, i);
            self.index.insert(record.id.clone(), i);
            self.records.push(record);
            Upsert::Inserted(i)
        }
    }

    /// Iterates the records in insertion order
    pub fn list(&self) -> impl Iterator<Item = &PeripheralRecord> + '_ {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> SessionResult<&PeripheralRecord> {
        self.records.get(index).ok_or(SessionError::OutOfRange {
            index,
            len: self.records.len(),
        })
    }

    pub fn find(&self, id: &PeripheralId) -> Option<(usize, &PeripheralRecord)> {
        self.index.get(id).map(|&i| (i, &self.records[i]))
    }

    /// Records an RSSI reading taken on a connected link. Returns false for unknown ids.
    pub fn update_rssi(&mut self, id: &PeripheralId, rssi: i16) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                self.records[i].last_rssi = rssi;
                true
            }
            None => false,
        }
    }

    /// Applies a GAP name change. Returns false for unknown ids.
    pub fn update_name(&mut self, id: &PeripheralId, name: Option<String>) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                self.records[i].display_name = name;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Owned copy of the current list, for handing to observers.
    pub fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(id: &str, name: Option<&str>, rssi: i16) -> PeripheralRecord {
        PeripheralRecord::new(PeripheralId::from(id), name.map(str::to_string), rssi)
    }

    #[test]
    fn repeated_sightings_keep_one_record_with_latest_values() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.upsert(record("a", None, -70)), Upsert::Inserted(0));
        assert_eq!(registry.upsert(record("x", Some("first"), -60)), Upsert::Inserted(1));
        assert_eq!(registry.upsert(record("b", None, -80)), Upsert::Inserted(2));

        let first_seen = registry.get(1).unwrap().discovered_at;
        assert_eq!(registry.upsert(record("x", Some("second"), -55)), Upsert::Updated(1));
        assert_eq!(registry.upsert(record("x", None, -52)), Upsert::Updated(1));

        assert_eq!(registry.len(), 3);
        let x = registry.get(1).unwrap();
        assert_eq!(x.id.as_str(), "x");
        assert_eq!(x.last_rssi, -52);
        assert_eq!(x.display_name.as_deref(), Some("second"));
        assert_eq!(x.discovered_at, first_seen);

        let order: Vec<_> = registry.list().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(order, ["a", "x", "b"]);
    }

    #[test]
    fn sighting_without_reading_keeps_last_rssi() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record("x", None, -55));
        assert_eq!(registry.upsert(record("x", Some("kept"), UNKNOWN_RSSI)), Upsert::Updated(0));
        let x = registry.get(0).unwrap();
        assert_eq!(x.last_rssi, -55);
        assert_eq!(x.display_name.as_deref(), Some("kept"));

        registry.upsert(record("x", None, -48));
        assert_eq!(registry.get(0).unwrap().last_rssi, -48);
    }

    #[test]
    fn advertised_services_are_merged() {
        let s1 = Uuid::from_u128(1);
        let s2 = Uuid::from_u128(2);
        let mut registry = DeviceRegistry::new();
        registry.upsert(record("x", None, -60).with_services([s1]));
        registry.upsert(record("x", None, -60).with_services([s2]));
        let services: Vec<_> = registry.get(0).unwrap().services_advertised.iter().copied().collect();
        assert_eq!(services, [s1, s2]);
    }

    #[test]
    fn get_past_the_end_is_out_of_range() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.get(0).unwrap_err(), SessionError::OutOfRange { index: 0, len: 0 });
        registry.upsert(record("a", None, -40));
        assert!(registry.get(0).is_ok());
        assert_eq!(registry.get(1).unwrap_err(), SessionError::OutOfRange { index: 1, len: 1 });
    }

    #[test]
    fn list_is_restartable() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record("a", None, -40));
        registry.upsert(record("b", None, -41));
        assert_eq!(registry.list().count(), 2);
        assert_eq!(registry.list().count(), 2);
    }

    #[test]
    fn clear_resets_indices() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record("a", None, -40));
        registry.upsert(record("b", None, -41));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.find(&PeripheralId::from("a")).is_none());
        assert_eq!(registry.upsert(record("b", None, -41)), Upsert::Inserted(0));
    }

    #[test]
    fn rssi_and_name_updates_only_touch_known_ids() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record("a", Some("old"), -40));
        assert!(registry.update_rssi(&PeripheralId::from("a"), -33));
        assert!(registry.update_name(&PeripheralId::from("a"), Some("new".into())));
        assert!(!registry.update_rssi(&PeripheralId::from("zz"), -1));
        let (i, a) = registry.find(&PeripheralId::from("a")).unwrap();
        assert_eq!(i, 0);
        assert_eq!(a.last_rssi, -33);
        assert_eq!(a.label(), "new");
    }
}
