//! Table des wearables à capacité fixe.
//!
//! La table garde les `capacity` premiers deviceId vus et n'en évince aucun.
//! Pas de verrou interne : le hub la protège avec l'échantillon T/H sous un
//! seul mutex.

use crate::models::{truncate_device_id, DeviceEntry, WearableUpdate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("device table full ({capacity} slots), dropping {device_id}")]
    CapacityExceeded { capacity: usize, device_id: String },
    #[error("cannot allocate a device table of {capacity} slots")]
    Allocation { capacity: usize },
}

#[derive(Debug)]
pub struct DeviceCache {
    slots: Vec<Option<DeviceEntry>>,
}

impl DeviceCache {
    /// Alloue les `capacity` slots d'un coup; échoue proprement au lieu de paniquer.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, CacheError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| CacheError::Allocation { capacity })?;
        slots.resize(capacity, None);
        Ok(Self { slots })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index du slot de `device_id`; prend le premier slot libre si l'id est nouveau.
    pub fn find_or_create(&mut self, device_id: &str) -> Result<usize, CacheError> {
        let device_id = truncate_device_id(device_id);

        if let Some(idx) = self.position(device_id) {
            return Ok(idx);
        }

        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| CacheError::CapacityExceeded {
                capacity: self.capacity(),
                device_id: device_id.to_string(),
            })?;

        self.slots[free] = Some(DeviceEntry {
            device_id: device_id.to_string(),
            ..DeviceEntry::default()
        });
        Ok(free)
    }

    /// Applique les champs présents dans `update`, les absents gardent la valeur en cache.
    pub fn upsert(&mut self, update: &WearableUpdate) -> Result<usize, CacheError> {
        let idx = self.find_or_create(&update.device_id)?;
        if let Some(entry) = self.slots[idx].as_mut() {
            if let Some(ts) = &update.ts {
                entry.last_timestamp = ts.clone();
            }
            if let Some(hr) = update.heart_rate {
                entry.heart_rate = Some(hr);
            }
            if let Some(st) = update.skin_temperature {
                entry.skin_temperature = Some(st);
            }
        }
        Ok(idx)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceEntry> {
        self.position(truncate_device_id(device_id))
            .and_then(|idx| self.slots[idx].as_ref())
    }

    pub fn slot(&self, idx: usize) -> Option<&DeviceEntry> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    /// Entrées occupées, dans l'ordre des slots.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.slots.iter().flatten()
    }

    fn position(&self, device_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(e) if e.device_id == device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, hr: Option<f64>, st: Option<f64>) -> WearableUpdate {
        WearableUpdate {
            device_id: id.into(),
            ts: None,
            heart_rate: hr,
            skin_temperature: st,
        }
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mut cache = DeviceCache::try_with_capacity(4).unwrap();
        let a = cache.find_or_create("watch-a").unwrap();
        let again = cache.find_or_create("watch-a").unwrap();
        assert_eq!(a, again);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn new_slot_starts_empty() {
        let mut cache = DeviceCache::try_with_capacity(2).unwrap();
        let idx = cache.find_or_create("w").unwrap();
        let entry = cache.slot(idx).unwrap();
        assert_eq!(entry.heart_rate, None);
        assert_eq!(entry.skin_temperature, None);
        assert!(entry.last_timestamp.is_empty());
    }

    #[test]
    fn overflow_reports_capacity_and_leaves_slots_alone() {
        let mut cache = DeviceCache::try_with_capacity(2).unwrap();
        cache.upsert(&update("a", Some(60.0), None)).unwrap();
        cache.upsert(&update("b", None, Some(31.0))).unwrap();

        let err = cache.upsert(&update("c", Some(99.0), Some(99.0))).unwrap_err();
        assert_eq!(
            err,
            CacheError::CapacityExceeded { capacity: 2, device_id: "c".into() }
        );
        assert_eq!(cache.len(), 2);
        assert!(cache.get("c").is_none());
        assert_eq!(cache.get("a").unwrap().heart_rate, Some(60.0));
        assert_eq!(cache.get("b").unwrap().skin_temperature, Some(31.0));

        // les ids connus se mettent encore à jour table pleine
        cache.upsert(&update("a", Some(61.0), None)).unwrap();
        assert_eq!(cache.get("a").unwrap().heart_rate, Some(61.0));
    }

    #[test]
    fn fields_update_independently() {
        let mut cache = DeviceCache::try_with_capacity(1).unwrap();
        cache.upsert(&update("w", Some(70.0), None)).unwrap();
        cache.upsert(&update("w", None, Some(33.2))).unwrap();
        cache
            .upsert(&WearableUpdate { ts: Some("t2".into()), ..update("w", None, None) })
            .unwrap();

        let e = cache.get("w").unwrap();
        assert_eq!(e.heart_rate, Some(70.0));
        assert_eq!(e.skin_temperature, Some(33.2));
        assert_eq!(e.last_timestamp, "t2");
    }

    #[test]
    fn iteration_follows_first_seen_order() {
        let mut cache = DeviceCache::try_with_capacity(8).unwrap();
        for id in ["z", "a", "m"] {
            cache.find_or_create(id).unwrap();
        }
        let ids: Vec<_> = cache.iter().map(|e| e.device_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn zero_capacity_table_rejects_everything() {
        let mut cache = DeviceCache::try_with_capacity(0).unwrap();
        assert!(cache.find_or_create("x").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn oversized_table_is_an_error_not_a_panic() {
        assert_eq!(
            DeviceCache::try_with_capacity(usize::MAX).unwrap_err(),
            CacheError::Allocation { capacity: usize::MAX }
        );
    }
}
