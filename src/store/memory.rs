use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use ulid::Ulid;

use crate::model::*;

use super::{ConfigStore, OverrideStore, ReservationStore, StoreError};

/// Everything the stores hold. Only `apply` changes it.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    configs: HashMap<ConfigKey, RestaurantConfig>,
    overrides: BTreeMap<Ms, i32>,
    /// Keyed by (slot, id) so range scans come out in slot order.
    reservations: BTreeMap<(Ms, Ulid), Reservation>,
    /// Reverse lookup: reservation id → slot
    reservation_slots: HashMap<Ulid, Ms>,
}

impl StoreState {
    /// Returns false when the event found nothing to change: a cleared
    /// override that was not set, or a cancellation of an inactive reservation.
    pub(crate) fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::ConfigSaved { key, config } => {
                self.configs.insert(*key, config.clone());
                true
            }
            Event::OverridesSet { entries } => {
                for o in entries {
                    self.overrides.insert(o.slot, o.capacity);
                }
                true
            }
            Event::OverrideCleared { slot } => self.overrides.remove(slot).is_some(),
            Event::ReservationCreated {
                id,
                name,
                email,
                party_size,
                slot,
                created_at,
            } => {
                self.reservations.insert(
                    (*slot, *id),
                    Reservation {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                        party_size: *party_size,
                        slot: *slot,
                        created_at: *created_at,
                        deleted_at: None,
                    },
                );
                self.reservation_slots.insert(*id, *slot);
                true
            }
            Event::ReservationCancelled { id, at } => {
                if let Some(slot) = self.reservation_slots.get(id)
                    && let Some(r) = self.reservations.get_mut(&(*slot, *id))
                    && r.deleted_at.is_none()
                {
                    r.deleted_at = Some(*at);
                    return true;
                }
                false
            }
        }
    }

    pub(crate) fn active_reservation(&self, id: &Ulid) -> Option<&Reservation> {
        let slot = self.reservation_slots.get(id)?;
        self.reservations
            .get(&(*slot, *id))
            .filter(|r| r.is_active())
    }

    pub(crate) fn has_override(&self, slot: Ms) -> bool {
        self.overrides.contains_key(&slot)
    }

    fn overrides_in(&self, span: Span) -> Vec<CapacityOverride> {
        self.overrides
            .range(span.start..span.end)
            .map(|(&slot, &capacity)| CapacityOverride { slot, capacity })
            .collect()
    }

    fn reservations_in(&self, span: Span) -> Vec<Reservation> {
        self.reservations
            .range((span.start, Ulid::nil())..(span.end, Ulid::nil()))
            .map(|(_, r)| r)
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Minimal event list that rebuilds this state.
    pub(crate) fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let mut keys: Vec<_> = self.configs.keys().copied().collect();
        keys.sort();
        for key in keys {
            events.push(Event::ConfigSaved {
                key,
                config: self.configs[&key].clone(),
            });
        }
        if !self.overrides.is_empty() {
            events.push(Event::OverridesSet {
                entries: self.overrides_in(Span::new(Ms::MIN, Ms::MAX)),
            });
        }
        for r in self.reservations.values() {
            events.push(Event::ReservationCreated {
                id: r.id,
                name: r.name.clone(),
                email: r.email.clone(),
                party_size: r.party_size,
                slot: r.slot,
                created_at: r.created_at,
            });
            if let Some(at) = r.deleted_at {
                events.push(Event::ReservationCancelled { id: r.id, at });
            }
        }
        events
    }
}

/// Build the creation event for a new reservation, assigning its id and timestamp.
pub(crate) fn reservation_created(new: NewReservation) -> (Event, Reservation) {
    let id = Ulid::new();
    let created_at = now_ms();
    let event = Event::ReservationCreated {
        id,
        name: new.name.clone(),
        email: new.email.clone(),
        party_size: new.party_size,
        slot: new.slot,
        created_at,
    };
    let reservation = Reservation {
        id,
        name: new.name,
        email: new.email,
        party_size: new.party_size,
        slot: new.slot,
        created_at,
        deleted_at: None,
    };
    (event, reservation)
}

/// Non-durable store. Also the in-memory half of `Ledger`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from a replayed event log.
    pub(crate) fn from_events(events: &[Event]) -> Self {
        let mut state = StoreState::default();
        for event in events {
            state.apply(event);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().await
    }

    /// Reservation by id, including soft-deleted ones.
    pub async fn reservation(&self, id: Ulid) -> Option<Reservation> {
        let state = self.state.read().await;
        let slot = state.reservation_slots.get(&id)?;
        state.reservations.get(&(*slot, id)).cloned()
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn get(&self, key: ConfigKey) -> Result<Option<RestaurantConfig>, StoreError> {
        Ok(self.state.read().await.configs.get(&key).cloned())
    }

    async fn put(&self, key: ConfigKey, config: RestaurantConfig) -> Result<(), StoreError> {
        self.write().await.apply(&Event::ConfigSaved { key, config });
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for InMemoryStore {
    async fn find_in_range(&self, span: Span) -> Result<Vec<CapacityOverride>, StoreError> {
        Ok(self.state.read().await.overrides_in(span))
    }

    async fn put_many(&self, overrides: Vec<CapacityOverride>) -> Result<(), StoreError> {
        if overrides.is_empty() {
            return Ok(());
        }
        self.write()
            .await
            .apply(&Event::OverridesSet { entries: overrides });
        Ok(())
    }

    async fn remove(&self, slot: Ms) -> Result<bool, StoreError> {
        Ok(self.write().await.apply(&Event::OverrideCleared { slot }))
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn find_in_range(&self, span: Span) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.read().await.reservations_in(span))
    }

    async fn create(&self, reservation: NewReservation) -> Result<Reservation, StoreError> {
        let (event, created) = reservation_created(reservation);
        self.write().await.apply(&event);
        Ok(created)
    }

    async fn soft_delete(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let mut state = self.write().await;
        let Some(existing) = state.active_reservation(&id).cloned() else {
            return Ok(None);
        };
        let at = now_ms();
        state.apply(&Event::ReservationCancelled { id, at });
        Ok(Some(Reservation {
            deleted_at: Some(at),
            ..existing
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE;

    fn new_reservation(slot: Ms) -> NewReservation {
        NewReservation {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            party_size: 2,
            slot,
        }
    }

    #[tokio::test]
    async fn config_absent_until_put() {
        let store = InMemoryStore::new();
        assert_eq!(store.get(RESTAURANT_KEY).await.unwrap(), None);

        let config = RestaurantConfig {
            base_parties_per_slot: 8,
            address: None,
        };
        store.put(RESTAURANT_KEY, config.clone()).await.unwrap();
        assert_eq!(store.get(RESTAURANT_KEY).await.unwrap(), Some(config));
        assert_eq!(store.get(ConfigKey(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn override_range_is_half_open() {
        let store = InMemoryStore::new();
        store
            .put_many(vec![
                CapacityOverride { slot: 0, capacity: 1 },
                CapacityOverride { slot: 15 * M, capacity: 2 },
                CapacityOverride { slot: 30 * M, capacity: 3 },
            ])
            .await
            .unwrap();

        let hits = OverrideStore::find_in_range(&store, Span::new(0, 30 * M)).await.unwrap();
        assert_eq!(hits.iter().map(|o| o.slot).collect::<Vec<_>>(), vec![0, 15 * M]);
    }

    #[tokio::test]
    async fn put_many_last_entry_wins() {
        let store = InMemoryStore::new();
        store
            .put_many(vec![
                CapacityOverride { slot: 0, capacity: 1 },
                CapacityOverride { slot: 0, capacity: 7 },
            ])
            .await
            .unwrap();
        let hits = OverrideStore::find_in_range(&store, Span::new(0, M)).await.unwrap();
        assert_eq!(hits, vec![CapacityOverride { slot: 0, capacity: 7 }]);
    }

    #[tokio::test]
    async fn remove_override_reports_presence() {
        let store = InMemoryStore::new();
        store
            .put_many(vec![CapacityOverride { slot: 0, capacity: 1 }])
            .await
            .unwrap();
        assert!(store.remove(0).await.unwrap());
        assert!(!store.remove(0).await.unwrap());
        assert!(OverrideStore::find_in_range(&store, Span::new(0, M)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn soft_deleted_reservations_are_hidden_but_kept() {
        let store = InMemoryStore::new();
        let kept = store.create(new_reservation(0)).await.unwrap();
        let cancelled = store.create(new_reservation(0)).await.unwrap();

        let deleted = store.soft_delete(cancelled.id).await.unwrap().unwrap();
        assert!(deleted.deleted_at.is_some());

        let active = ReservationStore::find_in_range(&store, Span::new(0, 15 * M)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);

        // Retained for audit
        let row = store.reservation(cancelled.id).await.unwrap();
        assert!(!row.is_active());

        // Second delete is a no-op
        assert_eq!(store.soft_delete(cancelled.id).await.unwrap(), None);
        assert_eq!(store.soft_delete(Ulid::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reservations_come_back_in_slot_order() {
        let store = InMemoryStore::new();
        store.create(new_reservation(30 * M)).await.unwrap();
        store.create(new_reservation(0)).await.unwrap();
        store.create(new_reservation(15 * M)).await.unwrap();
        store.create(new_reservation(45 * M)).await.unwrap();

        let slots: Vec<Ms> = ReservationStore::find_in_range(&store, Span::new(0, 45 * M))
            .await
            .unwrap()
            .iter()
            .map(|r| r.slot)
            .collect();
        assert_eq!(slots, vec![0, 15 * M, 30 * M]);
    }

    #[tokio::test]
    async fn snapshot_events_rebuild_same_state() {
        let store = InMemoryStore::new();
        store
            .put(
                RESTAURANT_KEY,
                RestaurantConfig {
                    base_parties_per_slot: 3,
                    address: Some("1 Main St".into()),
                },
            )
            .await
            .unwrap();
        store
            .put_many(vec![CapacityOverride { slot: 15 * M, capacity: 0 }])
            .await
            .unwrap();
        store.create(new_reservation(0)).await.unwrap();
        let gone = store.create(new_reservation(0)).await.unwrap();
        store.soft_delete(gone.id).await.unwrap();

        let events = store.state.read().await.snapshot_events();
        let rebuilt = InMemoryStore::from_events(&events);

        let window = Span::new(0, HOUR);
        assert_eq!(
            rebuilt.get(RESTAURANT_KEY).await.unwrap(),
            store.get(RESTAURANT_KEY).await.unwrap()
        );
        assert_eq!(
            OverrideStore::find_in_range(&rebuilt, window).await.unwrap(),
            OverrideStore::find_in_range(&store, window).await.unwrap()
        );
        assert_eq!(
            ReservationStore::find_in_range(&rebuilt, window).await.unwrap(),
            ReservationStore::find_in_range(&store, window).await.unwrap()
        );
        assert!(!rebuilt.reservation(gone.id).await.unwrap().is_active());
    }
}
