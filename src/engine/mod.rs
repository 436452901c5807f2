mod admission;
mod availability;
mod capacity;
mod error;
mod mutations;
mod queries;
mod validate;

pub use admission::{BookingOutcome, BookingRequest, BookingResponse, MAX_SUGGESTIONS, SEARCH_RADIUS_MS};
pub use availability::{Availability, AvailabilityReport, DaySlot, SlotAvailability};
pub use capacity::{effective_capacity, resolve_default, DEFAULT_BASE_PARTIES_PER_SLOT};
pub use error::EngineError;
pub use queries::Settings;

use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::model::*;
use crate::store::{ConfigStore, OverrideStore, ReservationStore};

/// Deployment settings that change domain behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Wall clock the restaurant runs on. Slot indices and calendar days use it.
    pub tz: Tz,
    /// Default capacity when no config record exists. `None` turns a missing
    /// config into a configuration error instead.
    pub fallback_capacity: Option<u32>,
    /// Serialize check-and-write per slot inside this process.
    pub serialize_admissions: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            tz: Tz::UTC,
            fallback_capacity: Some(DEFAULT_BASE_PARTIES_PER_SLOT),
            serialize_admissions: true,
        }
    }
}

pub struct Engine {
    configs: Arc<dyn ConfigStore>,
    overrides: Arc<dyn OverrideStore>,
    reservations: Arc<dyn ReservationStore>,
    policy: EnginePolicy,
    /// One admission mutex per slot currently being booked. Entries are
    /// dropped again once nobody waits on them.
    slot_locks: DashMap<Ms, Arc<Mutex<()>>>,
}

impl Engine {
    /// Engine over one store that serves all three seams.
    pub fn new<S>(store: Arc<S>, policy: EnginePolicy) -> Self
    where
        S: ConfigStore + OverrideStore + ReservationStore + 'static,
    {
        Self::with_stores(store.clone(), store.clone(), store, policy)
    }

    pub fn with_stores(
        configs: Arc<dyn ConfigStore>,
        overrides: Arc<dyn OverrideStore>,
        reservations: Arc<dyn ReservationStore>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            configs,
            overrides,
            reservations,
            policy,
            slot_locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn tz(&self) -> Tz {
        self.policy.tz
    }

    fn slot_lease(&self, slot: Ms) -> SlotLease<'_> {
        let lock = self.slot_locks.entry(slot).or_default().value().clone();
        SlotLease {
            locks: &self.slot_locks,
            slot,
            lock,
        }
    }
}

/// A handle on one slot's admission mutex. Dropping it, including when the
/// booking future is cancelled, removes the map entry unless another lease
/// still holds it.
struct SlotLease<'a> {
    locks: &'a DashMap<Ms, Arc<Mutex<()>>>,
    slot: Ms,
    lock: Arc<Mutex<()>>,
}

impl SlotLease<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        // Give up our reference first so the count below sees only others.
        drop(std::mem::take(&mut self.lock));
        self.locks
            .remove_if(&self.slot, |_, lock| Arc::strong_count(lock) == 1);
    }
}
