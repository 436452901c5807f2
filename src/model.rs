use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Window of `radius` on both sides of `center`.
    pub fn around(center: Ms, radius: Ms) -> Self {
        Self::new(center - radius, center + radius)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Key of a singleton configuration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey(pub u32);

/// The one restaurant this deployment serves.
pub const RESTAURANT_KEY: ConfigKey = ConfigKey(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantConfig {
    /// Parties accepted per 15-minute slot when no override applies.
    pub base_parties_per_slot: u32,
    pub address: Option<String>,
}

/// Administrator-set capacity for exactly one slot. Negative capacity means "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityOverride {
    pub slot: Ms,
    pub capacity: i32,
}

/// A reservation as handed to `ReservationStore::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub name: String,
    pub email: String,
    pub party_size: u32,
    /// Already truncated to a slot boundary.
    pub slot: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub party_size: u32,
    pub slot: Ms,
    pub created_at: Ms,
    /// Soft deletion marker. Deleted reservations are kept but never counted.
    pub deleted_at: Option<Ms>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ConfigSaved {
        key: ConfigKey,
        config: RestaurantConfig,
    },
    /// Batch write; all entries land in one WAL record.
    OverridesSet {
        entries: Vec<CapacityOverride>,
    },
    OverrideCleared {
        slot: Ms,
    },
    ReservationCreated {
        id: Ulid,
        name: String,
        email: String,
        party_size: u32,
        slot: Ms,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        at: Ms,
    },
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
