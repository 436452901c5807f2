//! Store seams consumed by the engine.
//!
//! The engine never talks to persistence directly; it goes through these three
//! traits. `InMemoryStore` implements all of them over in-process maps and
//! `Ledger` adds a write-ahead log underneath for durability.

mod ledger;
mod memory;

pub use ledger::Ledger;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Single-record fetch. Never creates a record.
    async fn get(&self, key: ConfigKey) -> Result<Option<RestaurantConfig>, StoreError>;

    async fn put(&self, key: ConfigKey, config: RestaurantConfig) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Overrides whose slot lies in `span`, ordered by slot.
    async fn find_in_range(&self, span: Span) -> Result<Vec<CapacityOverride>, StoreError>;

    /// Insert or replace overrides as one write. Later entries win on duplicate slots.
    async fn put_many(&self, overrides: Vec<CapacityOverride>) -> Result<(), StoreError>;

    /// Returns false if no override existed for `slot`.
    async fn remove(&self, slot: Ms) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Non-deleted reservations whose slot lies in `span`, ordered by slot.
    async fn find_in_range(&self, span: Span) -> Result<Vec<Reservation>, StoreError>;

    async fn create(&self, reservation: NewReservation) -> Result<Reservation, StoreError>;

    /// Mark a reservation deleted. `None` if unknown or already deleted.
    async fn soft_delete(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    WalError(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
