use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::legacy;
use crate::limits::*;
use crate::model::*;
use crate::slot;

use super::capacity::DEFAULT_BASE_PARTIES_PER_SLOT;
use super::validate::{validate_address, validate_instant};
use super::{Engine, EngineError};

/// Address written with the first-time default configuration.
pub const DEFAULT_ADDRESS: &str = "123 Easy Street, New York, NY, USA";

fn capacity_value(raw: i64, what: &'static str) -> Result<u32, EngineError> {
    if raw < 0 {
        return Err(EngineError::invalid(format!("{what} must not be negative")));
    }
    u32::try_from(raw)
        .ok()
        .filter(|&c| c <= i32::MAX as u32)
        .ok_or_else(|| EngineError::invalid(format!("{what} too large")))
}

impl Engine {
    /// Write the default configuration if none exists yet. Returns whether
    /// a record was created. Run once at startup; reads never do this.
    pub async fn ensure_default_config(&self) -> Result<bool, EngineError> {
        if self.configs.get(RESTAURANT_KEY).await?.is_some() {
            return Ok(false);
        }
        let config = RestaurantConfig {
            base_parties_per_slot: DEFAULT_BASE_PARTIES_PER_SLOT,
            address: Some(DEFAULT_ADDRESS.to_string()),
        };
        self.configs.put(RESTAURANT_KEY, config).await?;
        tracing::info!(
            "initialized restaurant config with {DEFAULT_BASE_PARTIES_PER_SLOT} parties per slot"
        );
        Ok(true)
    }

    /// Replace the default capacity. A `None` address keeps the stored one.
    pub async fn save_config(
        &self,
        base_parties_per_slot: i64,
        address: Option<String>,
    ) -> Result<RestaurantConfig, EngineError> {
        let base_parties_per_slot = capacity_value(base_parties_per_slot, "base capacity")?;
        validate_address(address.as_deref())?;

        let address = match address {
            Some(a) => Some(a),
            None => self
                .configs
                .get(RESTAURANT_KEY)
                .await?
                .and_then(|c| c.address),
        };
        let config = RestaurantConfig {
            base_parties_per_slot,
            address,
        };
        self.configs.put(RESTAURANT_KEY, config.clone()).await?;
        tracing::info!("base capacity set to {base_parties_per_slot}");
        Ok(config)
    }

    /// Set capacity overrides as one write. Instants are truncated to their
    /// slot; when two entries land on the same slot the later one wins.
    /// Returns the number of slots written.
    pub async fn set_overrides(&self, entries: Vec<(Ms, i64)>) -> Result<usize, EngineError> {
        if entries.len() > MAX_OVERRIDE_BATCH {
            return Err(EngineError::invalid("too many overrides in one batch"));
        }
        let tz = self.tz();
        let mut by_slot = BTreeMap::new();
        for (t, capacity) in entries {
            validate_instant(t)?;
            let capacity = capacity_value(capacity, "override capacity")?;
            by_slot.insert(slot::truncate_to_slot(t, tz), capacity as i32);
        }

        let overrides: Vec<CapacityOverride> = by_slot
            .into_iter()
            .map(|(slot, capacity)| CapacityOverride { slot, capacity })
            .collect();
        let written = overrides.len();
        self.overrides.put_many(overrides).await?;
        Ok(written)
    }

    /// Drop the override for the slot containing `t`. Returns false if there was none.
    pub async fn clear_override(&self, t: Ms) -> Result<bool, EngineError> {
        validate_instant(t)?;
        let removed = self.overrides.remove(slot::truncate_to_slot(t, self.tz())).await?;
        Ok(removed)
    }

    /// Translate a legacy dense day array and store it as overrides.
    pub async fn import_legacy_day(&self, date: NaiveDate, values: &[i64]) -> Result<usize, EngineError> {
        let overrides = legacy::overrides_from_day_array(date, values, self.tz())?;
        let written = overrides.len();
        self.overrides.put_many(overrides).await?;
        tracing::info!("imported {written} legacy overrides for {date}");
        Ok(written)
    }

    /// Soft-delete a reservation. Its slot regains the capacity immediately.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let cancelled = self
            .reservations
            .soft_delete(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        tracing::info!("cancelled reservation {id}");
        Ok(cancelled)
    }
}
