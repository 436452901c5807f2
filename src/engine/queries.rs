use chrono::NaiveDate;

use crate::model::*;
use crate::slot::{self, SLOTS_PER_DAY, SLOT_MS};

use super::availability::DaySlot;
use super::capacity::resolve_default;
use super::validate::{parse_time, validate_window};
use super::{Engine, EngineError};

/// Restaurant settings as callers see them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_parties_per_slot: u32,
    pub address: Option<String>,
    /// False when no record is stored and the values are the fallback.
    pub configured: bool,
}

impl Engine {
    /// Read a client-supplied instant; offset-less strings are restaurant-local.
    pub fn parse_instant(&self, raw: &str) -> Result<Ms, EngineError> {
        parse_time(raw, self.tz())
    }

    /// Stored settings, or the fallback without writing anything.
    pub async fn restaurant_config(&self) -> Result<Settings, EngineError> {
        match self.configs.get(RESTAURANT_KEY).await? {
            Some(config) => Ok(Settings {
                base_parties_per_slot: config.base_parties_per_slot,
                address: config.address,
                configured: true,
            }),
            None => {
                let base = resolve_default(None, self.policy.fallback_capacity)
                    .ok_or(EngineError::Configuration("restaurant is not configured"))?;
                Ok(Settings {
                    base_parties_per_slot: base,
                    address: None,
                    configured: false,
                })
            }
        }
    }

    /// Active reservations in `[start, end)`, ordered by slot.
    pub async fn list_reservations(&self, start: Ms, end: Ms) -> Result<Vec<Reservation>, EngineError> {
        let window = validate_window(start, end)?;
        Ok(self.reservations.find_in_range(window).await?)
    }

    /// Every wall-clock slot of `date`, with gaps filled by the default.
    /// Slots that do not exist because of a DST change are left out.
    pub async fn day_schedule(&self, date: NaiveDate) -> Result<Vec<DaySlot>, EngineError> {
        let tz = self.tz();
        let starts: Vec<(usize, Ms)> = (0..SLOTS_PER_DAY)
            .filter_map(|index| slot::local_slot_start(date, index, tz).map(|t| (index, t)))
            .collect();
        let (Some(&(_, first)), Some(&(_, last))) = (starts.first(), starts.last()) else {
            return Ok(Vec::new());
        };
        let window = validate_window(first, last + SLOT_MS)?;
        let snapshot = self.snapshot(window).await?;

        starts
            .into_iter()
            .map(|(index, t)| {
                Ok(DaySlot {
                    index,
                    slot: t,
                    capacity: snapshot.capacity(t)?,
                    reserved: snapshot.reserved(t),
                    overridden: snapshot.is_overridden(t),
                })
            })
            .collect()
    }
}
