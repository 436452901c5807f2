use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::*;
use crate::slot;

use super::capacity::{effective_capacity, resolve_default};
use super::validate::validate_window;
use super::{Engine, EngineError};

// ── Window snapshot ───────────────────────────────────────────────

/// Capacity inputs for one window, read once. Every decision made from a
/// snapshot sees the same overrides and counts.
#[derive(Debug, Clone, Default)]
pub(super) struct Snapshot {
    pub(super) default: Option<u32>,
    pub(super) overrides: BTreeMap<Ms, i32>,
    /// Active reservations per truncated slot.
    pub(super) reserved: BTreeMap<Ms, u32>,
}

impl Snapshot {
    pub(super) fn capacity(&self, slot: Ms) -> Result<u32, EngineError> {
        effective_capacity(slot, &self.overrides, self.default)
    }

    pub(super) fn reserved(&self, slot: Ms) -> u32 {
        self.reserved.get(&slot).copied().unwrap_or(0)
    }

    /// Raw remaining capacity; negative when a slot is overbooked.
    pub(super) fn remaining(&self, slot: Ms) -> Result<i64, EngineError> {
        Ok(self.capacity(slot)? as i64 - self.reserved(slot) as i64)
    }

    pub(super) fn is_overridden(&self, slot: Ms) -> bool {
        matches!(self.overrides.get(&slot), Some(&c) if c >= 0)
    }
}

impl Engine {
    /// Read config, overrides and reservations for `window` concurrently.
    /// The three reads are independent; nothing ties them to one point in time.
    pub(super) async fn snapshot(&self, window: Span) -> Result<Snapshot, EngineError> {
        let (config, overrides, reservations) = tokio::try_join!(
            self.configs.get(RESTAURANT_KEY),
            self.overrides.find_in_range(window),
            self.reservations.find_in_range(window),
        )?;

        let tz = self.tz();
        let mut reserved = BTreeMap::new();
        for r in reservations.iter().filter(|r| r.is_active()) {
            *reserved.entry(slot::truncate_to_slot(r.slot, tz)).or_insert(0) += 1;
        }

        Ok(Snapshot {
            default: resolve_default(config.as_ref(), self.policy.fallback_capacity),
            overrides: overrides.into_iter().map(|o| (o.slot, o.capacity)).collect(),
            reserved,
        })
    }

    /// Capacity and bookings for `[start, end)`, sparse: only slots with an
    /// override or at least one reservation are listed.
    pub async fn query_availability(&self, start: Ms, end: Ms) -> Result<Availability, EngineError> {
        let window = validate_window(start, end)?;
        let snapshot = self.snapshot(window).await?;
        let base_capacity = snapshot
            .default
            .ok_or(EngineError::Configuration("no default capacity for availability"))?;

        let touched: BTreeSet<Ms> = snapshot
            .overrides
            .keys()
            .chain(snapshot.reserved.keys())
            .copied()
            .collect();
        let mut slots = Vec::with_capacity(touched.len());
        for slot in touched {
            slots.push(SlotAvailability {
                slot,
                capacity: snapshot.capacity(slot)?,
                reserved: snapshot.reserved(slot),
                overridden: snapshot.is_overridden(slot),
            });
        }

        Ok(Availability {
            window,
            base_capacity,
            slots,
        })
    }
}

// ── Results ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot: Ms,
    pub capacity: u32,
    pub reserved: u32,
    pub overridden: bool,
}

impl SlotAvailability {
    pub fn remaining(&self) -> i64 {
        self.capacity as i64 - self.reserved as i64
    }

    /// Remaining capacity as shown to callers, never below zero.
    pub fn available(&self) -> u32 {
        self.remaining().max(0) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub window: Span,
    pub base_capacity: u32,
    /// Ordered by slot.
    pub slots: Vec<SlotAvailability>,
}

impl Availability {
    pub fn slot(&self, slot: Ms) -> Option<&SlotAvailability> {
        self.slots
            .binary_search_by_key(&slot, |s| s.slot)
            .ok()
            .map(|i| &self.slots[i])
    }

    pub fn report(&self) -> AvailabilityReport {
        AvailabilityReport {
            base_capacity: self.base_capacity,
            overrides: self
                .slots
                .iter()
                .filter(|s| s.overridden)
                .map(|s| (slot::format_instant(s.slot), s.capacity))
                .collect(),
            reservations: self
                .slots
                .iter()
                .filter(|s| s.reserved > 0)
                .map(|s| (slot::format_instant(s.slot), s.reserved))
                .collect(),
        }
    }
}

/// JSON shape of an availability answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub base_capacity: u32,
    pub overrides: BTreeMap<String, u32>,
    pub reservations: BTreeMap<String, u32>,
}

/// One wall-clock slot of a dense day view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySlot {
    /// Wall-clock index within the day, `[0, 96)`.
    pub index: usize,
    pub slot: Ms,
    pub capacity: u32,
    pub reserved: u32,
    pub overridden: bool,
}

impl DaySlot {
    pub fn remaining(&self) -> i64 {
        self.capacity as i64 - self.reserved as i64
    }

    pub fn available(&self) -> u32 {
        self.remaining().max(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE;

    fn snapshot(default: Option<u32>, overrides: &[(Ms, i32)], reserved: &[(Ms, u32)]) -> Snapshot {
        Snapshot {
            default,
            overrides: overrides.iter().copied().collect(),
            reserved: reserved.iter().copied().collect(),
        }
    }

    #[test]
    fn remaining_goes_negative_when_overbooked() {
        let s = snapshot(Some(5), &[(0, 1)], &[(0, 3), (15 * M, 2)]);
        assert_eq!(s.remaining(0).unwrap(), -2);
        assert_eq!(s.remaining(15 * M).unwrap(), 3);
        assert_eq!(s.remaining(30 * M).unwrap(), 5);
    }

    #[test]
    fn negative_override_is_not_an_override() {
        let s = snapshot(Some(5), &[(0, -1), (15 * M, 0)], &[]);
        assert!(!s.is_overridden(0));
        assert!(s.is_overridden(15 * M));
        assert!(!s.is_overridden(30 * M));
    }

    #[test]
    fn available_is_clamped() {
        let slot = SlotAvailability {
            slot: 0,
            capacity: 1,
            reserved: 4,
            overridden: true,
        };
        assert_eq!(slot.remaining(), -3);
        assert_eq!(slot.available(), 0);
    }

    #[test]
    fn report_uses_camel_case_and_iso_keys() {
        let availability = Availability {
            window: Span::new(0, 2 * HOUR),
            base_capacity: 5,
            slots: vec![
                SlotAvailability {
                    slot: 0,
                    capacity: 2,
                    reserved: 1,
                    overridden: true,
                },
                SlotAvailability {
                    slot: 15 * M,
                    capacity: 5,
                    reserved: 3,
                    overridden: false,
                },
            ],
        };
        let json = serde_json::to_value(availability.report()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "baseCapacity": 5,
                "overrides": { "1970-01-01T00:00:00.000Z": 2 },
                "reservations": {
                    "1970-01-01T00:00:00.000Z": 1,
                    "1970-01-01T00:15:00.000Z": 3
                }
            })
        );
        assert_eq!(availability.slot(15 * M).unwrap().reserved, 3);
        assert!(availability.slot(30 * M).is_none());
    }
}
