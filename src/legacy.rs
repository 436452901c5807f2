//! Import of the old per-day inventory format.
//!
//! Each day used to be stored as a dense array of 96 capacities, one per
//! wall-clock slot, with negative entries meaning "use the default". Those
//! arrays are translated once into sparse per-slot overrides and never stored
//! in their original shape.

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::model::CapacityOverride;
use crate::slot::{self, SLOTS_PER_DAY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyError {
    WrongLength(usize),
    Malformed(String),
    CapacityOutOfRange { index: usize, value: i64 },
}

impl std::fmt::Display for LegacyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyError::WrongLength(n) => {
                write!(f, "day array has {n} entries, expected {SLOTS_PER_DAY}")
            }
            LegacyError::Malformed(entry) => write!(f, "not an integer: {entry:?}"),
            LegacyError::CapacityOutOfRange { index, value } => {
                write!(f, "capacity {value} at slot {index} out of range")
            }
        }
    }
}

impl std::error::Error for LegacyError {}

/// Parse `"5,5,-1,…"` into capacities. Whitespace around entries is ignored.
pub fn parse_day_array(raw: &str) -> Result<Vec<i64>, LegacyError> {
    raw.split(',')
        .map(|entry| {
            let entry = entry.trim();
            entry
                .parse::<i64>()
                .map_err(|_| LegacyError::Malformed(entry.to_string()))
        })
        .collect()
}

/// Overrides for every non-negative entry of a day array.
///
/// Indices are wall-clock slots of `date` in `tz`; an index that falls in a
/// DST gap has no instant and is dropped.
pub fn overrides_from_day_array(
    date: NaiveDate,
    values: &[i64],
    tz: Tz,
) -> Result<Vec<CapacityOverride>, LegacyError> {
    if values.len() != SLOTS_PER_DAY {
        return Err(LegacyError::WrongLength(values.len()));
    }

    let mut overrides = Vec::new();
    for (index, &value) in values.iter().enumerate() {
        if value < 0 {
            continue;
        }
        let capacity = i32::try_from(value)
            .map_err(|_| LegacyError::CapacityOutOfRange { index, value })?;
        if let Some(slot) = slot::local_slot_start(date, index, tz) {
            overrides.push(CapacityOverride { slot, capacity });
        }
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ms, HOUR, MINUTE};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn midnight_utc() -> Ms {
        day().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis()
    }

    #[test]
    fn negatives_are_unset() {
        let mut values = vec![-1i64; SLOTS_PER_DAY];
        values[0] = 3;
        values[40] = 0;
        let overrides = overrides_from_day_array(day(), &values, Tz::UTC).unwrap();
        assert_eq!(
            overrides,
            vec![
                CapacityOverride {
                    slot: midnight_utc(),
                    capacity: 3
                },
                CapacityOverride {
                    slot: midnight_utc() + 10 * HOUR,
                    capacity: 0
                },
            ]
        );
    }

    #[test]
    fn all_unset_day_yields_nothing() {
        let values = vec![-1i64; SLOTS_PER_DAY];
        assert!(overrides_from_day_array(day(), &values, Tz::UTC).unwrap().is_empty());
    }

    #[test]
    fn length_must_be_exact() {
        assert_eq!(
            overrides_from_day_array(day(), &[5; 95], Tz::UTC),
            Err(LegacyError::WrongLength(95))
        );
        assert_eq!(
            overrides_from_day_array(day(), &[5; 97], Tz::UTC),
            Err(LegacyError::WrongLength(97))
        );
    }

    #[test]
    fn oversized_capacity_rejected() {
        let mut values = vec![-1i64; SLOTS_PER_DAY];
        values[7] = i64::from(i32::MAX) + 1;
        assert!(matches!(
            overrides_from_day_array(day(), &values, Tz::UTC),
            Err(LegacyError::CapacityOutOfRange { index: 7, .. })
        ));
    }

    #[test]
    fn local_days_map_to_local_slots() {
        let ny: Tz = "America/New_York".parse().unwrap();
        let mut values = vec![-1i64; SLOTS_PER_DAY];
        values[74] = 2; // 18:30 EDT
        let overrides = overrides_from_day_array(day(), &values, ny).unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].slot, midnight_utc() + 22 * HOUR + 30 * MINUTE);
    }

    #[test]
    fn spring_forward_drops_missing_hour() {
        let ny: Tz = "America/New_York".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let overrides = overrides_from_day_array(date, &[1; SLOTS_PER_DAY], ny).unwrap();
        assert_eq!(overrides.len(), SLOTS_PER_DAY - 4);
    }

    #[test]
    fn parse_day_array_trims_and_rejects_garbage() {
        assert_eq!(parse_day_array("1, 2 ,-1").unwrap(), vec![1, 2, -1]);
        assert_eq!(
            parse_day_array("1,x"),
            Err(LegacyError::Malformed("x".into()))
        );
    }
}
