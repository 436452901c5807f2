//! Fifteen-minute slot arithmetic.
//!
//! Slots are anchored to the restaurant's local wall clock: a slot starts at
//! :00, :15, :30 or :45 local time and is identified by that start instant.
//! Truncation reads the local minute, so it follows the zone's own quarter
//! hours. Current offsets are all whole quarter hours, where local and UTC slot
//! boundaries coincide. Some historical offsets are not (Africa/Monrovia ran at
//! −0:44:30 until 1972); there a slot still starts on a whole UTC minute.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::{Ms, MINUTE};

pub const SLOT_MINUTES: u32 = 15;
pub const SLOT_MS: Ms = SLOT_MINUTES as Ms * MINUTE;
pub const SLOTS_PER_DAY: usize = 96;

fn local(t: Ms, tz: Tz) -> Option<DateTime<Tz>> {
    DateTime::<Utc>::from_timestamp_millis(t).map(|dt| dt.with_timezone(&tz))
}

/// Start of the slot containing `t`. Idempotent.
pub fn truncate_to_slot(t: Ms, tz: Tz) -> Ms {
    let whole_minute = t - t.rem_euclid(MINUTE);
    let minute = match local(whole_minute, tz) {
        Some(dt) => dt.minute() as Ms,
        None => (whole_minute / MINUTE).rem_euclid(60),
    };
    whole_minute - (minute % SLOT_MINUTES as Ms) * MINUTE
}

/// Index of the slot within its local day, in `[0, 96)`.
///
/// Counted on the wall clock, so the 02:00 slot is index 8 even on a day
/// where a DST change makes it fall 60 minutes earlier or later in real time.
pub fn slot_index_of_day(t: Ms, tz: Tz) -> usize {
    let (hour, minute) = match local(t, tz) {
        Some(dt) => (dt.hour(), dt.minute()),
        None => {
            let minutes = (t / MINUTE).rem_euclid(24 * 60) as u32;
            (minutes / 60, minutes % 60)
        }
    };
    ((hour * 60 + minute) / SLOT_MINUTES) as usize
}

/// Local calendar day containing `t`.
pub fn local_date(t: Ms, tz: Tz) -> Option<NaiveDate> {
    local(t, tz).map(|dt| dt.date_naive())
}

/// Instant at which wall-clock slot `index` of `date` begins.
/// `None` when the index is out of range or the wall time falls in a DST gap;
/// an ambiguous wall time (DST fall-back) resolves to its earliest instant.
pub fn local_slot_start(date: NaiveDate, index: usize, tz: Tz) -> Option<Ms> {
    if index >= SLOTS_PER_DAY {
        return None;
    }
    let minutes = index as u32 * SLOT_MINUTES;
    let naive = date.and_hms_opt(minutes / 60, minutes % 60, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Parse an ISO-8601 instant. Strings without an offset are read as
/// restaurant-local wall time.
pub fn parse_instant(s: &str, tz: Tz) -> Option<Ms> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        let naive = NaiveDateTime::parse_from_str(s, fmt).ok()?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp_millis())
    })
}

/// Parse a `YYYY-MM-DD` calendar day.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// UTC ISO-8601 with millisecond precision, e.g. `2026-10-17T19:00:00.000Z`.
pub fn format_instant(t: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(t) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc(s: &str) -> Ms {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    #[test]
    fn truncate_drops_seconds_and_minutes() {
        assert_eq!(
            truncate_to_slot(utc("2026-10-17T10:07:00Z"), Tz::UTC),
            utc("2026-10-17T10:00:00Z")
        );
        assert_eq!(
            truncate_to_slot(utc("2026-10-17T10:14:59.999Z"), Tz::UTC),
            utc("2026-10-17T10:00:00Z")
        );
        assert_eq!(
            truncate_to_slot(utc("2026-10-17T10:15:00Z"), Tz::UTC),
            utc("2026-10-17T10:15:00Z")
        );
        assert_eq!(
            truncate_to_slot(utc("2026-10-17T23:59:59Z"), Tz::UTC),
            utc("2026-10-17T23:45:00Z")
        );
    }

    #[test]
    fn truncate_before_epoch() {
        assert_eq!(truncate_to_slot(-1, Tz::UTC), -SLOT_MS);
        assert_eq!(truncate_to_slot(-SLOT_MS, Tz::UTC), -SLOT_MS);
    }

    #[test]
    fn truncate_with_quarter_hour_offset() {
        // Kathmandu is UTC+05:45: 10:07 local is 04:22 UTC, slot starts 10:00 local = 04:15 UTC.
        let tz: Tz = "Asia/Kathmandu".parse().unwrap();
        assert_eq!(
            truncate_to_slot(utc("2026-10-17T04:22:00Z"), tz),
            utc("2026-10-17T04:15:00Z")
        );
    }

    #[test]
    fn slot_index_counts_local_wall_clock() {
        assert_eq!(slot_index_of_day(utc("2026-10-17T00:00:00Z"), Tz::UTC), 0);
        assert_eq!(slot_index_of_day(utc("2026-10-17T00:14:59Z"), Tz::UTC), 0);
        assert_eq!(slot_index_of_day(utc("2026-10-17T10:07:00Z"), Tz::UTC), 40);
        assert_eq!(slot_index_of_day(utc("2026-10-17T23:59:59Z"), Tz::UTC), 95);

        let ny: Tz = "America/New_York".parse().unwrap();
        // 18:30 local (EDT, UTC-4)
        assert_eq!(slot_index_of_day(utc("2026-10-17T22:30:00Z"), ny), 74);
    }

    #[test]
    fn local_slot_start_skips_dst_gap() {
        let ny: Tz = "America/New_York".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        // 02:00-02:59 does not exist on spring-forward day
        assert_eq!(local_slot_start(day, 8, ny), None);
        assert_eq!(local_slot_start(day, 7, ny), Some(utc("2026-03-08T06:45:00Z")));
        assert_eq!(local_slot_start(day, 12, ny), Some(utc("2026-03-08T07:00:00Z")));
        assert_eq!(local_slot_start(day, SLOTS_PER_DAY, ny), None);
    }

    #[test]
    fn parse_accepts_offsets_and_local_time() {
        assert_eq!(parse_instant("2026-10-17T10:07:00Z", Tz::UTC), Some(utc("2026-10-17T10:07:00Z")));
        assert_eq!(
            parse_instant("2026-10-17T10:07:00-04:00", Tz::UTC),
            Some(utc("2026-10-17T14:07:00Z"))
        );
        let ny: Tz = "America/New_York".parse().unwrap();
        assert_eq!(parse_instant("2026-10-17T10:07", ny), Some(utc("2026-10-17T14:07:00Z")));
        assert_eq!(parse_instant("not a time", Tz::UTC), None);
        assert_eq!(parse_instant("", Tz::UTC), None);
    }

    #[test]
    fn format_matches_iso_with_millis() {
        assert_eq!(format_instant(utc("2026-10-17T10:00:00Z")), "2026-10-17T10:00:00.000Z");
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert_eq!(parse_date("2026-10-17"), NaiveDate::from_ymd_opt(2026, 10, 17));
        assert_eq!(parse_date("2026-13-01"), None);
    }

    proptest! {
        #[test]
        fn truncate_is_idempotent(t in 0i64..4_102_444_800_000) {
            let once = truncate_to_slot(t, Tz::UTC);
            prop_assert_eq!(truncate_to_slot(once, Tz::UTC), once);
        }

        #[test]
        fn truncate_moves_back_less_than_a_slot(t in 0i64..4_102_444_800_000) {
            let ny: Tz = "America/New_York".parse().unwrap();
            let slot = truncate_to_slot(t, ny);
            prop_assert!(slot <= t);
            prop_assert!(t - slot < SLOT_MS);
            prop_assert_eq!(slot.rem_euclid(SLOT_MS), 0);
        }

        #[test]
        fn truncate_lands_on_local_quarter_hours(t in 0i64..4_102_444_800_000) {
            let kolkata = chrono_tz::Asia::Kolkata;
            let slot = truncate_to_slot(t, kolkata);
            prop_assert_eq!(truncate_to_slot(slot, kolkata), slot);
            prop_assert!(slot <= t && t - slot < SLOT_MS);
            let wall = local(slot, kolkata).unwrap();
            prop_assert_eq!(wall.minute() % SLOT_MINUTES, 0);
            prop_assert_eq!(wall.second(), 0);
        }

        #[test]
        fn slot_index_in_range(t in 0i64..4_102_444_800_000) {
            let ny: Tz = "America/New_York".parse().unwrap();
            prop_assert!(slot_index_of_day(t, ny) < SLOTS_PER_DAY);
        }
    }
}
