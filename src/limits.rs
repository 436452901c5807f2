use crate::model::{Ms, HOUR};
use crate::slot::SLOTS_PER_DAY;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_ADDRESS_LEN: usize = 1024;
pub const MAX_PARTY_SIZE: i64 = 1000;

/// Widest availability query: two calendar months.
pub const MAX_QUERY_WINDOW_MS: Ms = 62 * 24 * HOUR;

/// Largest override batch: every slot of two calendar months.
pub const MAX_OVERRIDE_BATCH: usize = SLOTS_PER_DAY * 62;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
