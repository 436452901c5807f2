use chrono_tz::Tz;

use crate::limits::*;
use crate::model::*;
use crate::slot;

use super::EngineError;

pub(super) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::invalid("timestamp out of range"));
    }
    Ok(())
}

/// Half-open query window, bounded in both position and width.
pub(super) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    validate_instant(start)?;
    validate_instant(end)?;
    if start >= end {
        return Err(EngineError::invalid("window start must be before its end"));
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::invalid("window too wide"));
    }
    Ok(Span::new(start, end))
}

pub(super) fn parse_time(raw: &str, tz: Tz) -> Result<Ms, EngineError> {
    let t = slot::parse_instant(raw, tz)
        .ok_or_else(|| EngineError::invalid(format!("unparseable time {raw:?}")))?;
    validate_instant(t)?;
    Ok(t)
}

pub(super) fn validate_party_size(party_size: i64) -> Result<u32, EngineError> {
    if party_size <= 0 {
        return Err(EngineError::invalid("party size must be positive"));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::invalid("party size too large"));
    }
    Ok(party_size as u32)
}

pub(super) fn validate_contact(name: &str, email: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::invalid("name too long"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::invalid("email too long"));
    }
    Ok(())
}

pub(super) fn validate_address(address: Option<&str>) -> Result<(), EngineError> {
    if let Some(a) = address
        && a.len() > MAX_ADDRESS_LEN
    {
        return Err(EngineError::invalid("address too long"));
    }
    Ok(())
}
