use std::collections::BTreeMap;

use crate::model::*;

use super::EngineError;

/// Parties per slot when the restaurant has never been configured.
pub const DEFAULT_BASE_PARTIES_PER_SLOT: u32 = 5;

/// Default capacity: the stored config wins, then the deployment fallback.
pub fn resolve_default(config: Option<&RestaurantConfig>, fallback: Option<u32>) -> Option<u32> {
    config.map(|c| c.base_parties_per_slot).or(fallback)
}

/// Capacity that applies to `slot` (already truncated).
///
/// A non-negative override for the exact slot wins; a missing or negative one
/// falls through to `default`. With nothing to fall back on, the slot has no
/// capacity at all, which is a configuration problem, not a full slot.
pub fn effective_capacity(
    slot: Ms,
    overrides: &BTreeMap<Ms, i32>,
    default: Option<u32>,
) -> Result<u32, EngineError> {
    match overrides.get(&slot) {
        Some(&capacity) if capacity >= 0 => Ok(capacity as u32),
        _ => default.ok_or(EngineError::Configuration(
            "no usable override and no default capacity",
        )),
    }
}
