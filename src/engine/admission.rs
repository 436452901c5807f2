use serde::Serialize;

use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;
use crate::slot::{self, SLOT_MS};

use super::availability::Snapshot;
use super::validate::{parse_time, validate_contact, validate_party_size};
use super::{Engine, EngineError};

/// How far from the requested slot admission looks, both for the snapshot
/// and for alternatives.
pub const SEARCH_RADIUS_MS: Ms = 2 * HOUR;

pub const MAX_SUGGESTIONS: usize = 4;

/// A booking attempt as a guest submits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub name: String,
    pub email: String,
    pub party_size: i64,
    /// ISO-8601 instant; rounded down to its slot before booking.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// `time` is the caller's string, untouched; the reservation holds the slot.
    Booked { reservation: Reservation, time: String },
    /// Nearby slots with room, closest first. Possibly empty.
    Rejected { suggestions: Vec<Ms> },
}

impl BookingOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked { .. })
    }

    pub fn response(&self) -> BookingResponse {
        match self {
            BookingOutcome::Booked { time, .. } => BookingResponse::Booked {
                success: true,
                time: time.clone(),
            },
            BookingOutcome::Rejected { suggestions } => BookingResponse::Rejected {
                success: false,
                suggested_times: suggestions.iter().map(|&t| slot::format_instant(t)).collect(),
            },
        }
    }
}

/// JSON shape of a booking answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BookingResponse {
    Booked {
        success: bool,
        time: String,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        success: bool,
        suggested_times: Vec<String>,
    },
}

/// Slots within the search radius that still have room, in the order
/// +15, −15, +30, −30, … minutes, at most `MAX_SUGGESTIONS` of them.
pub(super) fn suggest_alternatives(snapshot: &Snapshot, slot: Ms) -> Result<Vec<Ms>, EngineError> {
    let mut found = Vec::new();
    let deltas = (1..).map(|k| k * SLOT_MS).take_while(|&d| d < SEARCH_RADIUS_MS);
    for delta in deltas {
        for candidate in [slot + delta, slot - delta] {
            if snapshot.remaining(candidate)? > 0 {
                found.push(candidate);
                if found.len() >= MAX_SUGGESTIONS {
                    return Ok(found);
                }
            }
        }
    }
    Ok(found)
}

impl Engine {
    /// Book a party at the slot containing `request.time`, or say where
    /// there is room nearby.
    pub async fn attempt_booking(&self, request: BookingRequest) -> Result<BookingOutcome, EngineError> {
        let party_size = validate_party_size(request.party_size)?;
        validate_contact(&request.name, &request.email)?;
        let tz = self.tz();
        let slot = slot::truncate_to_slot(parse_time(&request.time, tz)?, tz);

        let result = if self.policy.serialize_admissions {
            let lease = self.slot_lease(slot);
            let _guard = lease.lock().await;
            self.admit(slot, party_size, request).await
        } else {
            self.admit(slot, party_size, request).await
        };

        let outcome = match &result {
            Ok(BookingOutcome::Booked { .. }) => "booked",
            Ok(BookingOutcome::Rejected { .. }) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn admit(
        &self,
        slot: Ms,
        party_size: u32,
        request: BookingRequest,
    ) -> Result<BookingOutcome, EngineError> {
        let snapshot = self.snapshot(Span::around(slot, SEARCH_RADIUS_MS)).await?;
        let remaining = snapshot.remaining(slot)?;
        tracing::debug!("capacity at {}: {remaining}", slot::format_instant(slot));

        if remaining > 0 {
            let reservation = self
                .reservations
                .create(NewReservation {
                    name: request.name,
                    email: request.email,
                    party_size,
                    slot,
                })
                .await?;
            tracing::info!(
                "booked {} (party of {party_size}) at {}",
                reservation.id,
                slot::format_instant(slot)
            );
            return Ok(BookingOutcome::Booked {
                reservation,
                time: request.time,
            });
        }

        let suggestions = suggest_alternatives(&snapshot, slot)?;
        if suggestions.is_empty() {
            tracing::warn!("slot {} full, nothing free nearby", slot::format_instant(slot));
        } else {
            tracing::debug!(
                "slot {} full, suggesting {:?}",
                slot::format_instant(slot),
                suggestions.iter().map(|&t| slot::format_instant(t)).collect::<Vec<_>>()
            );
        }
        Ok(BookingOutcome::Rejected { suggestions })
    }
}
