use crate::model::{Booking, FloorLayout, RateType, SlotKey, TimeWindow};

use super::overlap::{overlaps, validate_window};
use super::{Engine, EngineError};

// ── Availability Index ────────────────────────────────────────────

/// Whether a slot with the given confirmed bookings is free for the
/// candidate window at the candidate's rate granularity.
pub fn slot_is_free<'a>(
    confirmed: impl Iterator<Item = &'a Booking>,
    window: &TimeWindow,
    rate: RateType,
) -> bool {
    for booking in confirmed {
        if overlaps(window, &booking.window, rate) {
            return false;
        }
    }
    true
}

/// Enumerate the layout's slots minus an optional exclusion, in layout order.
fn candidate_keys<'a>(
    layout: &'a FloorLayout,
    exclude: Option<&'a SlotKey>,
) -> impl Iterator<Item = SlotKey> + 'a {
    layout
        .slot_keys()
        .filter(move |key| exclude.is_none_or(|ex| key != ex))
}

impl Engine {
    /// The Availability Index: every layout slot with no confirmed booking
    /// overlapping the candidate window. Derived on demand from active
    /// bookings — the persisted occupancy cache is never consulted.
    ///
    /// `exclude` removes the slot being vacated when invoked for relocation.
    ///
    /// O(slots × bookings): the layout is a fixed small grid.
    pub async fn available_slots(
        &self,
        window: &TimeWindow,
        rate: RateType,
        exclude: Option<&SlotKey>,
    ) -> Result<Vec<SlotKey>, EngineError> {
        validate_window(window, rate)?;

        let mut free = Vec::new();
        for key in candidate_keys(&self.layout, exclude) {
            let Some(rs) = self.slot_state(&key) else {
                continue;
            };
            let guard = rs.read().await;
            if slot_is_free(guard.confirmed(), window, rate) {
                free.push(key);
            }
        }
        Ok(free)
    }
}
