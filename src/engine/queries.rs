use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::fine::{FineAssessment, compute_fine};
use super::{Engine, EngineError};

/// One overstaying booking plus the bookings its presence blocks: confirmed
/// bookings on the same slot whose window has begun.
#[derive(Debug, Clone, PartialEq)]
pub struct OverstayIncident {
    pub booking: Booking,
    pub blocked: Vec<Ulid>,
}

impl Engine {
    pub async fn booking(&self, booking_id: Ulid) -> Option<Booking> {
        let key = self.slot_for_booking(&booking_id)?;
        let rs = self.slot_state(&key)?;
        let guard = rs.read().await;
        guard.booking(booking_id).cloned()
    }

    /// All bookings (any status) belonging to an owner, across all slots.
    pub async fn bookings_for_owner(&self, owner: &str) -> Vec<Booking> {
        let mut result = Vec::new();
        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            let guard = rs.read().await;
            result.extend(guard.bookings.iter().filter(|b| b.owner == owner).cloned());
        }
        result.sort_by_key(|b| b.created_at_ms);
        result
    }

    /// All bookings on one slot, confirmed and cancelled (audit history).
    pub async fn bookings_on_slot(&self, key: &SlotKey) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .slot_state(key)
            .ok_or_else(|| EngineError::UnknownSlot(key.clone()))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    /// Advisory occupancy cache for a slot. Denormalized — rebuilt after
    /// every commit, never used to answer availability.
    pub async fn occupancy_of(&self, key: &SlotKey) -> Result<Vec<OccupancyRecord>, EngineError> {
        let rs = self
            .slot_state(key)
            .ok_or_else(|| EngineError::UnknownSlot(key.clone()))?;
        let guard = rs.read().await;
        Ok(guard.occupancy.clone())
    }

    pub fn notifications_for(&self, recipient: &str) -> Vec<Notification> {
        self.inbox
            .get(recipient)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    /// Unread notification count, derived by re-query — never maintained
    /// as an incrementally updated counter.
    pub fn unread_count(&self, recipient: &str) -> usize {
        self.inbox
            .get(recipient)
            .map_or(0, |v| v.iter().filter(|n| !n.read).count())
    }

    pub fn coupons_for(&self, owner: &str) -> Vec<Coupon> {
        let mut coupons: Vec<Coupon> = self
            .coupons
            .iter()
            .filter(|e| e.value().owner == owner)
            .map(|e| e.value().clone())
            .collect();
        coupons.sort_by_key(|c| c.created_on);
        coupons
    }

    /// Coupon count, derived from the authoritative record set.
    pub fn coupon_count(&self, owner: &str) -> usize {
        self.coupons.iter().filter(|e| e.value().owner == owner).count()
    }

    pub fn relocation_state(&self, booking_id: Ulid) -> Option<RelocationState> {
        self.relocations.get(&booking_id).map(|e| e.value().clone())
    }

    pub fn visitor_count(&self, resident: &str) -> usize {
        self.visitors.get(resident).map_or(0, |v| v.len())
    }

    pub fn visitors_for(&self, resident: &str) -> Vec<VisitorRecord> {
        self.visitors
            .get(resident)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    /// Settled fine record, if payment was acknowledged.
    pub fn fine_record(&self, booking_id: Ulid) -> Option<FineRecord> {
        self.fines.get(&booking_id).map(|e| e.value().clone())
    }

    /// Recompute the overstay fine for a booking at the given clock.
    /// Idempotent; persisting is a separate, explicit step (`settle_fine`).
    pub async fn assess_fine(
        &self,
        booking_id: Ulid,
        now: NaiveDateTime,
    ) -> Result<FineAssessment, EngineError> {
        let booking = self
            .booking(booking_id)
            .await
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.is_confirmed() {
            return Err(EngineError::Validation("cancelled bookings accrue no fine"));
        }
        Ok(compute_fine(
            booking.window.end_instant(),
            now,
            booking.price,
        ))
    }

    /// Sweep for overstays: confirmed bookings whose exit instant has
    /// passed, paired with the confirmed bookings they block on the same
    /// slot. Uses try_read so a busy slot is skipped until the next sweep.
    pub fn collect_overstays(&self, now: NaiveDateTime) -> Vec<OverstayIncident> {
        let mut incidents = Vec::new();
        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            let Ok(guard) = rs.try_read() else {
                continue;
            };
            for b in guard.confirmed() {
                if b.window.end_instant() > now {
                    continue;
                }
                let blocked = guard
                    .confirmed()
                    .filter(|other| {
                        other.id != b.id
                            && other.window.start_instant() <= now
                            && now < other.window.end_instant()
                    })
                    .map(|other| other.id)
                    .collect();
                incidents.push(OverstayIncident {
                    booking: b.clone(),
                    blocked,
                });
            }
        }
        incidents
    }
}
