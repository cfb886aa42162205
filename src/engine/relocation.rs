use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::availability::slot_is_free;
use super::overlap::{now_ms, today};
use super::{Engine, EngineError, apply_to_slot, choose_replacement};

impl Engine {
    /// Detected: a booking's slot is unusable (overstay by another
    /// occupant, or an external fault).
    ///
    /// Runs the availability index excluding the affected slot, asks the
    /// allocator for a replacement, and either opens an offer
    /// (AwaitingDecision, with one non-deduplicated notification naming
    /// the replacement slot) or records Blocked and reports exhaustion.
    ///
    /// Idempotent per booking id: any previously recorded workflow state —
    /// pending or terminal — makes a repeat call a no-op that returns the
    /// current state. The guard is keyed by booking id, not slot, so a
    /// later incident on the same slot is not suppressed.
    pub async fn report_unusable(&self, booking_id: Ulid) -> Result<RelocationState, EngineError> {
        if let Some(state) = self.relocations.get(&booking_id) {
            return Ok(state.value().clone());
        }

        let key = self
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let rs = self
            .slot_state(&key)
            .ok_or_else(|| EngineError::UnknownSlot(key.clone()))?;
        let booking = {
            let guard = rs.read().await;
            guard
                .booking(booking_id)
                .cloned()
                .ok_or(EngineError::NotFound(booking_id))?
        };
        if !booking.is_confirmed() {
            return Err(EngineError::Validation("booking is cancelled"));
        }

        let available = self
            .available_slots(&booking.window, booking.rate, Some(&key))
            .await?;
        let choice = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            choose_replacement(&available, &key.floor, &mut *rng)
        };

        let Some(offer) = choice else {
            let txn = vec![Event::RelocationNoted {
                booking_id,
                state: RelocationState::Blocked,
            }];
            self.wal_append(&txn).await?;
            self.apply_side(&txn[0]);
            metrics::counter!(observability::RELOCATIONS_BLOCKED_TOTAL).increment(1);
            tracing::warn!(booking = %booking_id, slot = %key, "relocation blocked: no free slot");
            return Err(EngineError::AllocationExhausted(booking_id));
        };

        let notification = Notification {
            id: Ulid::new(),
            recipient: booking.owner.clone(),
            message: format!("Slot {key} is unavailable; replacement slot {offer} is on offer"),
            slot: key.clone(),
            kind: booking.kind,
            timestamp_ms: now_ms(),
            read: false,
        };
        let state = RelocationState::AwaitingDecision {
            offer: offer.clone(),
        };

        // One transaction: the offer and its notification land together
        let txn = vec![
            Event::NotificationPosted {
                notification: notification.clone(),
            },
            Event::RelocationNoted {
                booking_id,
                state: state.clone(),
            },
        ];
        self.wal_append(&txn).await?;
        for event in &txn {
            self.apply_side(event);
        }
        self.notify.send(&notification);
        metrics::counter!(observability::RELOCATIONS_OPENED_TOTAL).increment(1);
        tracing::info!(booking = %booking_id, from = %key, to = %offer, "relocation offered");
        Ok(state)
    }

    /// Accept: atomically move the booking to the offered slot. The old
    /// booking is cancelled and a replacement with a fresh id is created —
    /// never mutated in place, preserving audit history. Both slots'
    /// occupancy updates land in the same ledger transaction.
    ///
    /// Returns the replacement booking's id.
    pub async fn accept_relocation(&self, booking_id: Ulid) -> Result<Ulid, EngineError> {
        let offer = match self.relocations.get(&booking_id).map(|s| s.value().clone()) {
            Some(RelocationState::AwaitingDecision { offer }) => offer,
            _ => return Err(EngineError::NotAwaitingDecision(booking_id)),
        };

        let old_key = self
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let (mut old_guard, mut new_guard) = self.lock_slot_pair(&old_key, &offer).await?;

        let old = old_guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if !old.is_confirmed() {
            return Err(EngineError::Validation("booking is cancelled"));
        }
        // The offer may have been taken since it was made
        if !slot_is_free(new_guard.confirmed(), &old.window, old.rate) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(offer));
        }

        let replacement = Booking {
            id: Ulid::new(),
            slot: offer.clone(),
            status: BookingStatus::Confirmed,
            cancel_reason: None,
            created_at_ms: now_ms(),
            ..old
        };
        let replacement_id = replacement.id;

        let txn = vec![
            Event::BookingCancelled {
                id: booking_id,
                reason: Some("relocated".into()),
            },
            Event::BookingRecorded {
                booking: replacement,
            },
            Event::RelocationNoted {
                booking_id,
                state: RelocationState::Relocated {
                    replacement: replacement_id,
                },
            },
        ];
        self.wal_append(&txn).await?;
        apply_to_slot(&mut old_guard, &txn[0], &self.booking_index);
        apply_to_slot(&mut new_guard, &txn[1], &self.booking_index);
        self.apply_side(&txn[2]);
        metrics::counter!(observability::RELOCATIONS_ACCEPTED_TOTAL).increment(1);
        tracing::info!(booking = %booking_id, replacement = %replacement_id, slot = %offer, "relocation accepted");
        Ok(replacement_id)
    }

    /// Decline: atomically cancel the booking and issue one compensation
    /// coupon, its discount tier keyed by the booking's rate.
    pub async fn decline_relocation(&self, booking_id: Ulid) -> Result<Coupon, EngineError> {
        let awaiting = matches!(
            self.relocations.get(&booking_id).map(|s| s.value().clone()),
            Some(RelocationState::AwaitingDecision { .. })
        );
        if !awaiting {
            return Err(EngineError::NotAwaitingDecision(booking_id));
        }

        let (_key, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.is_confirmed() {
            return Err(EngineError::Validation("booking is cancelled"));
        }

        let created_on = today();
        let coupon = Coupon {
            id: Ulid::new(),
            owner: booking.owner.clone(),
            booking_id,
            discount_percent: booking.rate.discount_percent(),
            created_on,
            expires_on: created_on
                .checked_add_months(chrono::Months::new(1))
                .unwrap_or(created_on),
            used: false,
        };

        let txn = vec![
            Event::BookingCancelled {
                id: booking_id,
                reason: Some("slot unavailable — compensated".into()),
            },
            Event::CouponIssued {
                coupon: coupon.clone(),
            },
            Event::RelocationNoted {
                booking_id,
                state: RelocationState::Compensated { coupon: coupon.id },
            },
        ];
        self.wal_append(&txn).await?;
        apply_to_slot(&mut guard, &txn[0], &self.booking_index);
        self.apply_side(&txn[1]);
        self.apply_side(&txn[2]);
        metrics::counter!(observability::RELOCATIONS_DECLINED_TOTAL).increment(1);
        tracing::info!(booking = %booking_id, coupon = %coupon.id, "relocation declined, coupon issued");
        Ok(coupon)
    }
}
