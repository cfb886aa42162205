use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::slot_is_free;
use super::dedup::should_emit;
use super::overlap::{date_of_ms, now_ms, now_naive, today, validate_window};
use super::{Engine, EngineError, apply_to_slot, fine::compute_fine};

/// Input to the reservation commit protocol. The id and creation timestamp
/// are assigned by the engine at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub owner: String,
    pub kind: BookingKind,
    pub rate: RateType,
    pub slot: SlotKey,
    pub window: TimeWindow,
    pub price: f64,
}

impl Engine {
    /// The reservation commit protocol: validate, count caps against the
    /// live booking set, then re-check the slot under its write lock and
    /// finalize booking + occupancy in one ledger transaction.
    ///
    /// The cap/availability reads are check-then-act; the re-check under
    /// the lock narrows the selection-to-commit window but a true race
    /// between two engines sharing a store remains a residual risk.
    pub async fn commit_booking(&self, request: BookingRequest) -> Result<Ulid, EngineError> {
        validate_username(&request.owner)?;
        if !(request.price >= 0.0) {
            return Err(EngineError::Validation("price must be a non-negative number"));
        }
        validate_window(&request.window, request.rate)?;
        if !self.layout.contains(&request.slot) {
            return Err(EngineError::UnknownSlot(request.slot.clone()));
        }

        self.check_booking_caps(&request.owner, request.rate, request.window.entry_date)
            .await?;

        let rs = self
            .slot_state(&request.slot)
            .ok_or_else(|| EngineError::UnknownSlot(request.slot.clone()))?;
        let mut guard = rs.write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many bookings on slot"));
        }

        // Re-check-then-write: the slot may have been taken since selection
        if !slot_is_free(guard.confirmed(), &request.window, request.rate) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(request.slot.clone()));
        }

        let booking = Booking {
            id: Ulid::new(),
            owner: request.owner,
            kind: request.kind,
            rate: request.rate,
            slot: request.slot,
            window: request.window,
            price: request.price,
            status: BookingStatus::Confirmed,
            cancel_reason: None,
            created_at_ms: now_ms(),
        };
        let id = booking.id;

        let txn = vec![Event::BookingRecorded { booking }];
        self.wal_append(&txn).await?;
        apply_to_slot(&mut guard, &txn[0], &self.booking_index);
        metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        tracing::debug!(booking = %id, slot = %guard.key, "booking committed");
        Ok(id)
    }

    /// Per-user caps, evaluated against the live booking set (never a
    /// cached count): at most 5 non-cancelled bookings created today, and
    /// at most 5 non-cancelled hourly bookings sharing one entry date.
    async fn check_booking_caps(
        &self,
        owner: &str,
        rate: RateType,
        entry_date: chrono::NaiveDate,
    ) -> Result<(), EngineError> {
        let today = today();
        let mut created_today = 0usize;
        let mut hourly_same_entry = 0usize;

        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            let guard = rs.read().await;
            for b in guard.confirmed().filter(|b| b.owner == owner) {
                if date_of_ms(b.created_at_ms) == today {
                    created_today += 1;
                }
                if b.rate == RateType::Hourly && b.window.entry_date == entry_date {
                    hourly_same_entry += 1;
                }
            }
        }

        if rate == RateType::Hourly && hourly_same_entry >= HOURLY_PER_DATE_CAP {
            metrics::counter!(observability::CAP_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::CapacityExceeded(
                "hourly bookings for this entry date cap reached",
            ));
        }
        if created_today >= DAILY_BOOKING_CAP {
            metrics::counter!(observability::CAP_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::CapacityExceeded("daily booking cap reached"));
        }
        Ok(())
    }

    /// Cancel a booking. Convergent: cancelling an already-cancelled
    /// booking succeeds without writing a second ledger record.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: Option<&str>,
    ) -> Result<SlotKey, EngineError> {
        let (key, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let already_cancelled = guard
            .booking(booking_id)
            .is_some_and(|b| !b.is_confirmed());
        if already_cancelled {
            return Ok(key);
        }

        let txn = vec![Event::BookingCancelled {
            id: booking_id,
            reason: reason.map(str::to_string),
        }];
        self.wal_append(&txn).await?;
        apply_to_slot(&mut guard, &txn[0], &self.booking_index);
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(key)
    }

    /// Register a visitor attributed to a resident. Shares the cap counting
    /// pattern of the commit protocol: at most 3 registrations, counted
    /// against the live record set.
    pub async fn register_visitor(
        &self,
        resident: &str,
        visitor_name: &str,
    ) -> Result<Ulid, EngineError> {
        validate_username(resident)?;
        validate_username(visitor_name)?;

        let current = self.visitors.get(resident).map_or(0, |v| v.len());
        if current >= VISITOR_CAP {
            metrics::counter!(observability::CAP_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::CapacityExceeded("visitor registration cap reached"));
        }

        let record = VisitorRecord {
            id: Ulid::new(),
            resident: resident.to_string(),
            visitor_name: visitor_name.to_string(),
            registered_at_ms: now_ms(),
        };
        let id = record.id;
        let txn = vec![Event::VisitorRecorded { record }];
        self.wal_append(&txn).await?;
        self.apply_side(&txn[0]);
        Ok(id)
    }

    /// Acknowledge payment of an overstay fine: recompute the assessment at
    /// the current clock and persist it as paid. The only path that stores
    /// a fine record.
    pub async fn settle_fine(&self, booking_id: Ulid) -> Result<FineRecord, EngineError> {
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
            return Err(EngineError::Validation("cancelled bookings accrue no fine"));
        }

        let assessment = compute_fine(booking.window.end_instant(), now_naive(), booking.price);
        let record = FineRecord {
            booking_id,
            overdue_minutes: assessment.overdue_minutes,
            rounds: assessment.rounds,
            amount: assessment.amount,
            original_price: booking.price,
            paid: true,
        };

        let txn = vec![Event::FineSettled {
            record: record.clone(),
        }];
        self.wal_append(&txn).await?;
        self.apply_side(&txn[0]);
        metrics::counter!(observability::FINES_SETTLED_TOTAL).increment(1);
        Ok(record)
    }

    /// Flip a notification's read flag.
    pub async fn mark_notification_read(
        &self,
        recipient: &str,
        notification_id: Ulid,
    ) -> Result<(), EngineError> {
        let known = self
            .inbox
            .get(recipient)
            .is_some_and(|v| v.iter().any(|n| n.id == notification_id));
        if !known {
            return Err(EngineError::NotFound(notification_id));
        }

        let txn = vec![Event::NotificationRead {
            recipient: recipient.to_string(),
            id: notification_id,
        }];
        self.wal_append(&txn).await?;
        self.apply_side(&txn[0]);
        Ok(())
    }

    /// Non-deduplicated emission path: one-shot system alerts. Persists the
    /// notification and pushes it to the recipient's live feed.
    pub async fn post_alert(
        &self,
        recipient: &str,
        message: &str,
        slot: SlotKey,
        kind: BookingKind,
    ) -> Result<Ulid, EngineError> {
        let notification = self.build_notification(recipient, message, slot, kind)?;
        let id = notification.id;
        let txn = vec![Event::NotificationPosted { notification }];
        self.wal_append(&txn).await?;
        self.apply_side(&txn[0]);
        if let Event::NotificationPosted { notification } = &txn[0] {
            self.notify.send(notification);
        }
        Ok(id)
    }

    /// Deduplicated emission path: periodic reminders. Returns None when a
    /// semantically identical notification was already sent to the same
    /// recipient inside the cooldown window.
    pub async fn post_reminder(
        &self,
        recipient: &str,
        message: &str,
        slot: SlotKey,
        kind: BookingKind,
    ) -> Result<Option<Ulid>, EngineError> {
        let notification = self.build_notification(recipient, message, slot, kind)?;

        let suppressed = self
            .inbox
            .get(recipient)
            .is_some_and(|recent| !should_emit(&notification, recent.value(), DEDUP_COOLDOWN_MS));
        if suppressed {
            metrics::counter!(observability::NOTIFICATIONS_SUPPRESSED_TOTAL).increment(1);
            return Ok(None);
        }

        let id = notification.id;
        let txn = vec![Event::NotificationPosted { notification }];
        self.wal_append(&txn).await?;
        self.apply_side(&txn[0]);
        if let Event::NotificationPosted { notification } = &txn[0] {
            self.notify.send(notification);
        }
        Ok(Some(id))
    }

    fn build_notification(
        &self,
        recipient: &str,
        message: &str,
        slot: SlotKey,
        kind: BookingKind,
    ) -> Result<Notification, EngineError> {
        validate_username(recipient)?;
        if message.is_empty() {
            return Err(EngineError::Validation("message must not be empty"));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::LimitExceeded("message too long"));
        }
        Ok(Notification {
            id: Ulid::new(),
            recipient: recipient.to_string(),
            message: message.to_string(),
            slot,
            kind,
            timestamp_ms: now_ms(),
            read: false,
        })
    }
}

fn validate_username(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation("username must not be empty"));
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(EngineError::LimitExceeded("username too long"));
    }
    Ok(())
}
