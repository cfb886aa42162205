use crate::model::{Ms, Notification};

/// Whether a new notification should be emitted given the recipient's
/// recent notifications.
///
/// A candidate is a duplicate of a recent entry when (message, slot,
/// recipient) all match and the timestamps are less than `cooldown_ms`
/// apart. Best-effort: the check reads the recent set at call time, so two
/// concurrent emitters can both pass — a duplicate low-value alert, not a
/// correctness violation.
pub fn should_emit(new: &Notification, recent: &[Notification], cooldown_ms: Ms) -> bool {
    !recent.iter().any(|n| {
        n.recipient == new.recipient
            && n.slot == new.slot
            && n.message == new.message
            && (new.timestamp_ms - n.timestamp_ms).abs() < cooldown_ms
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DEDUP_COOLDOWN_MS;
    use crate::model::{BookingKind, SlotKey};
    use ulid::Ulid;

    const MINUTE: Ms = 60_000;

    fn notif(message: &str, slot: SlotKey, recipient: &str, timestamp_ms: Ms) -> Notification {
        Notification {
            id: Ulid::new(),
            recipient: recipient.to_string(),
            message: message.to_string(),
            slot,
            kind: BookingKind::Resident,
            timestamp_ms,
            read: false,
        }
    }

    #[test]
    fn duplicate_within_cooldown_suppressed() {
        let slot = SlotKey::new("B", "B02");
        let earlier = notif("please vacate", slot.clone(), "alice", 0);
        let candidate = notif("please vacate", slot, "alice", 2 * MINUTE);
        assert!(!should_emit(&candidate, &[earlier], DEDUP_COOLDOWN_MS));
    }

    #[test]
    fn duplicate_after_cooldown_allowed() {
        let slot = SlotKey::new("B", "B02");
        let earlier = notif("please vacate", slot.clone(), "alice", 0);
        let candidate = notif("please vacate", slot, "alice", 11 * MINUTE);
        assert!(should_emit(&candidate, &[earlier], DEDUP_COOLDOWN_MS));
    }

    #[test]
    fn key_fields_distinguish() {
        let slot = SlotKey::new("B", "B02");
        let earlier = notif("please vacate", slot.clone(), "alice", 0);

        let other_message = notif("fine pending", slot.clone(), "alice", MINUTE);
        assert!(should_emit(&other_message, std::slice::from_ref(&earlier), DEDUP_COOLDOWN_MS));

        let other_slot = notif("please vacate", SlotKey::new("B", "B03"), "alice", MINUTE);
        assert!(should_emit(&other_slot, std::slice::from_ref(&earlier), DEDUP_COOLDOWN_MS));

        let other_recipient = notif("please vacate", slot, "bob", MINUTE);
        assert!(should_emit(&other_recipient, &[earlier], DEDUP_COOLDOWN_MS));
    }

    #[test]
    fn empty_recent_set_always_emits() {
        let candidate = notif("anything", SlotKey::new("A", "A01"), "alice", 0);
        assert!(should_emit(&candidate, &[], DEDUP_COOLDOWN_MS));
    }

    #[test]
    fn scans_every_recent_entry() {
        let slot = SlotKey::new("B", "B02");
        let recent = vec![
            notif("fine pending", slot.clone(), "alice", 0),
            notif("please vacate", slot.clone(), "alice", 3 * MINUTE),
            notif("coupon issued", slot.clone(), "alice", 5 * MINUTE),
        ];
        let candidate = notif("please vacate", slot, "alice", 8 * MINUTE);
        assert!(!should_emit(&candidate, &recent, DEDUP_COOLDOWN_MS));
    }
}
