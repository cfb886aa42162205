//! Structural limits and policy constants.
//!
//! Limits bound untrusted input before it reaches the ledger; policy
//! constants are the booking rules the engine enforces.

use crate::model::Ms;

// ── Structural limits ───────────────────────────────────────────

/// Max garages a single manager will load.
pub const MAX_GARAGES: usize = 64;

/// Max length of a garage name (pre-sanitization).
pub const MAX_GARAGE_NAME_LEN: usize = 64;

/// Max bookings (confirmed + cancelled audit records) held per slot.
pub const MAX_BOOKINGS_PER_SLOT: usize = 4096;

/// Max length of a notification message.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Max length of a username (owner, recipient, visitor).
pub const MAX_USERNAME_LEN: usize = 64;

/// Max span of a single booking window, in days.
pub const MAX_WINDOW_DAYS: i64 = 366;

/// Notifications retained per recipient before the oldest are dropped.
pub const MAX_NOTIFICATIONS_PER_RECIPIENT: usize = 1024;

// ── Booking policy ──────────────────────────────────────────────

/// A user may hold at most this many non-cancelled bookings created today.
pub const DAILY_BOOKING_CAP: usize = 5;

/// A user may hold at most this many hourly bookings sharing one entry date.
pub const HOURLY_PER_DATE_CAP: usize = 5;

/// A resident may have at most this many visitor registrations.
pub const VISITOR_CAP: usize = 3;

/// Cooldown inside which a semantically identical notification is a duplicate.
pub const DEDUP_COOLDOWN_MS: Ms = 10 * 60 * 1000;

/// One fine round per started block of this many overdue minutes.
pub const FINE_ROUND_MINUTES: i64 = 15;
