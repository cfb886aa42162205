use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the ordering/dedup time type.
pub type Ms = i64;

/// Pricing/duration category. Changes overlap granularity: hourly bookings
/// compare at date+time precision, daily and monthly at date precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateType {
    Hourly,
    Daily,
    Monthly,
}

impl RateType {
    /// Compensation-coupon discount tier keyed by rate.
    pub fn discount_percent(&self) -> u8 {
        match self {
            RateType::Hourly => 10,
            RateType::Daily => 20,
            RateType::Monthly => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    Resident,
    Visitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

/// Identity of a parking slot: floor name + slot label within the floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub floor: String,
    pub slot: String,
}

impl SlotKey {
    pub fn new(floor: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            floor: floor.into(),
            slot: slot.into(),
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.floor, self.slot)
    }
}

/// A booking's time window. Times are absent for daily/monthly bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub entry_date: NaiveDate,
    pub entry_time: Option<NaiveTime>,
    pub exit_date: NaiveDate,
    pub exit_time: Option<NaiveTime>,
}

impl TimeWindow {
    pub fn hourly(
        entry_date: NaiveDate,
        entry_time: NaiveTime,
        exit_date: NaiveDate,
        exit_time: NaiveTime,
    ) -> Self {
        Self {
            entry_date,
            entry_time: Some(entry_time),
            exit_date,
            exit_time: Some(exit_time),
        }
    }

    pub fn dated(entry_date: NaiveDate, exit_date: NaiveDate) -> Self {
        Self {
            entry_date,
            entry_time: None,
            exit_date,
            exit_time: None,
        }
    }

    /// Entry instant; midnight when no time is set.
    pub fn start_instant(&self) -> NaiveDateTime {
        self.entry_date
            .and_time(self.entry_time.unwrap_or(NaiveTime::MIN))
    }

    /// Exit instant. A dated window ends at midnight after its exit date,
    /// so a daily booking is overdue starting the next day.
    pub fn end_instant(&self) -> NaiveDateTime {
        match self.exit_time {
            Some(t) => self.exit_date.and_time(t),
            None => (self.exit_date + chrono::Days::new(1)).and_time(NaiveTime::MIN),
        }
    }
}

/// One reservation of one slot for one time window. The root entity:
/// occupancy, notifications, coupons, and fines all reference a booking id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner: String,
    pub kind: BookingKind,
    pub rate: RateType,
    pub slot: SlotKey,
    pub window: TimeWindow,
    pub price: f64,
    pub status: BookingStatus,
    pub cancel_reason: Option<String>,
    pub created_at_ms: Ms,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

/// Advisory occupancy cache entry. Rebuilt from confirmed bookings after
/// every apply; never read as ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub time_range: Option<(NaiveTime, NaiveTime)>,
    pub username: String,
}

/// In-memory state of one slot: all bookings ever placed on it (cancelled
/// records kept for audit) plus the denormalized occupancy cache.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub key: SlotKey,
    /// All bookings, sorted by entry date then entry time.
    pub bookings: Vec<Booking>,
    /// Advisory cache; availability never consults it.
    pub occupancy: Vec<OccupancyRecord>,
}

impl SlotState {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            bookings: Vec::new(),
            occupancy: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by entry date/time.
    pub fn insert_booking(&mut self, booking: Booking) {
        let sort_key = (booking.window.entry_date, booking.window.entry_time);
        let pos = self
            .bookings
            .partition_point(|b| (b.window.entry_date, b.window.entry_time) <= sort_key);
        self.bookings.insert(pos, booking);
        self.rebuild_occupancy();
    }

    /// Mark a booking cancelled. Idempotent: cancelling a cancelled booking
    /// is a no-op. Returns false when the id is not on this slot.
    pub fn cancel_booking(&mut self, id: Ulid, reason: Option<&str>) -> bool {
        let Some(b) = self.bookings.iter_mut().find(|b| b.id == id) else {
            return false;
        };
        if b.status == BookingStatus::Confirmed {
            b.status = BookingStatus::Cancelled;
            b.cancel_reason = reason.map(str::to_string);
        }
        self.rebuild_occupancy();
        true
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Confirmed bookings only — the set conflict checks run against.
    pub fn confirmed(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_confirmed())
    }

    /// Rebuild the advisory occupancy cache from confirmed bookings.
    pub fn rebuild_occupancy(&mut self) {
        self.occupancy = self
            .confirmed()
            .map(|b| OccupancyRecord {
                entry_date: b.window.entry_date,
                exit_date: b.window.exit_date,
                time_range: match (b.window.entry_time, b.window.exit_time) {
                    (Some(s), Some(e)) => Some((s, e)),
                    _ => None,
                },
                username: b.owner.clone(),
            })
            .collect();
    }
}

/// Static enumeration of floors and slot labels. Configuration, not
/// persisted state: availability is always derived against this grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorLayout {
    pub floors: Vec<FloorPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorPlan {
    pub floor: String,
    pub slots: Vec<String>,
}

impl FloorLayout {
    /// Six floors A–F, ten slots each ("A01".."A10").
    pub fn default_grid() -> Self {
        let floors = ["A", "B", "C", "D", "E", "F"]
            .iter()
            .map(|f| FloorPlan {
                floor: (*f).to_string(),
                slots: (1..=10).map(|n| format!("{f}{n:02}")).collect(),
            })
            .collect();
        Self { floors }
    }

    pub fn slot_keys(&self) -> impl Iterator<Item = SlotKey> + '_ {
        self.floors.iter().flat_map(|fp| {
            fp.slots
                .iter()
                .map(move |s| SlotKey::new(fp.floor.clone(), s.clone()))
        })
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.floors
            .iter()
            .any(|fp| fp.floor == key.floor && fp.slots.iter().any(|s| *s == key.slot))
    }

    pub fn slot_count(&self) -> usize {
        self.floors.iter().map(|fp| fp.slots.len()).sum()
    }
}

/// Recipient-scoped alert record. Dedup key = (message, slot, recipient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub recipient: String,
    pub message: String,
    pub slot: SlotKey,
    pub kind: BookingKind,
    pub timestamp_ms: Ms,
    pub read: bool,
}

/// Compensation artifact issued when a relocation offer is declined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Ulid,
    pub owner: String,
    pub booking_id: Ulid,
    pub discount_percent: u8,
    pub created_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub used: bool,
}

/// Settled overstay fine. Created only when payment is acknowledged;
/// pre-payment assessments are recomputed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineRecord {
    pub booking_id: Ulid,
    pub overdue_minutes: i64,
    pub rounds: u32,
    pub amount: f64,
    pub original_price: f64,
    pub paid: bool,
}

/// One visitor registration attributed to a resident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub id: Ulid,
    pub resident: String,
    pub visitor_name: String,
    pub registered_at_ms: Ms,
}

/// Per-booking relocation workflow state. Presence of any state is the
/// re-entrancy guard: a repeated Detected for the same booking is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocationState {
    AwaitingDecision { offer: SlotKey },
    Relocated { replacement: Ulid },
    Compensated { coupon: Ulid },
    Blocked,
}

impl RelocationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelocationState::AwaitingDecision { .. })
    }
}

/// Primitive ledger events — flat, no nesting. One WAL record holds a
/// `Vec<Event>` transaction; composite operations (relocation accept,
/// decline) are a single record and therefore apply all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingRecorded {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        reason: Option<String>,
    },
    VisitorRecorded {
        record: VisitorRecord,
    },
    NotificationPosted {
        notification: Notification,
    },
    NotificationRead {
        recipient: String,
        id: Ulid,
    },
    RelocationNoted {
        booking_id: Ulid,
        state: RelocationState,
    },
    CouponIssued {
        coupon: Coupon,
    },
    FineSettled {
        record: FineRecord,
    },
}
