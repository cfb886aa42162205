use ulid::Ulid;

use crate::model::SlotKey;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input — the caller's fault, never retried.
    Validation(&'static str),
    /// Unknown booking/notification id.
    NotFound(Ulid),
    /// Slot not present in the floor layout.
    UnknownSlot(SlotKey),
    /// Slot no longer free at commit time. Caller should re-fetch
    /// availability and let the user choose again.
    Conflict(SlotKey),
    /// Daily/hourly/visitor cap reached. Terminal for the attempt.
    CapacityExceeded(&'static str),
    /// The allocator found no replacement slot anywhere. Surfaced as an
    /// operator-visible Blocked state; never auto-retried.
    AllocationExhausted(Ulid),
    /// Accept/decline called on a relocation that is not awaiting a decision.
    NotAwaitingDecision(Ulid),
    /// Structural limit hit (name length, bookings per slot, ...).
    LimitExceeded(&'static str),
    /// The ledger writer failed — transient store failure. Safe to retry
    /// the whole check-then-act sequence from scratch.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UnknownSlot(key) => write!(f, "unknown slot: {key}"),
            EngineError::Conflict(key) => write!(f, "slot {key} no longer available"),
            EngineError::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            EngineError::AllocationExhausted(id) => {
                write!(f, "no replacement slot available for booking {id}")
            }
            EngineError::NotAwaitingDecision(id) => {
                write!(f, "booking {id} has no relocation awaiting a decision")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
