//! valet — reservation-consistency core for vehicle parking.
//!
//! Books parking slots against time windows, detects scheduling conflicts,
//! relocates bookings when a slot becomes unusable, escalates overstay
//! fines, and deduplicates notifications. Embedded as a library: the
//! caller supplies validated primitive inputs and renders the typed
//! results; the engine performs no UI or network I/O of its own.
//!
//! All state is derived from a per-garage write-ahead ledger. Every
//! multi-record operation is one ledger transaction, so a crash or
//! concurrent reader never observes a partially applied write.

pub mod detector;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod registry;
pub mod wal;
