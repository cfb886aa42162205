mod allocate;
mod availability;
mod dedup;
mod error;
mod fine;
mod mutations;
mod overlap;
mod queries;
mod relocation;

pub use allocate::choose_replacement;
pub use availability::slot_is_free;
pub use dedup::should_emit;
pub use error::EngineError;
pub use fine::{FineAssessment, compute_fine};
pub use mutations::BookingRequest;
pub use overlap::overlaps;
pub use queries::OverstayIncident;

pub(crate) use overlap::{now_naive, today};

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Transaction, Wal};

pub type SharedSlotState = Arc<RwLock<SlotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        txn: Transaction,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        txns: Vec<Transaction>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { txn, response } => {
                let mut batch = vec![(txn, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { txn, response }) => {
                            batch.push((txn, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Transaction, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Transaction, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (txn, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(txn) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { txns, response } => {
            let result = Wal::write_compact_file(wal.path(), &txns)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation-consistency core for one garage. All state is derived
/// from the WAL: slot bookings, the relocation ledger, notification
/// inboxes, coupons, settled fines, and visitor registrations.
pub struct Engine {
    /// Static floor/slot grid. Configuration, not state.
    pub layout: FloorLayout,
    pub slots: DashMap<SlotKey, SharedSlotState>,
    /// Reverse lookup: booking id → slot (includes cancelled bookings).
    pub(super) booking_index: DashMap<Ulid, SlotKey>,
    /// Relocation workflow state per affected booking id. Presence of any
    /// entry is the re-entrancy guard against duplicate offers.
    pub(super) relocations: DashMap<Ulid, RelocationState>,
    /// Notification inbox per recipient username.
    pub(super) inbox: DashMap<String, Vec<Notification>>,
    pub(super) coupons: DashMap<Ulid, Coupon>,
    /// Settled fines only — pre-payment assessments are never stored.
    pub(super) fines: DashMap<Ulid, FineRecord>,
    pub(super) visitors: DashMap<String, Vec<VisitorRecord>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        layout: FloorLayout,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        Self::with_rng(wal_path, layout, notify, StdRng::from_os_rng())
    }

    /// Deterministic allocation for tests: seed the allocator's RNG.
    pub fn with_seed(
        wal_path: PathBuf,
        layout: FloorLayout,
        notify: Arc<NotifyHub>,
        seed: u64,
    ) -> io::Result<Self> {
        Self::with_rng(wal_path, layout, notify, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        wal_path: PathBuf,
        layout: FloorLayout,
        notify: Arc<NotifyHub>,
        rng: StdRng,
    ) -> io::Result<Self> {
        let txns = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            booking_index: DashMap::new(),
            relocations: DashMap::new(),
            inbox: DashMap::new(),
            coupons: DashMap::new(),
            fines: DashMap::new(),
            visitors: DashMap::new(),
            wal_tx,
            notify,
            rng: Mutex::new(rng),
            layout,
        };

        // Every layout slot gets state up front; availability walks the grid.
        for key in engine.layout.slot_keys() {
            engine
                .slots
                .insert(key.clone(), Arc::new(RwLock::new(SlotState::new(key))));
        }

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context (lazy garage creation).
        for txn in &txns {
            for event in txn {
                engine.replay_event(event);
            }
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::BookingRecorded { booking } => {
                // Slots absent from the current layout (layout edits) still
                // get state so audit history and fines stay reachable.
                let rs = self
                    .slots
                    .entry(booking.slot.clone())
                    .or_insert_with(|| {
                        Arc::new(RwLock::new(SlotState::new(booking.slot.clone())))
                    })
                    .clone();
                let mut guard = rs.try_write().expect("replay: uncontended write");
                apply_to_slot(&mut guard, event, &self.booking_index);
            }
            Event::BookingCancelled { id, .. } => {
                if let Some(key) = self.slot_for_booking(id)
                    && let Some(rs) = self.slot_state(&key)
                {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_slot(&mut guard, event, &self.booking_index);
                }
            }
            other => self.apply_side(other),
        }
    }

    /// Write one transaction via the background group-commit writer.
    pub(super) async fn wal_append(&self, txn: &Transaction) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                txn: txn.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn slot_state(&self, key: &SlotKey) -> Option<SharedSlotState> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    pub fn slot_for_booking(&self, booking_id: &Ulid) -> Option<SlotKey> {
        self.booking_index.get(booking_id).map(|e| e.value().clone())
    }

    /// Lookup booking → slot, get the slot, acquire its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(SlotKey, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let key = self
            .slot_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .slot_state(&key)
            .ok_or_else(|| EngineError::UnknownSlot(key.clone()))?;
        let guard = rs.write_owned().await;
        Ok((key, guard))
    }

    /// Acquire write locks on two distinct slots in sorted key order, so
    /// concurrent multi-slot writers can never deadlock. Guards are
    /// returned in (a, b) argument order.
    pub(super) async fn lock_slot_pair(
        &self,
        a: &SlotKey,
        b: &SlotKey,
    ) -> Result<
        (
            tokio::sync::OwnedRwLockWriteGuard<SlotState>,
            tokio::sync::OwnedRwLockWriteGuard<SlotState>,
        ),
        EngineError,
    > {
        if a == b {
            return Err(EngineError::Validation("slot pair must be distinct"));
        }
        let rs_a = self
            .slot_state(a)
            .ok_or_else(|| EngineError::UnknownSlot(a.clone()))?;
        let rs_b = self
            .slot_state(b)
            .ok_or_else(|| EngineError::UnknownSlot(b.clone()))?;
        if a < b {
            let guard_a = rs_a.write_owned().await;
            let guard_b = rs_b.write_owned().await;
            Ok((guard_a, guard_b))
        } else {
            let guard_b = rs_b.write_owned().await;
            let guard_a = rs_a.write_owned().await;
            Ok((guard_a, guard_b))
        }
    }

    /// Apply a non-slot event to the side maps. Safe to call during replay
    /// and while holding slot locks — touches only the DashMaps.
    pub(super) fn apply_side(&self, event: &Event) {
        match event {
            Event::NotificationPosted { notification } => {
                let mut entry = self
                    .inbox
                    .entry(notification.recipient.clone())
                    .or_default();
                entry.push(notification.clone());
                let overflow = entry
                    .len()
                    .saturating_sub(crate::limits::MAX_NOTIFICATIONS_PER_RECIPIENT);
                if overflow > 0 {
                    entry.drain(..overflow);
                }
            }
            Event::NotificationRead { recipient, id } => {
                if let Some(mut entry) = self.inbox.get_mut(recipient)
                    && let Some(n) = entry.iter_mut().find(|n| n.id == *id)
                {
                    n.read = true;
                }
            }
            Event::RelocationNoted { booking_id, state } => {
                self.relocations.insert(*booking_id, state.clone());
            }
            Event::CouponIssued { coupon } => {
                self.coupons.insert(coupon.id, coupon.clone());
            }
            Event::FineSettled { record } => {
                self.fines.insert(record.booking_id, record.clone());
            }
            Event::VisitorRecorded { record } => {
                self.visitors
                    .entry(record.resident.clone())
                    .or_default()
                    .push(record.clone());
            }
            // Slot-level events are applied by the holder of the slot lock
            Event::BookingRecorded { .. } | Event::BookingCancelled { .. } => {}
        }
    }

    /// Compact the WAL: rewrite it with only the transactions needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut txns: Vec<Transaction> = Vec::new();

        // One transaction per slot, in sorted key order for determinism.
        // Bookings carry their status, so cancelled records replay as-is.
        let mut keys: Vec<SlotKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        for key in keys {
            let Some(rs) = self.slot_state(&key) else {
                continue;
            };
            let guard = rs.try_read().expect("compact: uncontended read");
            if guard.bookings.is_empty() {
                continue;
            }
            txns.push(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingRecorded { booking: b.clone() })
                    .collect(),
            );
        }

        let mut side: Transaction = Vec::new();
        for entry in self.inbox.iter() {
            for n in entry.value() {
                side.push(Event::NotificationPosted {
                    notification: n.clone(),
                });
            }
        }
        for entry in self.relocations.iter() {
            side.push(Event::RelocationNoted {
                booking_id: *entry.key(),
                state: entry.value().clone(),
            });
        }
        for entry in self.coupons.iter() {
            side.push(Event::CouponIssued {
                coupon: entry.value().clone(),
            });
        }
        for entry in self.fines.iter() {
            side.push(Event::FineSettled {
                record: entry.value().clone(),
            });
        }
        for entry in self.visitors.iter() {
            for record in entry.value() {
                side.push(Event::VisitorRecorded {
                    record: record.clone(),
                });
            }
        }
        if !side.is_empty() {
            txns.push(side);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { txns, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Apply a booking event to a slot (no locking — caller holds the lock).
pub(super) fn apply_to_slot(
    rs: &mut SlotState,
    event: &Event,
    index: &DashMap<Ulid, SlotKey>,
) {
    match event {
        Event::BookingRecorded { booking } => {
            index.insert(booking.id, booking.slot.clone());
            rs.insert_booking(booking.clone());
        }
        Event::BookingCancelled { id, reason } => {
            // Index entry stays: cancelled bookings remain addressable for
            // audit, fines, and coupon references.
            rs.cancel_booking(*id, reason.as_deref());
        }
        _ => {}
    }
}
