use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

/// Background task that periodically detects overstays and unusable slots.
///
/// Each overstaying booking yields a deduplicated reminder to its owner;
/// each booking blocked by an overstayer enters the relocation workflow.
/// The workflow's own per-booking guard makes repeat firings no-ops.
pub async fn run_detector(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        sweep(&engine).await;
    }
}

async fn sweep(engine: &Engine) {
    let now = crate::engine::now_naive();
    for incident in engine.collect_overstays(now) {
        let overstayer = &incident.booking;
        let message = format!(
            "Booking on slot {} has ended; please vacate the slot",
            overstayer.slot
        );
        match engine
            .post_reminder(&overstayer.owner, &message, overstayer.slot.clone(), overstayer.kind)
            .await
        {
            Ok(Some(_)) => info!(booking = %overstayer.id, slot = %overstayer.slot, "overstay reminder sent"),
            Ok(None) => {} // suppressed inside the cooldown window
            Err(e) => debug!(booking = %overstayer.id, "reminder skipped: {e}"),
        }

        for blocked_id in incident.blocked {
            match engine.report_unusable(blocked_id).await {
                Ok(state) => debug!(booking = %blocked_id, ?state, "relocation state"),
                Err(EngineError::AllocationExhausted(id)) => {
                    warn!(booking = %id, "relocation blocked: operator attention required");
                }
                // May already be handled, or cancelled meanwhile — fine
                Err(e) => debug!(booking = %blocked_id, "detector skip: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BookingRequest;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::Days;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("valet_test_detector");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Arc<Engine> {
        let notify = Arc::new(NotifyHub::new());
        Arc::new(
            Engine::with_seed(test_wal_path(name), FloorLayout::default_grid(), notify, 7)
                .unwrap(),
        )
    }

    async fn commit(engine: &Engine, owner: &str, slot: SlotKey, window: TimeWindow) -> Ulid {
        engine
            .commit_booking(BookingRequest {
                owner: owner.into(),
                kind: BookingKind::Resident,
                rate: RateType::Daily,
                slot,
                window,
                price: 90.0,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_reminds_overstayer_and_relocates_blocked() {
        let engine = engine("sweep_basic.wal");
        let slot = SlotKey::new("B", "B01");
        let today = crate::engine::today();

        // Overstayer: window ended two days ago
        let overstayer = commit(
            &engine,
            "carol",
            slot.clone(),
            TimeWindow::dated(today - Days::new(5), today - Days::new(2)),
        )
        .await;
        // Blocked holder: window in progress now
        let blocked = commit(
            &engine,
            "dave",
            slot.clone(),
            TimeWindow::dated(today - Days::new(1), today + Days::new(1)),
        )
        .await;

        sweep(&engine).await;

        // One reminder to the overstayer
        let reminders = engine.notifications_for("carol");
        assert_eq!(reminders.len(), 1);
        assert!(reminders[0].message.contains("please vacate"));

        // Blocked holder got a relocation offer
        assert!(matches!(
            engine.relocation_state(blocked),
            Some(RelocationState::AwaitingDecision { .. })
        ));
        // The overstayer itself was not relocated
        assert!(engine.relocation_state(overstayer).is_none());
    }

    #[tokio::test]
    async fn repeated_sweeps_do_not_duplicate() {
        let engine = engine("sweep_idempotent.wal");
        let slot = SlotKey::new("C", "C02");
        let today = crate::engine::today();

        commit(
            &engine,
            "carol",
            slot.clone(),
            TimeWindow::dated(today - Days::new(5), today - Days::new(2)),
        )
        .await;
        let blocked = commit(
            &engine,
            "dave",
            slot.clone(),
            TimeWindow::dated(today - Days::new(1), today + Days::new(1)),
        )
        .await;

        sweep(&engine).await;
        sweep(&engine).await;
        sweep(&engine).await;

        // Reminder deduplicated inside the cooldown window
        assert_eq!(engine.notifications_for("carol").len(), 1);
        // Exactly one relocation offer for the blocked booking
        assert_eq!(engine.notifications_for("dave").len(), 1);
        assert!(matches!(
            engine.relocation_state(blocked),
            Some(RelocationState::AwaitingDecision { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_without_overstays_is_quiet() {
        let engine = engine("sweep_quiet.wal");
        let slot = SlotKey::new("A", "A05");
        let today = crate::engine::today();

        commit(
            &engine,
            "erin",
            slot,
            TimeWindow::dated(today, today + Days::new(2)),
        )
        .await;

        sweep(&engine).await;
        assert!(engine.notifications_for("erin").is_empty());
    }
}
