use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use valet::engine::{BookingRequest, Engine, EngineError};
use valet::model::*;
use valet::notify::NotifyHub;
use valet::registry::GarageManager;

// ── Test infrastructure ──────────────────────────────────────

fn test_data_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir()
        .join("valet_int_test")
        .join(format!("{name}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// Future windows: the background detector must never see these as overstays
fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, day).unwrap()
}

fn daily(owner: &str, slot: SlotKey, entry: u32, exit: u32) -> BookingRequest {
    BookingRequest {
        owner: owner.into(),
        kind: BookingKind::Resident,
        rate: RateType::Daily,
        slot,
        window: TimeWindow::dated(d(entry), d(exit)),
        price: 120.0,
    }
}

/// Wait for a live notification with timeout.
async fn recv_notification(
    rx: &mut tokio::sync::broadcast::Receiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok()?.ok()
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_accept_flow() {
    let dir = test_data_dir("accept_flow");
    let gm = Arc::new(GarageManager::new(dir, 10_000));
    let engine = gm.get_or_create("central").unwrap();

    // The holder follows their live feed
    let mut feed = engine.notify.subscribe("alice");

    // Book, then have the slot reported unusable
    let slot = SlotKey::new("B", "B04");
    let booking = engine
        .commit_booking(daily("alice", slot.clone(), 10, 12))
        .await
        .unwrap();

    let state = engine.report_unusable(booking).await.unwrap();
    let RelocationState::AwaitingDecision { offer } = state else {
        panic!("expected a relocation offer, got {state:?}");
    };
    assert_eq!(offer.floor, "B"); // same-floor-first policy

    // The offer arrived on the live feed, naming the replacement slot
    let notification = recv_notification(&mut feed, Duration::from_secs(1))
        .await
        .expect("offer notification");
    assert!(notification.message.contains(&offer.to_string()));

    // Accept: the booking moves atomically
    let replacement = engine.accept_relocation(booking).await.unwrap();
    let old = engine.booking(booking).await.unwrap();
    let new = engine.booking(replacement).await.unwrap();
    assert_eq!(old.status, BookingStatus::Cancelled);
    assert_eq!(new.slot, offer);
    assert_eq!(new.window, old.window);

    // The vacated slot is bookable again for the same window
    engine
        .commit_booking(daily("bob", slot, 10, 12))
        .await
        .unwrap();
}

#[tokio::test]
async fn end_to_end_decline_flow() {
    let dir = test_data_dir("decline_flow");
    let gm = GarageManager::new(dir, 10_000);
    let engine = gm.get_or_create("central").unwrap();

    let booking = engine
        .commit_booking(daily("alice", SlotKey::new("C", "C03"), 10, 12))
        .await
        .unwrap();

    engine.report_unusable(booking).await.unwrap();
    let coupon = engine.decline_relocation(booking).await.unwrap();

    assert_eq!(coupon.discount_percent, 20);
    assert_eq!(coupon.booking_id, booking);
    assert_eq!(engine.coupon_count("alice"), 1);

    let cancelled = engine.booking(booking).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(
        cancelled.cancel_reason.as_deref(),
        Some("slot unavailable — compensated")
    );

    // A second detector firing changes nothing
    let state = engine.report_unusable(booking).await.unwrap();
    assert_eq!(state, RelocationState::Compensated { coupon: coupon.id });
    assert_eq!(engine.coupon_count("alice"), 1);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = test_data_dir("restart");
    let wal_path = dir.join("central.wal");

    let booking;
    let compensated;
    let coupon_id;
    {
        let engine = Engine::new(
            wal_path.clone(),
            FloorLayout::default_grid(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();

        booking = engine
            .commit_booking(daily("alice", SlotKey::new("A", "A01"), 10, 12))
            .await
            .unwrap();

        compensated = engine
            .commit_booking(daily("bob", SlotKey::new("D", "D07"), 15, 17))
            .await
            .unwrap();
        engine.report_unusable(compensated).await.unwrap();
        coupon_id = engine.decline_relocation(compensated).await.unwrap().id;
    }

    // "Restart": a fresh engine replays the same ledger
    let engine = Engine::new(
        wal_path,
        FloorLayout::default_grid(),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();

    assert!(engine.booking(booking).await.is_some_and(|b| b.is_confirmed()));
    assert_eq!(
        engine.relocation_state(compensated),
        Some(RelocationState::Compensated { coupon: coupon_id })
    );
    // The re-entrancy guard survived the restart too
    let state = engine.report_unusable(compensated).await.unwrap();
    assert!(state.is_terminal());
    assert_eq!(engine.coupon_count("bob"), 1);

    // The confirmed booking still blocks its window after replay
    let free = engine
        .available_slots(&TimeWindow::dated(d(10), d(12)), RateType::Daily, None)
        .await
        .unwrap();
    assert!(!free.contains(&SlotKey::new("A", "A01")));
}

#[tokio::test]
async fn concurrent_commits_one_slot_one_winner() {
    let dir = test_data_dir("race");
    let gm = GarageManager::new(dir, 10_000);
    let engine = gm.get_or_create("central").unwrap();

    let slot = SlotKey::new("E", "E05");
    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        let slot = slot.clone();
        handles.push(tokio::spawn(async move {
            engine
                .commit_booking(daily(&format!("user{i}"), slot, 10, 12))
                .await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 7);

    // Exactly one confirmed booking on the slot
    let bookings = engine.bookings_on_slot(&slot).await.unwrap();
    assert_eq!(bookings.iter().filter(|b| b.is_confirmed()).count(), 1);
}

#[tokio::test]
async fn garages_do_not_share_state() {
    let dir = test_data_dir("multi_garage");
    let gm = GarageManager::new(dir, 10_000);
    let north = gm.get_or_create("north").unwrap();
    let south = gm.get_or_create("south").unwrap();

    let slot = SlotKey::new("A", "A02");
    north
        .commit_booking(daily("alice", slot.clone(), 10, 12))
        .await
        .unwrap();

    let window = TimeWindow::dated(d(10), d(12));
    let free_south = south
        .available_slots(&window, RateType::Daily, None)
        .await
        .unwrap();
    assert!(free_south.contains(&slot));
    assert_eq!(south.bookings_for_owner("alice").await.len(), 0);
}
