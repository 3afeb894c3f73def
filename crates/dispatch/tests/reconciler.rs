//! Background reconciliation: polling, push notifications and shutdown.

mod common;

use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use beton_core::delivery::DeliveryPatch;
use beton_core::workflow::WorkflowState;
use beton_dispatch::store::DeliveryStore;
use beton_dispatch::BoardReconciler;

use common::*;

fn confirm_patch() -> DeliveryPatch {
    DeliveryPatch {
        state: Some(WorkflowState::Planned),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn change_burst_triggers_one_refresh_then_polling_continues() {
    let h = Harness::with_records(
        at(9, 0),
        vec![pending("BL-1", GREEN_CLIENT), pending("BL-2", GREEN_CLIENT)],
    )
    .await;
    let cancel = CancellationToken::new();
    let reconciler = BoardReconciler::new(h.board.clone(), h.bus.clone());
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    // Initial load plus the immediate first poll.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.backend.fetch_count(), 2);

    h.backend.update("BL-1", &confirm_patch()).await.unwrap();
    h.backend.update("BL-2", &confirm_patch()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.backend.fetch_count(), 3);
    assert_eq!(h.shown("BL-1").await.unwrap().state, WorkflowState::Planned);
    assert_eq!(h.shown("BL-2").await.unwrap().state, WorkflowState::Planned);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.backend.fetch_count(), 4);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn changes_on_other_days_are_ignored() {
    let other_day = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
    let mut elsewhere = pending("BL-7", GREEN_CLIENT);
    elsewhere.scheduled_date = other_day;
    let h = Harness::with_records(at(9, 0), vec![elsewhere]).await;

    let cancel = CancellationToken::new();
    let reconciler = BoardReconciler::new(h.board.clone(), h.bus.clone());
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let baseline = h.backend.fetch_count();

    h.backend.update("BL-7", &confirm_patch()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.backend.fetch_count(), baseline);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn day_switch_applies_to_a_waiting_subscription() {
    let next_day = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    let mut tomorrow = pending("BL-8", GREEN_CLIENT);
    tomorrow.scheduled_date = next_day;
    let h = Harness::with_records(at(9, 0), vec![tomorrow]).await;

    let cancel = CancellationToken::new();
    let reconciler = BoardReconciler::new(h.board.clone(), h.bus.clone());
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };
    // The loop is now idle, waiting on the first change for the old day.
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.board.load_day(next_day).await.unwrap();
    let baseline = h.backend.fetch_count();

    h.backend.update("BL-8", &confirm_patch()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.backend.fetch_count(), baseline + 1);
    assert_eq!(h.shown("BL-8").await.unwrap().state, WorkflowState::Planned);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn poll_failure_keeps_board_and_next_poll_recovers() {
    let h = Harness::with_records(at(9, 0), vec![pending("BL-1", GREEN_CLIENT)]).await;
    let cancel = CancellationToken::new();
    let reconciler = BoardReconciler::new(h.board.clone(), h.bus.clone());
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.backend.fail_next_fetches(1);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.board.status().await.stale);
    assert!(h.shown("BL-1").await.is_some());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!h.board.status().await.stale);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_loop() {
    let h = Harness::with_records(at(9, 0), vec![]).await;
    let cancel = CancellationToken::new();
    let reconciler = BoardReconciler::new(h.board.clone(), h.bus.clone());
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("reconciler did not stop")
        .unwrap();
}
