#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use beton_core::clock::FixedClock;
use beton_core::credit::ClientCreditSnapshot;
use beton_core::delivery::DeliveryRecord;
use beton_core::policy::DispatchPolicy;
use beton_core::purchase_order::{PurchaseOrder, PurchaseOrderStatus};
use beton_core::roles::{Actor, Role};
use beton_core::truck::{TruckRecord, TruckStatus};
use beton_core::types::Timestamp;
use beton_core::workflow::WorkflowState;
use beton_dispatch::{DispatchBoard, InMemoryBackend};
use beton_events::bus::ChangeBus;

/// Client in good standing.
pub const GREEN_CLIENT: &str = "C-GREEN";
/// Client over its credit limit (60 000 against 50 000).
pub const RED_CLIENT: &str = "C-RED";
/// A second client over its limit (900 000 against 10 000).
pub const OTHER_RED_CLIENT: &str = "C-RED2";
/// Client within its limit but blocked by accounting.
pub const BLOCKED_CLIENT: &str = "C-BLOCKED";

/// Install a test subscriber once so `RUST_LOG` works in failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The board's working day.
pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// A UTC instant on the working day. The test policy runs the plant on UTC.
pub fn at(h: u32, m: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

pub fn dispatcher() -> Actor {
    Actor::new("u-disp", "Nadia", Role::Dispatcher)
}

pub fn ceo() -> Actor {
    Actor::new("u-ceo", "Omar", Role::Ceo)
}

pub fn viewer() -> Actor {
    Actor::new("u-view", "Salma", Role::Viewer)
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

pub fn pending(id: &str, client_id: &str) -> DeliveryRecord {
    DeliveryRecord::new(id, client_id, "B25", Decimal::from(8), day())
}

/// A planned record, optionally timed and with a truck.
pub fn planned(
    id: &str,
    client_id: &str,
    time: Option<NaiveTime>,
    truck: Option<&str>,
) -> DeliveryRecord {
    let mut record = pending(id, client_id);
    record.state = WorkflowState::Planned;
    record.scheduled_time = time;
    record.truck_id = truck.map(str::to_string);
    record
}

pub fn truck(id: &str, status: TruckStatus) -> TruckRecord {
    TruckRecord {
        id: id.to_string(),
        driver_name: Some("Driss".into()),
        phone: None,
        capacity_m3: Decimal::from(10),
        status,
    }
}

pub fn client(id: &str, balance: i64, limit: i64) -> ClientCreditSnapshot {
    ClientCreditSnapshot {
        client_id: id.to_string(),
        client_name: format!("Client {id}"),
        balance: Decimal::from(balance),
        credit_limit: Decimal::from(limit),
        hard_blocked: false,
        has_overdue_invoice: false,
    }
}

pub fn purchase_order(id: &str, delivered: i64, count: u32) -> PurchaseOrder {
    PurchaseOrder {
        id: id.to_string(),
        client_id: GREEN_CLIENT.to_string(),
        ordered_volume_m3: Decimal::from(100),
        delivered_volume_m3: Decimal::from(delivered),
        delivery_count: count,
        status: PurchaseOrderStatus::InProduction,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub bus: Arc<ChangeBus>,
    pub backend: Arc<InMemoryBackend>,
    pub board: Arc<DispatchBoard>,
}

impl Harness {
    /// A board for [`day`] with the clock at `now`, seeded with two trucks
    /// (`T-1` available, `T-2` in maintenance) and the green, red and
    /// blocked clients. Nothing is loaded yet.
    pub async fn new(now: Timestamp) -> Self {
        init_tracing();
        let clock = Arc::new(FixedClock::new(now));
        let bus = Arc::new(ChangeBus::default());
        let backend = Arc::new(InMemoryBackend::new(clock.clone()).with_bus(bus.clone()));

        backend.insert_truck(truck("T-1", TruckStatus::Available)).await;
        backend.insert_truck(truck("T-2", TruckStatus::Maintenance)).await;
        backend.insert_client(client(GREEN_CLIENT, 10_000, 50_000)).await;
        backend.insert_client(client(RED_CLIENT, 60_000, 50_000)).await;
        backend
            .insert_client(client(OTHER_RED_CLIENT, 900_000, 10_000))
            .await;
        let mut blocked = client(BLOCKED_CLIENT, 1_000, 50_000);
        blocked.hard_blocked = true;
        backend.insert_client(blocked).await;

        let board = Arc::new(DispatchBoard::new(
            backend.stores(),
            clock.clone(),
            DispatchPolicy::default(),
            day(),
        ));

        Self {
            clock,
            bus,
            backend,
            board,
        }
    }

    /// Seed records and load the board.
    pub async fn with_records(now: Timestamp, records: Vec<DeliveryRecord>) -> Self {
        let harness = Self::new(now).await;
        for record in records {
            harness.backend.insert_delivery(record).await;
        }
        harness.board.load_day(day()).await.unwrap();
        harness
    }

    pub async fn stored(&self, id: &str) -> DeliveryRecord {
        self.backend.delivery(id).await.unwrap()
    }

    pub async fn shown(&self, id: &str) -> Option<DeliveryRecord> {
        self.board
            .snapshot()
            .await
            .and_then(|s| s.delivery(id).cloned())
    }
}
