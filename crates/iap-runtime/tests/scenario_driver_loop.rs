//! Driver loop wiring.
//!
//! GREEN when:
//! - Engine wakes (registration, entity load) get drained without any
//!   platform event arriving.
//! - Platform events are redispatched onto the engine context in order.
//! - The re-verify deadline is slept on and fires exactly one pass, and a
//!   cancelled deadline stops the sleep.
//! - Closing the event channel stops the driver.

use std::rc::Rc;

use chrono::{Duration, Utc};
use iap_core::{
    PlatformEvent, ProductDescriptor, PurchaseConfig, PurchaseStatus, TransactionEvent,
    TransactionId, TransactionState,
};
use iap_paper::{PaperFetcher, PaperQueue, PaperVerifier};
use iap_receipt::{ReceiptError, ReceiptFacts, SubscriptionRecord};
use iap_runtime::wire;
use tokio::task::LocalSet;

async fn settle() {
    // Paused-clock runtimes auto-advance when every task is idle; a tiny
    // sleep is the deterministic "let the driver catch up" point.
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn registration_verify_drains_without_any_event() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let queue = Rc::new(PaperQueue::new());
            let fetcher = Rc::new(PaperFetcher::new());
            let verifier = Rc::new(PaperVerifier::not_found());
            let (store, driver, events) = wire(queue, fetcher, verifier.clone());
            let handle = driver.spawn_local();

            let purchase = store.purchase("coins.100", PurchaseConfig::default());
            settle().await;

            assert_eq!(verifier.calls(), 1);
            assert_eq!(purchase.status(), PurchaseStatus::Empty);

            drop(events);
            handle.await.expect("driver task");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn platform_events_flow_through_the_channel() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let queue = Rc::new(PaperQueue::new());
            let fetcher = Rc::new(PaperFetcher::new());
            let verifier = Rc::new(PaperVerifier::not_found());
            let (store, driver, events) = wire(queue.clone(), fetcher.clone(), verifier);
            let handle = driver.spawn_local();

            let purchase = store.purchase("coins.100", PurchaseConfig::default());
            let entry = purchase.load();
            settle().await;

            let query = fetcher.last_query().expect("driver drained the batch");
            events
                .send(PlatformEvent::ProductsResponse {
                    query: query.query,
                    result: Ok(vec![ProductDescriptor::new("coins.100", "Coins", 199, "USD")]),
                })
                .unwrap();
            settle().await;
            assert!(entry.descriptor().is_some());

            events
                .send(PlatformEvent::Transaction(TransactionEvent::new(
                    "tx-1",
                    "coins.100",
                    TransactionState::Purchased,
                )))
                .unwrap();
            settle().await;
            assert_eq!(queue.finish_count(&TransactionId::new("tx-1")), 1);

            drop(events);
            handle.await.expect("driver task");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn reverify_deadline_fires_one_pass_and_cancellation_stops_the_sleep() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let queue = Rc::new(PaperQueue::new());
            let fetcher = Rc::new(PaperFetcher::new());
            let verifier = Rc::new(PaperVerifier::not_found());
            let (store, driver, events) = wire(queue, fetcher, verifier.clone());
            let handle = driver.spawn_local();

            // An active subscription with ~100s left arms the deadline.
            let now = Utc::now();
            let mut facts = ReceiptFacts::empty();
            facts.push_subscription(SubscriptionRecord::new(
                "sub.monthly",
                now - Duration::seconds(10),
                now + Duration::seconds(100),
                None,
            ));
            verifier.set_facts(facts);

            let purchase = store.purchase("sub.monthly", PurchaseConfig::default());
            settle().await;
            assert_eq!(verifier.calls(), 1);
            assert!(matches!(purchase.status(), PurchaseStatus::Subscription(_)));
            assert!(store.reverify_deadline().is_some());

            // Before the deadline elapses the receipt disappears, so the
            // fired pass empties the entity and cancels the slot for good.
            verifier.set_error(ReceiptError::NotFound);
            tokio::time::sleep(std::time::Duration::from_secs(200)).await;

            assert_eq!(verifier.calls(), 2, "deadline fires exactly one pass");
            assert_eq!(purchase.status(), PurchaseStatus::Empty);
            assert_eq!(store.reverify_deadline(), None);

            // With the slot empty the driver just waits on events again.
            tokio::time::sleep(std::time::Duration::from_secs(500)).await;
            assert_eq!(verifier.calls(), 2);

            drop(events);
            handle.await.expect("driver task");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn foreground_signal_triggers_a_pass() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let queue = Rc::new(PaperQueue::new());
            let fetcher = Rc::new(PaperFetcher::new());
            let verifier = Rc::new(PaperVerifier::not_found());
            let (store, driver, events) = wire(queue, fetcher, verifier.clone());
            let handle = driver.spawn_local();

            let _purchase = store.purchase("coins.100", PurchaseConfig::default());
            settle().await;
            assert_eq!(verifier.calls(), 1);

            events.send(PlatformEvent::EnteredForeground).unwrap();
            events.send(PlatformEvent::TransactionsRemoved).unwrap();
            settle().await;

            // Both triggers arrived before the next tick: one coalesced pass.
            assert_eq!(verifier.calls(), 2);

            drop(events);
            handle.await.expect("driver task");
        })
        .await;
}
