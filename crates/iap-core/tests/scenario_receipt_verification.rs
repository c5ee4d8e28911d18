//! Receipt verification pass semantics.
//!
//! GREEN when:
//! - "Receipt not found" is authoritative: every registered entity becomes
//!   `Empty` and the re-verify deadline is cancelled.
//! - Any other validation failure preserves last-known statuses (stale
//!   receipt is not the same as never-purchased) and cancels the deadline.
//! - The pass is idempotent for an unchanged receipt.
//! - Subscription expirations are corrected with the production grace for
//!   durations over 24h and the sandbox grace otherwise.

use std::rc::Rc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use iap_core::{
    ConfigVariant, NoopWakeup, PurchaseConfig, PurchaseStatus, Store,
};
use iap_paper::{PaperFetcher, PaperQueue, PaperVerifier};
use iap_receipt::{PieceRecord, ReceiptError, ReceiptFacts, SubscriptionRecord};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn setup() -> (Store, Rc<PaperVerifier>) {
    let verifier = Rc::new(PaperVerifier::not_found());
    let store = Store::new(
        Rc::new(PaperQueue::new()),
        Rc::new(PaperFetcher::new()),
        verifier.clone(),
        Rc::new(NoopWakeup),
    );
    (store, verifier)
}

#[test]
fn missing_receipt_empties_every_entity_and_cancels_deadline() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.monthly", PurchaseConfig::default());
    let coins = store.purchase("coins.100", PurchaseConfig::default());

    // First give them receipt-backed statuses and an armed deadline.
    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", at(0), at(1_000), None));
    facts.push_piece(PieceRecord::new("coins.100", at(50), 1));
    verifier.set_facts(facts);
    store.tick(at(100));
    assert!(matches!(sub.status(), PurchaseStatus::Subscription(_)));
    assert!(matches!(coins.status(), PurchaseStatus::Piece(_)));
    assert!(store.reverify_deadline().is_some());

    // The receipt disappears (e.g. store sign-out).
    verifier.set_error(ReceiptError::NotFound);
    store.schedule_verify();
    store.tick(at(200));

    assert_eq!(sub.status(), PurchaseStatus::Empty);
    assert_eq!(coins.status(), PurchaseStatus::Empty);
    assert_eq!(store.reverify_deadline(), None);
}

#[test]
fn validation_failure_preserves_last_known_statuses() {
    let (store, verifier) = setup();
    let coins = store.purchase("coins.100", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_piece(PieceRecord::new("coins.100", at(50), 2));
    verifier.set_facts(facts);
    store.tick(at(100));
    let owned = coins.status();
    assert!(matches!(owned, PurchaseStatus::Piece(_)));

    verifier.set_error(ReceiptError::SignatureInvalid);
    store.schedule_verify();
    store.tick(at(200));
    assert_eq!(coins.status(), owned, "stale receipt must not demote ownership");

    verifier.set_error(ReceiptError::HashMismatch);
    store.schedule_verify();
    store.tick(at(300));
    assert_eq!(coins.status(), owned);
    assert_eq!(store.reverify_deadline(), None);
}

#[test]
fn verification_is_idempotent_for_an_unchanged_receipt() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.monthly", PurchaseConfig::default());
    let coins = store.purchase("coins.100", PurchaseConfig::default());
    let never = store.purchase("gems.10", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", at(0), at(600), None));
    facts.push_piece(PieceRecord::new("coins.100", at(5), 1));
    facts.push_piece(PieceRecord::new("coins.100", at(9), 4));
    verifier.set_facts(facts);

    store.tick(at(100));
    let first = (sub.status(), coins.status(), never.status());

    store.schedule_verify();
    store.tick(at(100));
    let second = (sub.status(), coins.status(), never.status());

    assert_eq!(first, second);
    assert_eq!(never.status(), PurchaseStatus::Empty);
}

#[test]
fn long_subscription_gets_production_grace() {
    let (store, verifier) = setup();
    let config = PurchaseConfig {
        production: ConfigVariant::new(Duration::hours(1)),
        sandbox: ConfigVariant::new(Duration::seconds(60)),
    };
    let sub = store.purchase("sub.monthly", config);

    let t0 = at(0);
    let raw_expiration = t0 + Duration::days(30);
    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", t0, raw_expiration, None));
    verifier.set_facts(facts);
    store.tick(at(100));

    match sub.status() {
        PurchaseStatus::Subscription(data) => {
            assert_eq!(data.date, t0);
            assert_eq!(data.expiration_date, raw_expiration + Duration::hours(1));
            assert_eq!(data.cancellation_date, None);
        }
        other => panic!("expected subscription status, got {other:?}"),
    }
}

#[test]
fn short_sandbox_subscription_gets_sandbox_grace() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.monthly", PurchaseConfig::default());

    let t0 = at(0);
    let raw_expiration = t0 + Duration::minutes(5);
    let cancelled = Some(t0 + Duration::minutes(2));
    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new(
        "sub.monthly",
        t0,
        raw_expiration,
        cancelled,
    ));
    verifier.set_facts(facts);
    store.tick(at(60));

    match sub.status() {
        PurchaseStatus::Subscription(data) => {
            assert_eq!(data.expiration_date, raw_expiration + Duration::seconds(60));
            assert_eq!(data.cancellation_date, cancelled);
        }
        other => panic!("expected subscription status, got {other:?}"),
    }
}

#[test]
fn exactly_24h_duration_counts_as_sandbox() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.daily", PurchaseConfig::default());

    let t0 = at(0);
    let raw_expiration = t0 + Duration::hours(24);
    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.daily", t0, raw_expiration, None));
    verifier.set_facts(facts);
    store.tick(at(10));

    match sub.status() {
        PurchaseStatus::Subscription(data) => {
            // Strictly-greater split: a 24h duration is still sandbox-sized.
            assert_eq!(data.expiration_date, raw_expiration + Duration::seconds(60));
        }
        other => panic!("expected subscription status, got {other:?}"),
    }
}

#[test]
fn piece_records_map_to_ownership_pieces_in_order() {
    let (store, verifier) = setup();
    let coins = store.purchase("coins.100", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_piece(PieceRecord::new("coins.100", at(10), 1));
    facts.push_piece(PieceRecord::new("coins.100", at(20), 3));
    verifier.set_facts(facts);
    store.tick(at(100));

    match coins.status() {
        PurchaseStatus::Piece(pieces) => {
            assert_eq!(pieces.len(), 2);
            assert_eq!(pieces[0].date, at(10));
            assert_eq!(pieces[0].quantity, 1);
            assert_eq!(pieces[1].date, at(20));
            assert_eq!(pieces[1].quantity, 3);
        }
        other => panic!("expected piece status, got {other:?}"),
    }
}

#[test]
fn subscription_dropping_out_of_receipt_is_authoritative() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.monthly", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", at(0), at(500), None));
    verifier.set_facts(facts);
    store.tick(at(100));
    assert!(matches!(sub.status(), PurchaseStatus::Subscription(_)));

    // Next pass: the entry is gone from the receipt entirely.
    verifier.set_facts(ReceiptFacts::empty());
    store.schedule_verify();
    store.tick(at(200));
    assert_eq!(sub.status(), PurchaseStatus::Empty);
}
