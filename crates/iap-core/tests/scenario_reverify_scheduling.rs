//! Re-verification deadline scheduling.
//!
//! GREEN when:
//! - The single-slot deadline always targets the earliest corrected
//!   expiration among currently-active subscriptions.
//! - Expired or not-yet-started subscriptions register no candidate.
//! - A non-positive delay cancels instead of arming.
//! - Firing the deadline clears it and coalesces into one new pass.

use std::rc::Rc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use iap_core::{ConfigVariant, NoopWakeup, PurchaseConfig, PurchaseStatus, Store};
use iap_paper::{PaperFetcher, PaperQueue, PaperVerifier};
use iap_receipt::{ReceiptFacts, SubscriptionRecord};

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
fn deadline_targets_earliest_corrected_expiration() {
    let (store, verifier) = setup();
    let _early = store.purchase("sub.early", PurchaseConfig::default());
    let _late = store.purchase("sub.late", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.early", at(0), at(1_000), None));
    facts.push_subscription(SubscriptionRecord::new("sub.late", at(0), at(2_000), None));
    verifier.set_facts(facts);

    store.tick(at(100));
    // Sandbox grace (60s) applies to both; earliest corrected = 1000 + 60.
    assert_eq!(store.reverify_deadline(), Some(at(1_060)));
}

#[test]
fn expired_subscription_registers_no_candidate() {
    let (store, verifier) = setup();
    let sub = store.purchase("sub.old", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.old", at(0), at(500), None));
    verifier.set_facts(facts);

    // Now is past the raw expiration: status is still re-derived, but no
    // re-verify is armed for a dead subscription.
    store.tick(at(600));
    assert!(matches!(sub.status(), PurchaseStatus::Subscription(_)));
    assert_eq!(store.reverify_deadline(), None);
}

#[test]
fn not_yet_started_subscription_registers_no_candidate() {
    let (store, verifier) = setup();
    let _sub = store.purchase("sub.future", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.future", at(500), at(900), None));
    verifier.set_facts(facts);

    store.tick(at(100));
    assert_eq!(store.reverify_deadline(), None);
}

#[test]
fn non_positive_delay_cancels_instead_of_arming() {
    let (store, verifier) = setup();
    let config = PurchaseConfig {
        production: ConfigVariant::new(Duration::zero()),
        sandbox: ConfigVariant::new(Duration::zero()),
    };
    let _sub = store.purchase("sub.edge", config);

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.edge", at(0), at(500), None));
    verifier.set_facts(facts);

    // Zero grace and now == raw expiration: corrected == now, delay == 0.
    store.tick(at(500));
    assert_eq!(store.reverify_deadline(), None);
}

#[test]
fn rearming_replaces_the_previous_deadline() {
    let (store, verifier) = setup();
    let _sub = store.purchase("sub.monthly", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", at(0), at(1_000), None));
    verifier.set_facts(facts);
    store.tick(at(100));
    assert_eq!(store.reverify_deadline(), Some(at(1_060)));

    // A renewal appears: same product, later expiration. The slot holds
    // exactly one deadline.
    let mut renewed = ReceiptFacts::empty();
    renewed.push_subscription(SubscriptionRecord::new("sub.monthly", at(900), at(1_900), None));
    verifier.set_facts(renewed);
    store.schedule_verify();
    store.tick(at(950));
    assert_eq!(store.reverify_deadline(), Some(at(1_960)));
}

#[test]
fn firing_clears_the_deadline_and_runs_one_coalesced_pass() {
    let (store, verifier) = setup();
    let _sub = store.purchase("sub.monthly", PurchaseConfig::default());

    let mut facts = ReceiptFacts::empty();
    facts.push_subscription(SubscriptionRecord::new("sub.monthly", at(0), at(1_000), None));
    verifier.set_facts(facts);
    store.tick(at(100));
    let calls_after_first = verifier.calls();
    assert_eq!(store.reverify_deadline(), Some(at(1_060)));

    // Deadline elapses; a second trigger arrives before the tick. Both
    // coalesce into a single pass.
    store.reverify_due();
    store.entered_foreground();
    assert_eq!(store.reverify_deadline(), None);

    store.tick(at(1_060));
    assert_eq!(verifier.calls(), calls_after_first + 1);

    // At 1060 the raw expiration (1000) is past, so the pass leaves no
    // candidate and the slot stays empty.
    assert_eq!(store.reverify_deadline(), None);
}
