//! Deterministic in-memory "paper" implementations of the platform
//! boundaries.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - No randomness. No timestamps of their own — every date comes from the
//!   caller.
//! - Everything is recorded: submissions, finish counts per transaction,
//!   restore requests, issued product queries, verify calls. Scenario tests
//!   assert against these records.
//! - Nothing is answered automatically. A product query or restore request
//!   sits recorded until the test feeds the matching [`PlatformEvent`] back
//!   into the engine, which keeps event ordering fully under test control.
//!
//! [`PlatformEvent`]: iap_core::PlatformEvent

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use iap_core::{
    PaymentQueue, PaymentRequest, ProductFetcher, QueryId, TransactionId,
};
use iap_receipt::{ReceiptError, ReceiptFacts, ReceiptVerifier};

// ---------------------------------------------------------------------------
// PaperQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    submissions: Vec<PaymentRequest>,
    finishes: BTreeMap<String, u32>,
    restore_requests: Vec<Option<String>>,
    price_consent_shown: u32,
    code_redemption_presented: u32,
}

/// Recording payment queue.
pub struct PaperQueue {
    can_make_payments: Cell<bool>,
    state: RefCell<QueueState>,
}

impl Default for PaperQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperQueue {
    pub fn new() -> Self {
        Self {
            can_make_payments: Cell::new(true),
            state: RefCell::new(QueueState::default()),
        }
    }

    pub fn set_can_make_payments(&self, allowed: bool) {
        self.can_make_payments.set(allowed);
    }

    /// Every payment request submitted so far, in order.
    pub fn submissions(&self) -> Vec<PaymentRequest> {
        self.state.borrow().submissions.clone()
    }

    /// How many times `transaction` has been finished.
    pub fn finish_count(&self, transaction: &TransactionId) -> u32 {
        self.state
            .borrow()
            .finishes
            .get(&transaction.0)
            .copied()
            .unwrap_or(0)
    }

    /// Total finish calls across all transactions.
    pub fn total_finishes(&self) -> u32 {
        self.state.borrow().finishes.values().sum()
    }

    /// Application usernames passed to restore requests, in order.
    pub fn restore_requests(&self) -> Vec<Option<String>> {
        self.state.borrow().restore_requests.clone()
    }

    pub fn price_consent_shown(&self) -> u32 {
        self.state.borrow().price_consent_shown
    }

    pub fn code_redemption_presented(&self) -> u32 {
        self.state.borrow().code_redemption_presented
    }
}

impl PaymentQueue for PaperQueue {
    fn can_make_payments(&self) -> bool {
        self.can_make_payments.get()
    }

    fn submit(&self, request: PaymentRequest) {
        self.state.borrow_mut().submissions.push(request);
    }

    fn restore_completed_transactions(&self, application_username: Option<&str>) {
        self.state
            .borrow_mut()
            .restore_requests
            .push(application_username.map(str::to_owned));
    }

    fn finish(&self, transaction: &TransactionId) {
        *self
            .state
            .borrow_mut()
            .finishes
            .entry(transaction.0.clone())
            .or_insert(0) += 1;
    }

    fn show_price_consent(&self) {
        self.state.borrow_mut().price_consent_shown += 1;
    }

    fn present_code_redemption(&self) {
        self.state.borrow_mut().code_redemption_presented += 1;
    }
}

// ---------------------------------------------------------------------------
// PaperFetcher
// ---------------------------------------------------------------------------

/// One recorded product-metadata batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedQuery {
    pub query: QueryId,
    pub product_ids: Vec<String>,
}

/// Recording product-metadata fetcher. Responses are fed back by the test
/// via [`PlatformEvent::ProductsResponse`].
///
/// [`PlatformEvent::ProductsResponse`]: iap_core::PlatformEvent::ProductsResponse
#[derive(Default)]
pub struct PaperFetcher {
    queries: RefCell<Vec<RecordedQuery>>,
}

impl PaperFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.borrow().clone()
    }

    pub fn last_query(&self) -> Option<RecordedQuery> {
        self.queries.borrow().last().cloned()
    }
}

impl ProductFetcher for PaperFetcher {
    fn fetch(&self, query: QueryId, product_ids: Vec<String>) {
        self.queries.borrow_mut().push(RecordedQuery { query, product_ids });
    }
}

// ---------------------------------------------------------------------------
// PaperVerifier
// ---------------------------------------------------------------------------

/// Programmable receipt verifier. Starts in the "no receipt" state.
pub struct PaperVerifier {
    outcome: RefCell<Result<ReceiptFacts, ReceiptError>>,
    calls: Cell<u32>,
}

impl PaperVerifier {
    /// A verifier that reports [`ReceiptError::NotFound`] until programmed.
    pub fn not_found() -> Self {
        Self {
            outcome: RefCell::new(Err(ReceiptError::NotFound)),
            calls: Cell::new(0),
        }
    }

    pub fn with_facts(facts: ReceiptFacts) -> Self {
        let verifier = Self::not_found();
        verifier.set_facts(facts);
        verifier
    }

    pub fn set_facts(&self, facts: ReceiptFacts) {
        *self.outcome.borrow_mut() = Ok(facts);
    }

    pub fn set_error(&self, error: ReceiptError) {
        *self.outcome.borrow_mut() = Err(error);
    }

    /// How many verification passes have run.
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl ReceiptVerifier for PaperVerifier {
    fn verify(&self) -> Result<ReceiptFacts, ReceiptError> {
        self.calls.set(self.calls.get() + 1);
        self.outcome.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_counts_are_per_transaction() {
        let queue = PaperQueue::new();
        let t1 = TransactionId::new("t1");
        let t2 = TransactionId::new("t2");

        queue.finish(&t1);
        queue.finish(&t1);
        queue.finish(&t2);

        assert_eq!(queue.finish_count(&t1), 2);
        assert_eq!(queue.finish_count(&t2), 1);
        assert_eq!(queue.total_finishes(), 3);
    }

    #[test]
    fn verifier_counts_calls_and_replays_programmed_outcome() {
        let verifier = PaperVerifier::not_found();
        assert_eq!(verifier.verify(), Err(ReceiptError::NotFound));

        verifier.set_facts(ReceiptFacts::empty());
        assert_eq!(verifier.verify(), Ok(ReceiptFacts::empty()));
        assert_eq!(verifier.calls(), 2);
    }
}
