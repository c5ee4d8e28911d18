//! Reconciliation engine.
//!
//! # Design
//!
//! The [`Store`] owns the registry of live purchase entities and restore
//! flows, drives product-metadata batches, dispatches payments, ingests
//! transaction-queue events, and re-derives every entity's status from the
//! verified local receipt.
//!
//! Two invariants shape everything here:
//!
//! 1. **Coalesced singletons.** The receipt-verification pass and the
//!    products batch are single-slot deferred tasks: any number of trigger
//!    requests before the next [`tick`](Store::tick) collapse into one run.
//!    The re-verify timer is a single stored deadline; arming a new one
//!    replaces the old.
//! 2. **No notification under borrow.** Entity registries are snapshotted
//!    before statuses are set, so observers may re-enter any engine API
//!    from inside a callback.
//!
//! The engine is deterministic: "now" is an explicit argument everywhere it
//! matters, and all platform IO goes through the boundary traits.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Duration, Utc};
use iap_receipt::ReceiptVerifier;

use crate::boundary::{
    PaymentQueue, PaymentRequest, PlatformEvent, ProductDescriptor, ProductFetcher, QueryId,
    QueueError, QueueErrorCode, TransactionEvent, TransactionState, Wakeup,
};
use crate::observer::same_rc;
use crate::payment::{PaymentEntry, PaymentStatus};
use crate::product::{ProductEntry, ProductStatus};
use crate::purchase::{Piece, Purchase, PurchaseConfig, PurchaseInner, PurchaseStatus, Subscription};

/// Receiver side of a restore flow, registered with the engine for the
/// duration of one restore-completed-transactions round trip.
pub trait RestoreSink {
    /// A transaction restored this purchase; accumulate it.
    fn restored(&self, purchase: &Purchase);

    /// The restore round finished. `None` on success; on failure the sink
    /// still owns whatever it accumulated.
    fn finished(&self, error: Option<QueueError>);
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EngineState {
    /// Live purchase entities, weakly held; dead handles are pruned on each
    /// iteration.
    purchases: Vec<Weak<PurchaseInner>>,
    /// Live restore sinks, weakly held.
    restores: Vec<Weak<dyn RestoreSink>>,
    /// Single-slot coalesced verify pass.
    verify_scheduled: bool,
    /// Single-slot coalesced products batch.
    products_scheduled: bool,
    /// Single-slot re-verify deadline, sized to the earliest unexpired
    /// subscription.
    reverify_at: Option<DateTime<Utc>>,
    /// In-flight product-metadata batches, keyed by query id.
    queries: BTreeMap<u64, Vec<ProductEntry>>,
    next_query_id: u64,
}

struct StoreInner {
    queue: Rc<dyn PaymentQueue>,
    fetcher: Rc<dyn ProductFetcher>,
    verifier: Rc<dyn ReceiptVerifier>,
    wakeup: Rc<dyn Wakeup>,
    state: RefCell<EngineState>,
}

/// Shared handle to the reconciliation engine.
///
/// Explicitly constructed and dependency-injected; there is no hidden
/// process-wide instance. Entities created through [`Store::purchase`] keep
/// the engine alive; dropping the last handle drops all pending coalesced
/// work and the re-verify deadline with it.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    pub fn new(
        queue: Rc<dyn PaymentQueue>,
        fetcher: Rc<dyn ProductFetcher>,
        verifier: Rc<dyn ReceiptVerifier>,
        wakeup: Rc<dyn Wakeup>,
    ) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                queue,
                fetcher,
                verifier,
                wakeup,
                state: RefCell::new(EngineState::default()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Create a purchase entity and register it. Registration immediately
    /// requests a (coalesced) receipt-verification pass so the new entity
    /// picks up a receipt-backed status.
    pub fn purchase(&self, id: impl Into<String>, config: PurchaseConfig) -> Purchase {
        let purchase = Purchase::create(self, id.into(), config);
        {
            let mut state = self.inner.state.borrow_mut();
            state.purchases.push(Rc::downgrade(&purchase.inner));
        }
        self.schedule_verify();
        purchase
    }

    /// Remove a purchase entity by identity. Tolerates entities that were
    /// never registered or are already dead.
    pub fn unregister(&self, purchase: &Purchase) {
        let mut state = self.inner.state.borrow_mut();
        state.purchases.retain(|weak| match weak.upgrade() {
            Some(inner) => !Rc::ptr_eq(&inner, &purchase.inner),
            None => false,
        });
    }

    /// Register a restore sink for the duration of a restore round.
    pub fn register_restore(&self, sink: &Rc<dyn RestoreSink>) {
        let mut state = self.inner.state.borrow_mut();
        state.restores.push(Rc::downgrade(sink));
    }

    /// Remove a restore sink by identity, tolerating dead entries.
    pub fn unregister_restore(&self, sink: &Rc<dyn RestoreSink>) {
        let mut state = self.inner.state.borrow_mut();
        state.restores.retain(|weak| match weak.upgrade() {
            Some(existing) => !same_rc(&existing, sink),
            None => false,
        });
    }

    // -----------------------------------------------------------------------
    // Queue passthroughs
    // -----------------------------------------------------------------------

    pub fn can_make_payments(&self) -> bool {
        self.inner.queue.can_make_payments()
    }

    /// Ask the platform queue to replay completed transactions. Results
    /// arrive as `Restored` transaction events followed by a
    /// restore-finished or restore-failed event.
    pub fn restore(&self, application_username: Option<&str>) {
        self.inner.queue.restore_completed_transactions(application_username);
    }

    pub fn show_price_consent(&self) {
        self.inner.queue.show_price_consent();
    }

    pub fn present_code_redemption(&self) {
        self.inner.queue.present_code_redemption();
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Request a receipt-verification pass on the next tick. Any number of
    /// requests before that tick coalesce into one pass.
    pub fn schedule_verify(&self) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            !std::mem::replace(&mut state.verify_scheduled, true)
        };
        if changed {
            self.inner.wakeup.wakeup();
        }
    }

    /// Request a products batch on the next tick (coalesced).
    pub(crate) fn schedule_products_load(&self) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            !std::mem::replace(&mut state.products_scheduled, true)
        };
        if changed {
            self.inner.wakeup.wakeup();
        }
    }

    /// Drain the coalesced slots that were pending when the tick started.
    /// Returns whether anything ran. Work scheduled by observers *during*
    /// the tick stays pending for the next one.
    pub fn tick(&self, now: DateTime<Utc>) -> bool {
        let (products, verify) = {
            let mut state = self.inner.state.borrow_mut();
            (
                std::mem::take(&mut state.products_scheduled),
                std::mem::take(&mut state.verify_scheduled),
            )
        };
        if products {
            self.run_products_load();
        }
        if verify {
            self.run_verify(now);
        }
        products || verify
    }

    /// True while a verify pass or products batch is pending.
    pub fn has_pending_work(&self) -> bool {
        let state = self.inner.state.borrow();
        state.verify_scheduled || state.products_scheduled
    }

    /// The armed re-verification deadline, if any. The driver sleeps until
    /// this instant and then calls [`reverify_due`](Self::reverify_due).
    pub fn reverify_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().reverify_at
    }

    /// The re-verify timer fired: clear it and request a coalesced pass.
    pub fn reverify_due(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.reverify_at = None;
        }
        self.schedule_verify();
    }

    /// App returned to foreground: the local receipt may have changed while
    /// the process was inactive.
    pub fn entered_foreground(&self) {
        self.schedule_verify();
    }

    // -----------------------------------------------------------------------
    // Platform event intake
    // -----------------------------------------------------------------------

    /// Route one platform event to its handler. The caller supplies `now`
    /// because a restore-finished event runs a verification pass inline.
    pub fn dispatch(&self, event: PlatformEvent, now: DateTime<Utc>) {
        match event {
            PlatformEvent::Transaction(transaction) => self.handle_transaction(&transaction),
            PlatformEvent::ProductsResponse { query, result } => {
                self.handle_products_response(query, result)
            }
            PlatformEvent::TransactionsRemoved => self.handle_transactions_removed(),
            // The revoked identifiers are informational: the next pass
            // re-derives every status from the receipt anyway.
            PlatformEvent::EntitlementsRevoked { .. } => self.schedule_verify(),
            PlatformEvent::RestoreFinished => self.handle_restore_finished(now),
            PlatformEvent::RestoreFailed(error) => self.handle_restore_failed(error),
            PlatformEvent::EnteredForeground => self.entered_foreground(),
        }
    }

    /// Ingest one delivered transaction event.
    ///
    /// Events may arrive in any order and duplicated; every arm is
    /// idempotent per transaction. `finish` is invoked exactly once per
    /// *delivered* `Purchased` / `Restored` / `Failed` event — also when no
    /// registered purchase matches, so the queue is drained either way.
    pub fn handle_transaction(&self, event: &TransactionEvent) {
        let purchase = self.find_purchase(&event.product_id);
        match &event.state {
            TransactionState::Purchasing => {
                if let Some(purchase) = purchase {
                    purchase
                        .payment_for_transaction(event)
                        .set_status(PaymentStatus::Purchasing);
                }
            }
            TransactionState::Purchased => {
                if let Some(purchase) = purchase {
                    purchase
                        .payment_for_transaction(event)
                        .set_status(PaymentStatus::Purchased);
                }
                self.inner.queue.finish(&event.transaction_id);
            }
            TransactionState::Restored => {
                if let Some(purchase) = purchase {
                    for sink in self.live_restores() {
                        sink.restored(&purchase);
                    }
                }
                self.inner.queue.finish(&event.transaction_id);
            }
            TransactionState::Deferred => {
                if let Some(purchase) = purchase {
                    purchase
                        .payment_for_transaction(event)
                        .set_status(PaymentStatus::Deferred);
                }
            }
            TransactionState::Failed(error) => {
                if let Some(purchase) = purchase {
                    let status = if error.code == QueueErrorCode::PaymentCancelled {
                        PaymentStatus::Cancelled
                    } else {
                        PaymentStatus::Failure(error.clone())
                    };
                    purchase.payment_for_transaction(event).set_status(status);
                }
                self.inner.queue.finish(&event.transaction_id);
            }
        }
    }

    /// Resolve one in-flight products batch. Matched entries become
    /// `Success`, unmatched `Missing`; a request-level failure marks the
    /// whole batch `Failure`. Unknown query ids are tolerated (stale
    /// response after engine teardown/reset).
    pub fn handle_products_response(
        &self,
        query: QueryId,
        result: Result<Vec<ProductDescriptor>, QueueError>,
    ) {
        let entries = {
            let mut state = self.inner.state.borrow_mut();
            state.queries.remove(&query.0)
        };
        let Some(entries) = entries else { return };
        match result {
            Ok(descriptors) => {
                for entry in entries {
                    let Some(product_id) = entry.product_id() else {
                        continue;
                    };
                    match descriptors.iter().find(|d| d.id == product_id) {
                        Some(descriptor) => {
                            entry.set_status(ProductStatus::Success(descriptor.clone()))
                        }
                        None => entry.set_status(ProductStatus::Missing),
                    }
                }
            }
            Err(error) => {
                for entry in entries {
                    entry.set_status(ProductStatus::Failure(error.clone()));
                }
            }
        }
    }

    /// Transactions left the queue: the local receipt may now be stale.
    pub fn handle_transactions_removed(&self) {
        self.schedule_verify();
    }

    /// The restore round completed. Verification runs *inline* (superseding
    /// any pending coalesced pass) so restored purchases carry
    /// receipt-backed statuses before the sinks are finished.
    pub fn handle_restore_finished(&self, now: DateTime<Utc>) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.verify_scheduled = false;
        }
        self.run_verify(now);
        for sink in self.live_restores() {
            sink.finished(None);
        }
    }

    /// The restore round failed. Sinks receive the error together with
    /// whatever they accumulated; no status is touched.
    pub fn handle_restore_failed(&self, error: QueueError) {
        for sink in self.live_restores() {
            sink.finished(Some(error.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // Payment submission
    // -----------------------------------------------------------------------

    /// Build and enqueue the platform payment request for `payment`.
    ///
    /// # Panics
    /// Panics when `product` has no loaded descriptor — a caller precondition
    /// violation (see [`Purchase::buy`]).
    pub(crate) fn submit_payment(
        &self,
        purchase: &Purchase,
        product: &ProductEntry,
        payment: &PaymentEntry,
    ) {
        let Some(descriptor) = product.descriptor() else {
            panic!(
                "purchase '{}' has no loaded product descriptor (product status {:?})",
                purchase.id(),
                product.status()
            );
        };
        let options = payment.options();
        self.inner.queue.submit(PaymentRequest {
            product: descriptor,
            quantity: options.quantity,
            application_username: options.application_username.clone(),
            simulates_ask_to_buy_in_sandbox: options.simulates_ask_to_buy_in_sandbox,
        });
    }

    // -----------------------------------------------------------------------
    // Products batch
    // -----------------------------------------------------------------------

    fn run_products_load(&self) {
        let live = self.live_purchases();
        let mut batch: Vec<ProductEntry> = Vec::new();
        for purchase in &live {
            let entry = match purchase.product() {
                None => purchase.ensure_product_entry(),
                Some(entry) if entry.status().needs_load() => entry,
                Some(_) => continue,
            };
            batch.push(entry);
        }
        if batch.is_empty() {
            return;
        }

        // Entries flip to Loading before the request leaves the engine, so
        // a load() racing the batch reuses the in-flight entry.
        for entry in &batch {
            entry.set_status(ProductStatus::Loading);
        }

        let product_ids: Vec<String> = batch.iter().filter_map(|e| e.product_id()).collect();
        let query = {
            let mut state = self.inner.state.borrow_mut();
            let id = state.next_query_id;
            state.next_query_id += 1;
            state.queries.insert(id, batch);
            QueryId(id)
        };
        self.inner.fetcher.fetch(query, product_ids);
    }

    // -----------------------------------------------------------------------
    // Receipt verification
    // -----------------------------------------------------------------------

    fn run_verify(&self, now: DateTime<Utc>) {
        match self.inner.verifier.verify() {
            Ok(facts) => {
                let mut candidates: Vec<DateTime<Utc>> = Vec::new();
                for purchase in self.live_purchases() {
                    if let Some(record) = facts.last_subscription(purchase.id()) {
                        let raw_duration = record.expiration_date - record.purchase_date;
                        let config = purchase.config();
                        // Real subscriptions run for days; sandbox testing
                        // compresses them to minutes. The 24h split keeps a
                        // short sandbox grace from masking real renewals.
                        let grace = if raw_duration > Duration::hours(24) {
                            config.production.extra_expiration_interval
                        } else {
                            config.sandbox.extra_expiration_interval
                        };
                        let corrected = record.expiration_date + grace;
                        let candidate = (now >= record.purchase_date
                            && now <= record.expiration_date)
                            .then_some(corrected);
                        purchase.set_status(PurchaseStatus::Subscription(Subscription {
                            date: record.purchase_date,
                            expiration_date: corrected,
                            cancellation_date: record.cancellation_date,
                        }));
                        candidates.extend(candidate);
                    } else {
                        let pieces = facts.pieces(purchase.id());
                        if pieces.is_empty() {
                            purchase.set_status(PurchaseStatus::Empty);
                        } else {
                            purchase.set_status(PurchaseStatus::Piece(
                                pieces
                                    .iter()
                                    .map(|record| Piece {
                                        date: record.purchase_date,
                                        quantity: record.quantity,
                                    })
                                    .collect(),
                            ));
                        }
                    }
                }
                match candidates.into_iter().min() {
                    Some(earliest) => self.arm_reverify(now, earliest),
                    None => self.set_reverify(None),
                }
            }
            Err(error) if error.is_not_found() => {
                // No receipt is an authoritative "never purchased", not a
                // failure.
                for purchase in self.live_purchases() {
                    purchase.set_status(PurchaseStatus::Empty);
                }
                self.set_reverify(None);
            }
            Err(_) => {
                // Validation failure: keep last-known statuses; retry only
                // on the next trigger.
                self.set_reverify(None);
            }
        }
    }

    /// Arm the one-shot re-verify deadline at `expiration`, in whole seconds
    /// from `now`. Non-positive delays cancel instead.
    fn arm_reverify(&self, now: DateTime<Utc>, expiration: DateTime<Utc>) {
        let seconds = (expiration - now).num_seconds();
        if seconds > 0 {
            self.set_reverify(Some(now + Duration::seconds(seconds)));
        } else {
            self.set_reverify(None);
        }
    }

    fn set_reverify(&self, at: Option<DateTime<Utc>>) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            if state.reverify_at == at {
                false
            } else {
                state.reverify_at = at;
                true
            }
        };
        if changed {
            self.inner.wakeup.wakeup();
        }
    }

    // -----------------------------------------------------------------------
    // Registry snapshots
    // -----------------------------------------------------------------------

    fn find_purchase(&self, product_id: &str) -> Option<Purchase> {
        self.live_purchases()
            .into_iter()
            .find(|purchase| purchase.id() == product_id)
    }

    /// Snapshot live purchases, pruning dead handles. The borrow is released
    /// before the snapshot is used, so status mutation (and observer
    /// re-entry) happens with the registry unlocked.
    fn live_purchases(&self) -> Vec<Purchase> {
        let mut state = self.inner.state.borrow_mut();
        state.purchases.retain(|weak| weak.strong_count() > 0);
        state
            .purchases
            .iter()
            .filter_map(Weak::upgrade)
            .map(Purchase::from_inner)
            .collect()
    }

    fn live_restores(&self) -> Vec<Rc<dyn RestoreSink>> {
        let mut state = self.inner.state.borrow_mut();
        state.restores.retain(|weak| weak.strong_count() > 0);
        state.restores.iter().filter_map(Weak::upgrade).collect()
    }
}
