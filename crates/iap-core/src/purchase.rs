//! Purchase entity: the reconciled ownership record for one catalog
//! identifier.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::boundary::{ProductDescriptor, TransactionEvent};
use crate::engine::Store;
use crate::observer::{ObserverList, Priority};
use crate::payment::{PaymentEntry, PaymentOptions, PaymentStatus};
use crate::product::{ProductEntry, ProductStatus};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Per-environment expiration grace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigVariant {
    /// Extra time added to a subscription's raw expiration to absorb clock
    /// and processing skew.
    pub extra_expiration_interval: Duration,
}

impl ConfigVariant {
    pub fn new(extra_expiration_interval: Duration) -> Self {
        Self {
            extra_expiration_interval,
        }
    }
}

/// Grace configuration for one purchase, split by receipt environment.
/// Sandbox subscriptions run on compressed real-time durations, so their
/// grace is much shorter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurchaseConfig {
    pub production: ConfigVariant,
    pub sandbox: ConfigVariant,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            production: ConfigVariant::new(Duration::hours(1)),
            sandbox: ConfigVariant::new(Duration::seconds(60)),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// One consumable / non-renewing ownership piece.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub date: DateTime<Utc>,
    pub quantity: u32,
}

/// Reconciled subscription ownership. `expiration_date` already includes the
/// environment grace correction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub cancellation_date: Option<DateTime<Utc>>,
}

/// Reconciled ownership status for one identifier.
///
/// Not monotonic: every successful verification pass re-derives this from
/// the receipt, and an entry dropping out of the receipt is authoritative
/// (a `Subscription` can become `Empty`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseStatus {
    Unknown,
    Piece(Vec<Piece>),
    Subscription(Subscription),
    Empty,
}

// ---------------------------------------------------------------------------
// Purchase
// ---------------------------------------------------------------------------

/// Observer of one purchase entity. Fired on every status change of the
/// purchase itself or its product / payment entries.
pub trait PurchaseObserver {
    fn did_update(&self, purchase: &Purchase);
}

pub(crate) struct PurchaseInner {
    pub(crate) id: String,
    pub(crate) config: PurchaseConfig,
    pub(crate) status: RefCell<PurchaseStatus>,
    pub(crate) product: RefCell<Option<ProductEntry>>,
    pub(crate) payment: RefCell<Option<PaymentEntry>>,
    pub(crate) observers: ObserverList<dyn PurchaseObserver>,
    pub(crate) store: Store,
}

/// Shared handle to one purchase entity.
///
/// Created through [`Store::purchase`], which registers the entity with the
/// engine. The engine only holds a weak reference: dropping every handle is
/// enough to retire the entity, no explicit deregistration needed.
#[derive(Clone)]
pub struct Purchase {
    pub(crate) inner: Rc<PurchaseInner>,
}

impl Purchase {
    pub(crate) fn create(store: &Store, id: String, config: PurchaseConfig) -> Self {
        Self {
            inner: Rc::new(PurchaseInner {
                id,
                config,
                status: RefCell::new(PurchaseStatus::Unknown),
                product: RefCell::new(None),
                payment: RefCell::new(None),
                observers: ObserverList::new(),
                store: store.clone(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<PurchaseInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &PurchaseConfig {
        &self.inner.config
    }

    pub fn status(&self) -> PurchaseStatus {
        self.inner.status.borrow().clone()
    }

    /// The live product entry, if any.
    pub fn product(&self) -> Option<ProductEntry> {
        self.inner.product.borrow().clone()
    }

    /// The live payment entry, if any.
    pub fn payment(&self) -> Option<PaymentEntry> {
        self.inner.payment.borrow().clone()
    }

    /// The loaded platform descriptor, if the product load succeeded.
    pub fn descriptor(&self) -> Option<ProductDescriptor> {
        self.product().and_then(|entry| entry.descriptor())
    }

    /// Identity comparison between handles to the same entity.
    pub fn ptr_eq(&self, other: &Purchase) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn add_observer(&self, observer: &Rc<dyn PurchaseObserver>, priority: Priority) {
        self.inner.observers.add(observer, priority);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn PurchaseObserver>) {
        self.inner.observers.remove(observer);
    }

    /// Return the current product entry, or create a fresh one and schedule
    /// a coalesced batch load.
    ///
    /// Idempotent while a load is in flight or already succeeded; only a
    /// `Failure` or `Missing` entry triggers a new attempt (with a fresh
    /// entry — failed entries are replaced, not reused).
    pub fn load(&self) -> ProductEntry {
        if let Some(entry) = self.product() {
            match entry.status() {
                ProductStatus::Unknown | ProductStatus::Loading | ProductStatus::Success(_) => {
                    return entry;
                }
                ProductStatus::Failure(_) | ProductStatus::Missing => {}
            }
        }
        let entry = ProductEntry::new(&self.inner);
        *self.inner.product.borrow_mut() = Some(entry.clone());
        self.inner.store.schedule_products_load();
        entry
    }

    /// Return the current payment entry, or create a fresh one and submit it
    /// to the payment queue.
    ///
    /// Idempotent while `Unknown`, `Purchasing` or `Deferred`; a terminal
    /// entry (`Purchased`, `Failure`, `Cancelled`) is replaced by a new
    /// attempt.
    ///
    /// # Panics
    /// Panics if `product` has no loaded descriptor. Buying an unloaded
    /// product is a caller contract violation, not a recoverable runtime
    /// error.
    pub fn buy(&self, product: &ProductEntry, options: PaymentOptions) -> PaymentEntry {
        if let Some(payment) = self.payment() {
            match payment.status() {
                PaymentStatus::Unknown | PaymentStatus::Purchasing | PaymentStatus::Deferred => {
                    return payment;
                }
                PaymentStatus::Purchased
                | PaymentStatus::Failure(_)
                | PaymentStatus::Cancelled => {}
            }
        }
        let payment = PaymentEntry::new(&self.inner, options);
        *self.inner.payment.borrow_mut() = Some(payment.clone());
        self.inner.store.submit_payment(self, product, &payment);
        payment
    }

    /// Get-or-create the payment entry for an incoming transaction event.
    /// Unsolicited events (restores, external purchases, another device's
    /// ask-to-buy approval) arrive with no local payment; the entry is
    /// materialized from the transaction's own options.
    pub(crate) fn payment_for_transaction(&self, event: &TransactionEvent) -> PaymentEntry {
        if let Some(payment) = self.payment() {
            return payment;
        }
        let options = PaymentOptions {
            quantity: event.quantity.max(1),
            application_username: event.application_username.clone(),
            simulates_ask_to_buy_in_sandbox: false,
        };
        let payment = PaymentEntry::new(&self.inner, options);
        *self.inner.payment.borrow_mut() = Some(payment.clone());
        payment
    }

    /// Ensure a product entry exists (used when a coalesced batch picks up a
    /// purchase that never called [`load`](Self::load)).
    pub(crate) fn ensure_product_entry(&self) -> ProductEntry {
        if let Some(entry) = self.product() {
            return entry;
        }
        let entry = ProductEntry::new(&self.inner);
        *self.inner.product.borrow_mut() = Some(entry.clone());
        entry
    }

    /// Mutate reconciled status and synchronously notify observers in
    /// priority order.
    pub(crate) fn set_status(&self, status: PurchaseStatus) {
        *self.inner.status.borrow_mut() = status;
        self.notify_update();
    }

    pub(crate) fn notify_update(&self) {
        let handle = self.clone();
        self.inner.observers.notify(|observer| observer.did_update(&handle));
    }
}
