//! Buy flow.
//!
//! Drives load-then-buy for a single purchase and re-emits payment
//! transitions as callbacks. "Purchased" is only surfaced once the
//! purchase's reconciled status is receipt-backed (`Piece` or
//! `Subscription`) — the raw platform "purchased" transaction event alone
//! is not enough.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use iap_core::{
    ObserverList, PaymentOptions, PaymentStatus, Priority, ProductEntry, ProductStatus, Purchase,
    PurchaseObserver, PurchaseStatus, QueueError, QueueErrorCode,
};

/// Callbacks for one buy flow. All methods default to no-ops so observers
/// implement only what they care about.
pub trait BuyObserver {
    fn did_purchasing(&self, _controller: &BuyController) {}
    fn did_purchased(&self, _controller: &BuyController) {}
    fn did_deferred(&self, _controller: &BuyController) {}
    fn did_failure(&self, _controller: &BuyController, _error: &QueueError) {}
    fn did_cancelled(&self, _controller: &BuyController) {}
}

struct BuyInner {
    weak_self: Weak<BuyInner>,
    purchase: Purchase,
    options: PaymentOptions,
    is_loading: Cell<bool>,
    is_buying: Cell<bool>,
    observers: ObserverList<dyn BuyObserver>,
}

/// Shared handle to one buy flow. Dropping the last handle detaches the
/// flow from its purchase (the purchase holds it weakly).
#[derive(Clone)]
pub struct BuyController {
    inner: Rc<BuyInner>,
}

impl BuyController {
    pub fn new(purchase: Purchase, options: PaymentOptions) -> Self {
        let inner = Rc::new_cyclic(|weak| BuyInner {
            weak_self: weak.clone(),
            purchase,
            options,
            is_loading: Cell::new(false),
            is_buying: Cell::new(false),
            observers: ObserverList::new(),
        });
        let as_observer: Rc<dyn PurchaseObserver> = inner.clone();
        inner.purchase.add_observer(&as_observer, Priority::Utility);
        Self { inner }
    }

    pub fn purchase(&self) -> &Purchase {
        &self.inner.purchase
    }

    pub fn options(&self) -> &PaymentOptions {
        &self.inner.options
    }

    pub fn is_loading(&self) -> bool {
        self.inner.is_loading.get()
    }

    pub fn is_buying(&self) -> bool {
        self.inner.is_buying.get()
    }

    pub fn add_observer(&self, observer: &Rc<dyn BuyObserver>, priority: Priority) {
        self.inner.observers.add(observer, priority);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn BuyObserver>) {
        self.inner.observers.remove(observer);
    }

    /// Start the flow. No-op while a load or a buy is already in flight.
    ///
    /// With a loaded descriptor the payment is submitted immediately;
    /// otherwise a product load is requested first and submission happens
    /// from the load observer callback.
    pub fn buy(&self) {
        if self.inner.is_loading.get() || self.inner.is_buying.get() {
            return;
        }
        match self.inner.purchase.product().filter(|e| e.descriptor().is_some()) {
            Some(entry) => self.inner.start_buy(&entry),
            None => self.inner.start_load(),
        }
    }
}

impl BuyInner {
    fn controller(&self) -> BuyController {
        BuyController {
            inner: self
                .weak_self
                .upgrade()
                .expect("flow inner is kept alive by the dispatching snapshot"),
        }
    }

    fn start_load(&self) {
        self.is_loading.set(true);
        self.purchase.load();
    }

    fn start_buy(&self, product: &ProductEntry) {
        self.is_buying.set(true);
        self.purchase.buy(product, self.options.clone());
    }
}

impl PurchaseObserver for BuyInner {
    fn did_update(&self, purchase: &Purchase) {
        if self.is_loading.get() {
            let Some(entry) = purchase.product() else {
                return;
            };
            match entry.status() {
                ProductStatus::Success(_) => {
                    self.is_loading.set(false);
                    self.start_buy(&entry);
                }
                ProductStatus::Failure(error) => {
                    self.is_loading.set(false);
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_failure(&controller, &error));
                }
                ProductStatus::Missing => {
                    self.is_loading.set(false);
                    let error = QueueError::new(
                        QueueErrorCode::ProductNotAvailable,
                        format!("product '{}' is not in the catalog", purchase.id()),
                    );
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_failure(&controller, &error));
                }
                ProductStatus::Unknown | ProductStatus::Loading => {}
            }
        } else if self.is_buying.get() {
            let Some(payment) = purchase.payment() else {
                return;
            };
            match payment.status() {
                PaymentStatus::Unknown => {}
                PaymentStatus::Purchasing => {
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_purchasing(&controller));
                }
                PaymentStatus::Purchased => match purchase.status() {
                    // Raw transaction only; wait for the verification pass
                    // to confirm ownership from the receipt.
                    PurchaseStatus::Unknown | PurchaseStatus::Empty => {}
                    PurchaseStatus::Piece(_) | PurchaseStatus::Subscription(_) => {
                        self.is_buying.set(false);
                        let controller = self.controller();
                        self.observers.notify(|o| o.did_purchased(&controller));
                    }
                },
                PaymentStatus::Deferred => {
                    self.is_buying.set(false);
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_deferred(&controller));
                }
                PaymentStatus::Failure(error) => {
                    self.is_buying.set(false);
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_failure(&controller, &error));
                }
                PaymentStatus::Cancelled => {
                    self.is_buying.set(false);
                    let controller = self.controller();
                    self.observers.notify(|o| o.did_cancelled(&controller));
                }
            }
        }
    }
}
