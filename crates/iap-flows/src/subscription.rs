//! Subscription-aggregate flow.
//!
//! Watches a set of purchases and answers one question: can the
//! subscription-gated features activate right now? While any purchase is
//! still `Unknown` the previous answer is kept (insufficient information);
//! otherwise the answer is true iff any purchase holds an unexpired
//! subscription. Observers are notified only on an actual change.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use iap_core::{ObserverList, Priority, Purchase, PurchaseObserver, PurchaseStatus};

use crate::clock::{Clock, SystemClock};

pub trait SubscriptionObserver {
    fn did_change(&self, controller: &SubscriptionController, can_activate: bool);
}

struct SubscriptionInner {
    weak_self: Weak<SubscriptionInner>,
    purchases: Vec<Purchase>,
    can_activate: Cell<bool>,
    clock: Rc<dyn Clock>,
    observers: ObserverList<dyn SubscriptionObserver>,
}

/// Shared handle to one subscription-aggregate flow.
#[derive(Clone)]
pub struct SubscriptionController {
    inner: Rc<SubscriptionInner>,
}

impl SubscriptionController {
    /// `can_activate` seeds the answer until the first conclusive
    /// recomputation (e.g. the value persisted from the previous launch).
    pub fn new(purchases: Vec<Purchase>, can_activate: bool) -> Self {
        Self::with_clock(purchases, can_activate, Rc::new(SystemClock))
    }

    pub fn with_clock(purchases: Vec<Purchase>, can_activate: bool, clock: Rc<dyn Clock>) -> Self {
        let inner = Rc::new_cyclic(|weak| SubscriptionInner {
            weak_self: weak.clone(),
            purchases,
            can_activate: Cell::new(can_activate),
            clock,
            observers: ObserverList::new(),
        });
        let as_observer: Rc<dyn PurchaseObserver> = inner.clone();
        for purchase in &inner.purchases {
            purchase.add_observer(&as_observer, Priority::Utility);
        }
        Self { inner }
    }

    pub fn purchases(&self) -> &[Purchase] {
        &self.inner.purchases
    }

    pub fn can_activate(&self) -> bool {
        self.inner.can_activate.get()
    }

    pub fn add_observer(&self, observer: &Rc<dyn SubscriptionObserver>, priority: Priority) {
        self.inner.observers.add(observer, priority);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn SubscriptionObserver>) {
        self.inner.observers.remove(observer);
    }
}

impl SubscriptionInner {
    fn controller(&self) -> SubscriptionController {
        SubscriptionController {
            inner: self
                .weak_self
                .upgrade()
                .expect("flow inner is kept alive by the dispatching snapshot"),
        }
    }

    /// `None` while any purchase is still `Unknown`.
    fn recompute(&self) -> Option<bool> {
        let now = self.clock.now();
        for purchase in &self.purchases {
            match purchase.status() {
                PurchaseStatus::Unknown => return None,
                PurchaseStatus::Subscription(sub) if now < sub.expiration_date => {
                    return Some(true);
                }
                _ => {}
            }
        }
        Some(false)
    }
}

impl PurchaseObserver for SubscriptionInner {
    fn did_update(&self, _purchase: &Purchase) {
        let Some(can_activate) = self.recompute() else {
            return;
        };
        if can_activate == self.can_activate.get() {
            return;
        }
        self.can_activate.set(can_activate);
        let controller = self.controller();
        self.observers.notify(|o| o.did_change(&controller, can_activate));
    }
}
