//! Products-batch flow.
//!
//! Tracks a set of purchases until every product entry reaches a terminal
//! load status. While any entry still needs loading after a round resolves,
//! the flow re-issues `load()` for the stragglers (a `Failure` entry is
//! retried with a fresh entry); it notifies `did_finish` exactly once when
//! everything is terminal.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use iap_core::{ObserverList, Priority, Purchase, PurchaseObserver};

pub trait ProductsObserver {
    fn did_finish(&self, controller: &ProductsController);
}

struct ProductsInner {
    weak_self: Weak<ProductsInner>,
    purchases: Vec<Purchase>,
    is_loading: Cell<bool>,
    observers: ObserverList<dyn ProductsObserver>,
}

/// Shared handle to one products-batch flow.
#[derive(Clone)]
pub struct ProductsController {
    inner: Rc<ProductsInner>,
}

impl ProductsController {
    pub fn new(purchases: Vec<Purchase>) -> Self {
        let inner = Rc::new_cyclic(|weak| ProductsInner {
            weak_self: weak.clone(),
            purchases,
            is_loading: Cell::new(false),
            observers: ObserverList::new(),
        });
        let as_observer: Rc<dyn PurchaseObserver> = inner.clone();
        for purchase in &inner.purchases {
            purchase.add_observer(&as_observer, Priority::Internal);
        }
        Self { inner }
    }

    pub fn purchases(&self) -> &[Purchase] {
        &self.inner.purchases
    }

    /// True while any purchase lacks an entry, or its entry is `Unknown` or
    /// `Failure`.
    pub fn is_need_loading(&self) -> bool {
        self.inner.is_need_loading()
    }

    /// True once every purchase has an entry with a terminal load status
    /// (`Success`, `Failure` or `Missing`).
    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.is_loading.get()
    }

    pub fn add_observer(&self, observer: &Rc<dyn ProductsObserver>, priority: Priority) {
        self.inner.observers.add(observer, priority);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn ProductsObserver>) {
        self.inner.observers.remove(observer);
    }

    /// Kick off loading. No-op while already loading or when nothing needs
    /// a load.
    pub fn load(&self) {
        if self.inner.is_loading.get() || !self.inner.is_need_loading() {
            return;
        }
        self.inner.is_loading.set(true);
        for purchase in &self.inner.purchases {
            purchase.load();
        }
    }
}

impl ProductsInner {
    fn controller(&self) -> ProductsController {
        ProductsController {
            inner: self
                .weak_self
                .upgrade()
                .expect("flow inner is kept alive by the dispatching snapshot"),
        }
    }

    fn is_need_loading(&self) -> bool {
        self.purchases.iter().any(|purchase| match purchase.product() {
            Some(entry) => entry.status().needs_load(),
            None => true,
        })
    }

    fn is_loaded(&self) -> bool {
        self.purchases.iter().all(|purchase| match purchase.product() {
            Some(entry) => entry.status().is_terminal(),
            None => false,
        })
    }
}

impl PurchaseObserver for ProductsInner {
    fn did_update(&self, _purchase: &Purchase) {
        if !self.is_loading.get() {
            return;
        }
        if !self.is_loaded() {
            return;
        }
        if self.is_need_loading() {
            // A round resolved but left failures behind; retry those.
            for purchase in &self.purchases {
                purchase.load();
            }
        } else {
            self.is_loading.set(false);
            let controller = self.controller();
            self.observers.notify(|o| o.did_finish(&controller));
        }
    }
}
