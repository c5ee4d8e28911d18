//! Restore flow.
//!
//! One restore round trip: register with the engine, ask the queue to
//! replay completed transactions, accumulate the distinct purchases the
//! engine reports as restored, and notify once on finish — success or
//! failure — with whatever accumulated.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use iap_core::{ObserverList, Priority, Purchase, QueueError, RestoreSink, Store};

pub trait RestoreObserver {
    fn did_finish(
        &self,
        controller: &RestoreController,
        purchases: &[Purchase],
        error: Option<&QueueError>,
    );
}

struct RestoreInner {
    weak_self: Weak<RestoreInner>,
    store: Store,
    application_username: Option<String>,
    is_restoring: Cell<bool>,
    accumulated: RefCell<Vec<Purchase>>,
    observers: ObserverList<dyn RestoreObserver>,
}

/// Shared handle to one restore flow.
#[derive(Clone)]
pub struct RestoreController {
    inner: Rc<RestoreInner>,
}

impl RestoreController {
    pub fn new(store: Store, application_username: Option<String>) -> Self {
        let inner = Rc::new_cyclic(|weak| RestoreInner {
            weak_self: weak.clone(),
            store,
            application_username,
            is_restoring: Cell::new(false),
            accumulated: RefCell::new(Vec::new()),
            observers: ObserverList::new(),
        });
        Self { inner }
    }

    pub fn application_username(&self) -> Option<&str> {
        self.inner.application_username.as_deref()
    }

    pub fn is_restoring(&self) -> bool {
        self.inner.is_restoring.get()
    }

    pub fn add_observer(&self, observer: &Rc<dyn RestoreObserver>, priority: Priority) {
        self.inner.observers.add(observer, priority);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn RestoreObserver>) {
        self.inner.observers.remove(observer);
    }

    /// Start a restore round. No-op while one is already running.
    pub fn restore(&self) {
        if self.inner.is_restoring.get() {
            return;
        }
        self.inner.is_restoring.set(true);
        let sink: Rc<dyn RestoreSink> = self.inner.clone();
        self.inner.store.register_restore(&sink);
        self.inner
            .store
            .restore(self.inner.application_username.as_deref());
    }
}

impl RestoreInner {
    fn controller(&self) -> RestoreController {
        RestoreController {
            inner: self
                .weak_self
                .upgrade()
                .expect("flow inner is kept alive by the dispatching engine snapshot"),
        }
    }
}

impl RestoreSink for RestoreInner {
    fn restored(&self, purchase: &Purchase) {
        let mut accumulated = self.accumulated.borrow_mut();
        if !accumulated.iter().any(|p| p.id() == purchase.id()) {
            accumulated.push(purchase.clone());
        }
    }

    fn finished(&self, error: Option<QueueError>) {
        let delivered = std::mem::take(&mut *self.accumulated.borrow_mut());
        let controller = self.controller();
        self.observers
            .notify(|o| o.did_finish(&controller, &delivered, error.as_ref()));

        let sink: Rc<dyn RestoreSink> = self
            .weak_self
            .upgrade()
            .expect("flow inner is kept alive by the dispatching engine snapshot");
        self.store.unregister_restore(&sink);
        self.is_restoring.set(false);
    }
}
