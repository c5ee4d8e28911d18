//! Priority-ordered observer fan-out.
//!
//! Observers are held weakly: dropping the observing object is enough to
//! stop notifications, and dead entries are pruned on the next touch.
//! Dispatch snapshots the list first, so a callback may add or remove
//! observers (including itself) without corrupting iteration.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Notification order among observers of the same event. Lower variants are
/// notified first; registration order breaks ties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Framework-internal observers (batch controllers).
    Internal,
    /// Controller-level observers (buy / restore / subscription flows).
    Utility,
    /// Application observers, notified last.
    Normal,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

struct Entry<T: ?Sized> {
    priority: Priority,
    observer: Weak<T>,
}

/// An ordered list of weakly-held observers.
pub struct ObserverList<T: ?Sized> {
    entries: RefCell<Vec<Entry<T>>>,
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Register `observer`. Re-adding an already registered observer is a
    /// no-op (its original priority and position are kept).
    pub fn add(&self, observer: &Rc<T>, priority: Priority) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|e| e.observer.strong_count() > 0);
        let present = entries
            .iter()
            .any(|e| e.observer.upgrade().is_some_and(|o| same_rc(&o, observer)));
        if present {
            return;
        }
        let at = entries
            .iter()
            .position(|e| e.priority > priority)
            .unwrap_or(entries.len());
        entries.insert(
            at,
            Entry {
                priority,
                observer: Rc::downgrade(observer),
            },
        );
    }

    /// Remove `observer` by identity. Unknown observers are tolerated.
    pub fn remove(&self, observer: &Rc<T>) {
        self.entries.borrow_mut().retain(|e| match e.observer.upgrade() {
            Some(existing) => !same_rc(&existing, observer),
            None => false,
        });
    }

    /// Invoke `f` for every live observer, in priority order.
    ///
    /// The list is snapshotted (and dead entries pruned) before the first
    /// call, so `f` may re-enter [`add`](Self::add) / [`remove`](Self::remove).
    /// Observers added during dispatch are first notified on the next event.
    pub fn notify(&self, f: impl Fn(&T)) {
        let snapshot: Vec<Rc<T>> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|e| e.observer.strong_count() > 0);
            entries.iter().filter_map(|e| e.observer.upgrade()).collect()
        };
        for observer in &snapshot {
            f(observer);
        }
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|e| e.observer.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity comparison by data address. `Rc::ptr_eq` on trait objects also
/// compares vtable pointers, which may spuriously differ across codegen
/// units; comparing the thin data pointer is the stable identity.
pub(crate) fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Probe {
        fn ping(&self);
    }

    struct Named {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Probe for Named {
        fn ping(&self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn named(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<dyn Probe> {
        Rc::new(Named {
            name,
            log: Rc::clone(log),
        })
    }

    #[test]
    fn notify_runs_in_priority_then_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list: ObserverList<dyn Probe> = ObserverList::new();

        let c = named("c", &log);
        let a = named("a", &log);
        let b1 = named("b1", &log);
        let b2 = named("b2", &log);

        list.add(&c, Priority::Normal);
        list.add(&a, Priority::Internal);
        list.add(&b1, Priority::Utility);
        list.add(&b2, Priority::Utility);

        list.notify(|o| o.ping());
        assert_eq!(*log.borrow(), vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn re_adding_is_a_no_op() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list: ObserverList<dyn Probe> = ObserverList::new();
        let a = named("a", &log);

        list.add(&a, Priority::Normal);
        list.add(&a, Priority::Internal);

        assert_eq!(list.len(), 1);
        list.notify(|o| o.ping());
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn dropped_observer_is_skipped_and_pruned() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list: ObserverList<dyn Probe> = ObserverList::new();
        let a = named("a", &log);
        let b = named("b", &log);

        list.add(&a, Priority::Normal);
        list.add(&b, Priority::Normal);
        drop(a);

        list.notify(|o| o.ping());
        assert_eq!(*log.borrow(), vec!["b"]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn callback_may_add_and_remove_during_notify() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list = Rc::new(ObserverList::<dyn Probe>::new());
        let a = named("a", &log);
        let b = named("b", &log);
        let late = named("late", &log);

        list.add(&a, Priority::Normal);
        list.add(&b, Priority::Normal);

        {
            let list = Rc::clone(&list);
            let b = Rc::clone(&b);
            let late = Rc::clone(&late);
            list.clone().notify(move |o| {
                o.ping();
                list.remove(&b);
                list.add(&late, Priority::Normal);
            });
        }

        // The in-flight snapshot still saw both; the mutations apply after.
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        log.borrow_mut().clear();

        list.notify(|o| o.ping());
        assert_eq!(*log.borrow(), vec!["a", "late"]);
    }
}
