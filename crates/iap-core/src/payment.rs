//! Payment entry: state wrapper around one payment submission attempt.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::boundary::QueueError;
use crate::purchase::{Purchase, PurchaseInner};

/// Submission lifecycle of one payment attempt.
///
/// `Unknown → Purchasing → {Purchased, Deferred, Failure, Cancelled}`.
/// `Deferred` is not terminal: an ask-to-buy approval can still move the
/// payment to `Purchased` or `Failure`, so [`Purchase::buy`] keeps reusing a
/// deferred entry.
///
/// [`Purchase::buy`]: crate::Purchase::buy
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Unknown,
    Purchasing,
    Purchased,
    Deferred,
    Failure(QueueError),
    Cancelled,
}

impl PaymentStatus {
    /// A fresh payment entry is needed for another attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Purchased | PaymentStatus::Failure(_) | PaymentStatus::Cancelled
        )
    }
}

/// Submission options carried on the platform payment request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOptions {
    /// Units to purchase, at least 1.
    pub quantity: u32,
    pub application_username: Option<String>,
    /// Sandbox-only ask-to-buy simulation flag.
    pub simulates_ask_to_buy_in_sandbox: bool,
}

impl Default for PaymentOptions {
    fn default() -> Self {
        Self {
            quantity: 1,
            application_username: None,
            simulates_ask_to_buy_in_sandbox: false,
        }
    }
}

pub(crate) struct PaymentInner {
    purchase: Weak<PurchaseInner>,
    options: PaymentOptions,
    status: RefCell<PaymentStatus>,
}

/// Shared handle to one payment entry. At most one live entry exists per
/// purchase at a time.
#[derive(Clone)]
pub struct PaymentEntry {
    inner: Rc<PaymentInner>,
}

impl PaymentEntry {
    pub(crate) fn new(purchase: &Rc<PurchaseInner>, options: PaymentOptions) -> Self {
        Self {
            inner: Rc::new(PaymentInner {
                purchase: Rc::downgrade(purchase),
                options,
                status: RefCell::new(PaymentStatus::Unknown),
            }),
        }
    }

    pub fn options(&self) -> &PaymentOptions {
        &self.inner.options
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.status.borrow().clone()
    }

    /// The failure error, if the payment ended in `Failure`.
    pub fn error(&self) -> Option<QueueError> {
        match &*self.inner.status.borrow() {
            PaymentStatus::Failure(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Mutate submission status and notify the owning purchase's observers.
    pub(crate) fn set_status(&self, status: PaymentStatus) {
        *self.inner.status.borrow_mut() = status;
        if let Some(purchase) = self.inner.purchase.upgrade() {
            Purchase::from_inner(purchase).notify_update();
        }
    }
}
