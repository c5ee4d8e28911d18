//! Product entry: load-state wrapper around platform product metadata.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::boundary::{ProductDescriptor, QueueError};
use crate::purchase::{Purchase, PurchaseInner};

/// Load lifecycle of one product-metadata request.
///
/// `Unknown → Loading → {Success, Failure, Missing}`. A `Failure` or
/// `Missing` entry is replaced, not reused, on the next
/// [`Purchase::load`](crate::Purchase::load).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductStatus {
    Unknown,
    Loading,
    Success(ProductDescriptor),
    Failure(QueueError),
    Missing,
}

impl ProductStatus {
    /// No further transitions happen without a new load attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProductStatus::Success(_) | ProductStatus::Failure(_) | ProductStatus::Missing
        )
    }

    /// Would the next coalesced batch pick this entry up?
    pub fn needs_load(&self) -> bool {
        matches!(self, ProductStatus::Unknown | ProductStatus::Failure(_))
    }
}

pub(crate) struct ProductInner {
    purchase: Weak<PurchaseInner>,
    status: RefCell<ProductStatus>,
}

/// Shared handle to one product entry. At most one live entry exists per
/// purchase at a time.
#[derive(Clone)]
pub struct ProductEntry {
    inner: Rc<ProductInner>,
}

impl ProductEntry {
    pub(crate) fn new(purchase: &Rc<PurchaseInner>) -> Self {
        Self {
            inner: Rc::new(ProductInner {
                purchase: Rc::downgrade(purchase),
                status: RefCell::new(ProductStatus::Unknown),
            }),
        }
    }

    pub fn status(&self) -> ProductStatus {
        self.inner.status.borrow().clone()
    }

    /// The resolved platform descriptor, if the load succeeded.
    pub fn descriptor(&self) -> Option<ProductDescriptor> {
        match &*self.inner.status.borrow() {
            ProductStatus::Success(descriptor) => Some(descriptor.clone()),
            _ => None,
        }
    }

    /// Identifier of the owning purchase; `None` once the purchase is gone.
    pub fn product_id(&self) -> Option<String> {
        self.inner.purchase.upgrade().map(|p| p.id.clone())
    }

    /// Mutate load status and notify the owning purchase's observers.
    pub(crate) fn set_status(&self, status: ProductStatus) {
        *self.inner.status.borrow_mut() = status;
        if let Some(purchase) = self.inner.purchase.upgrade() {
            Purchase::from_inner(purchase).notify_update();
        }
    }
}
