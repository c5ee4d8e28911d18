//! Platform boundary seams.
//!
//! The engine consumes the platform's payment queue and product-metadata
//! request APIs through the traits below; real adapters live outside this
//! crate and test doubles use deterministic in-memory state. Responses and
//! queue callbacks come back as [`PlatformEvent`]s, redispatched onto the
//! engine's execution context by the driver.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Handle tying one in-flight product-metadata batch to the entries it will
/// resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(pub u64);

/// Platform transaction identifier, opaque to the engine.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

// ---------------------------------------------------------------------------
// QueueError
// ---------------------------------------------------------------------------

/// Coarse error classes reported by the payment queue.
///
/// `PaymentCancelled` is special-cased: a user backing out of the payment
/// sheet is a distinguished non-error outcome, not a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueErrorCode {
    PaymentCancelled,
    PaymentInvalid,
    PaymentNotAllowed,
    ProductNotAvailable,
    Unknown,
}

/// A payment-queue or product-request error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueError {
    pub code: QueueErrorCode,
    pub message: String,
}

impl QueueError {
    pub fn new(code: QueueErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(QueueErrorCode::PaymentCancelled, "payment cancelled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(QueueErrorCode::Unknown, message)
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "payment queue error ({:?}): {}", self.code, self.message)
    }
}

impl std::error::Error for QueueError {}

// ---------------------------------------------------------------------------
// Product metadata
// ---------------------------------------------------------------------------

/// Resolved platform product metadata, opaque to the reconciliation logic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDescriptor {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub currency: String,
}

impl ProductDescriptor {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        price_cents: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price_cents,
            currency: currency.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payment submission
// ---------------------------------------------------------------------------

/// One payment submission handed to the platform queue. Completion arrives
/// later as [`TransactionEvent`]s, never synchronously.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub product: ProductDescriptor,
    pub quantity: u32,
    pub application_username: Option<String>,
    pub simulates_ask_to_buy_in_sandbox: bool,
}

// ---------------------------------------------------------------------------
// Transaction events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Restored,
    Deferred,
    Failed(QueueError),
}

/// One delivered transaction-queue event.
///
/// Events may arrive in any order and the same logical transaction may be
/// delivered more than once; the engine's handling is idempotent per
/// transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub product_id: String,
    pub quantity: u32,
    pub application_username: Option<String>,
    pub state: TransactionState,
}

impl TransactionEvent {
    pub fn new(
        transaction_id: impl Into<String>,
        product_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(transaction_id),
            product_id: product_id.into(),
            quantity: 1,
            application_username: None,
            state,
        }
    }
}

/// Everything the platform can push at the engine. The driver forwards each
/// to the matching `Store::handle_*` entry point on the engine context.
#[derive(Clone, Debug)]
pub enum PlatformEvent {
    Transaction(TransactionEvent),
    ProductsResponse {
        query: QueryId,
        result: Result<Vec<ProductDescriptor>, QueueError>,
    },
    TransactionsRemoved,
    EntitlementsRevoked { product_ids: Vec<String> },
    RestoreFinished,
    RestoreFailed(QueueError),
    EnteredForeground,
}

// ---------------------------------------------------------------------------
// Boundary traits
// ---------------------------------------------------------------------------

/// The platform payment queue.
///
/// `finish` acknowledges a delivered transaction; the platform contract
/// makes it safe to call for an already-finished transaction, and the
/// engine invokes it exactly once per delivered event.
pub trait PaymentQueue {
    fn can_make_payments(&self) -> bool {
        true
    }

    fn submit(&self, request: PaymentRequest);

    fn restore_completed_transactions(&self, application_username: Option<&str>);

    fn finish(&self, transaction: &TransactionId);

    /// Platform UX trigger, passed through unchanged.
    fn show_price_consent(&self) {}

    /// Platform UX trigger, passed through unchanged.
    fn present_code_redemption(&self) {}
}

/// The platform product-metadata request API. The response (or request-level
/// failure) comes back as [`PlatformEvent::ProductsResponse`] carrying the
/// same [`QueryId`].
pub trait ProductFetcher {
    fn fetch(&self, query: QueryId, product_ids: Vec<String>);
}

/// Nudges the driver that coalesced work or the re-verify deadline changed.
/// The deterministic core never runs deferred work inline; it flags it and
/// wakes whoever owns the loop.
pub trait Wakeup {
    fn wakeup(&self);
}

/// For tests and synchronous harnesses that drain [`Store::tick`] themselves.
///
/// [`Store::tick`]: crate::Store::tick
pub struct NoopWakeup;

impl Wakeup for NoopWakeup {
    fn wakeup(&self) {}
}
