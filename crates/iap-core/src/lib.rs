//! iap-core
//!
//! Purchase-state reconciliation engine.
//!
//! Merges two independent asynchronous sources — the platform transaction
//! queue (events in arbitrary order, possibly duplicated) and periodic local
//! receipt verification — into one consistent view of "what has this
//! identifier been purchased or subscribed to, and until when".
//!
//! Architectural decisions:
//! - Single-threaded cooperative model: all engine state lives behind
//!   `Rc`/`RefCell` on one execution context. Registries hold weak handles
//!   and prune dead entries opportunistically; destruction never requires
//!   explicit deregistration.
//! - Deterministic core: "now" is always an explicit argument, coalesced
//!   work drains in [`Store::tick`], and the re-verify timer is a stored
//!   deadline the driver sleeps on. No IO, no clocks, no spawning in here.
//! - Platform collaborators (payment queue, product metadata, receipt
//!   verification) are trait seams; production adapters and test doubles
//!   plug in behind them.
//! - Observer fan-out is priority-ordered and snapshot-before-dispatch, so
//!   callbacks may add or remove observers without corrupting iteration.

mod boundary;
mod engine;
mod observer;
mod payment;
mod product;
mod purchase;

pub use boundary::{
    NoopWakeup, PaymentQueue, PaymentRequest, PlatformEvent, ProductDescriptor, ProductFetcher,
    QueryId, QueueError, QueueErrorCode, TransactionEvent, TransactionId, TransactionState, Wakeup,
};
pub use engine::{RestoreSink, Store};
pub use observer::{ObserverList, Priority};
pub use payment::{PaymentEntry, PaymentOptions, PaymentStatus};
pub use product::{ProductEntry, ProductStatus};
pub use purchase::{
    ConfigVariant, Piece, Purchase, PurchaseConfig, PurchaseObserver, PurchaseStatus, Subscription,
};
