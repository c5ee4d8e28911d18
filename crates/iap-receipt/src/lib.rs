//! iap-receipt
//!
//! Receipt verification boundary.
//!
//! Architectural decisions:
//! - Receipt cryptography (hash, bundle identity, signature, ASN.1 layout)
//!   lives behind [`ReceiptVerifier`]; this crate only defines the contract
//!   and the parsed facts a successful verification yields.
//! - "Receipt not found" is a distinguished outcome, not a generic failure:
//!   the engine treats it as an authoritative "never purchased" state, while
//!   every other validation error preserves last-known statuses.
//! - Deterministic, pure data. No IO. No clocks.

mod error;
mod facts;

pub use error::ReceiptError;
pub use facts::{PieceRecord, ReceiptFacts, SubscriptionRecord};

/// Verifies the locally stored receipt and yields its parsed contents.
///
/// Implementations own receipt loading and integrity validation end-to-end.
/// Production wires the platform's receipt store here; tests use a
/// programmable double.
///
/// # Errors
/// [`ReceiptError::NotFound`] when no local receipt exists; any other
/// variant when a receipt exists but fails validation.
pub trait ReceiptVerifier {
    fn verify(&self) -> Result<ReceiptFacts, ReceiptError>;
}
