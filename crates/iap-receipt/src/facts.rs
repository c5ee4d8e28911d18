use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One auto-renewable subscription transaction parsed from the receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub product_id: String,
    pub purchase_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub cancellation_date: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    pub fn new(
        product_id: impl Into<String>,
        purchase_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        cancellation_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            purchase_date,
            expiration_date,
            cancellation_date,
        }
    }
}

/// One consumable / non-renewing purchase transaction parsed from the receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceRecord {
    pub product_id: String,
    pub purchase_date: DateTime<Utc>,
    pub quantity: u32,
}

impl PieceRecord {
    pub fn new(product_id: impl Into<String>, purchase_date: DateTime<Utc>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            purchase_date,
            quantity,
        }
    }
}

/// Parsed contents of a validated receipt, queryable by product identifier.
///
/// Keyed with `BTreeMap` so iteration is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFacts {
    subscriptions: BTreeMap<String, Vec<SubscriptionRecord>>,
    pieces: BTreeMap<String, Vec<PieceRecord>>,
}

impl ReceiptFacts {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push_subscription(&mut self, record: SubscriptionRecord) {
        self.subscriptions
            .entry(record.product_id.clone())
            .or_default()
            .push(record);
    }

    pub fn push_piece(&mut self, record: PieceRecord) {
        self.pieces
            .entry(record.product_id.clone())
            .or_default()
            .push(record);
    }

    /// Latest subscription transaction for `product_id`, by purchase date.
    pub fn last_subscription(&self, product_id: &str) -> Option<&SubscriptionRecord> {
        self.subscriptions
            .get(product_id)?
            .iter()
            .max_by_key(|r| r.purchase_date)
    }

    /// All consumable / non-renewing transactions for `product_id`.
    pub fn pieces(&self, product_id: &str) -> &[PieceRecord] {
        self.pieces.get(product_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.pieces.is_empty()
    }
}
