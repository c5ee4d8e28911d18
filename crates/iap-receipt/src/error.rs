/// Why receipt verification failed.
///
/// `NotFound` is the only variant the engine maps to a state change (every
/// registered purchase becomes `Empty`); the rest leave statuses untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptError {
    /// No local receipt exists on this installation.
    NotFound,
    /// Receipt payload hash does not match the computed hash.
    HashMismatch,
    /// Receipt was issued for a different bundle identity.
    BundleMismatch { expected: String, found: String },
    /// Store signature did not validate against the receipt payload.
    SignatureInvalid,
    /// Receipt structure could not be parsed.
    Malformed(String),
}

impl ReceiptError {
    /// True only for the distinguished "no receipt on disk" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReceiptError::NotFound)
    }
}

impl std::fmt::Display for ReceiptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptError::NotFound => write!(f, "local receipt not found"),
            ReceiptError::HashMismatch => write!(f, "receipt hash mismatch"),
            ReceiptError::BundleMismatch { expected, found } => {
                write!(f, "receipt bundle mismatch: expected {expected}, found {found}")
            }
            ReceiptError::SignatureInvalid => write!(f, "receipt signature invalid"),
            ReceiptError::Malformed(detail) => write!(f, "receipt malformed: {detail}"),
        }
    }
}

impl std::error::Error for ReceiptError {}
