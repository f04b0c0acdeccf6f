use thiserror::Error;

/// Attacker-visible verification outcomes.
///
/// These are ordinary values, not exceptions: a failed AEAD tag or a bad
/// signature is a protocol result that `update_tag` reacts to by refusing
/// the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// AEAD (AES-GCM) authentication tag did not verify.
    AeadMismatch,
    /// An ECDSA signature did not verify or could not be parsed.
    SignatureInvalid,
    /// Decrypted layer did not start with the verifying reader's id.
    ReaderIdMismatch { expected: u32 },
    /// PKCS#7 padding of an attacker-supplied ciphertext was malformed.
    BadPadding,
    /// No TagDB row, or more than one, for an online-secret key.
    OnlineSecretMissing { tag_id: String },
    /// A chain record named a reader the keyfile does not know.
    UnknownReader { reader: u32 },
    /// Recomputed HMAC point did not match the decrypted one.
    HmacMismatch,
    /// Decrypted polynomial point matched no sanctioned path.
    NoPathMatch,
    /// The recovered chain anchor was not the hash of the tag fields.
    ChainAnchorMismatch,
}

impl std::fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyFailure::AeadMismatch => write!(f, "AEAD tag mismatch"),
            VerifyFailure::SignatureInvalid => write!(f, "signature invalid"),
            VerifyFailure::ReaderIdMismatch { expected } => {
                write!(f, "decrypted layer is not addressed to reader {}", expected)
            }
            VerifyFailure::BadPadding => write!(f, "bad padding"),
            VerifyFailure::OnlineSecretMissing { tag_id } => {
                write!(f, "online secret not found for ID {}", tag_id)
            }
            VerifyFailure::UnknownReader { reader } => {
                write!(f, "reader {} is not in the keyfile", reader)
            }
            VerifyFailure::HmacMismatch => write!(f, "HMAC could not be verified"),
            VerifyFailure::NoPathMatch => write!(f, "no sanctioned path matches"),
            VerifyFailure::ChainAnchorMismatch => write!(f, "chain anchor hash mismatch"),
        }
    }
}

/// Custom error types for the tagtrail engines
#[derive(Error, Debug)]
pub enum TagTrailError {
    #[error("verification failed: {0}")]
    VerificationFailed(VerifyFailure),

    #[error("tag content error: {0}")]
    TagContent(String),

    #[error("tag parsing error: {0}")]
    TagParse(String),

    #[error("keyfile error: {0}")]
    Keyfile(String),

    #[error("unsupported scheme: {0}")]
    UnknownScheme(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("tag {0} is locked by another writer")]
    TagLocked(u32),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TagTrailError {
    /// True for the attacker-visible `(false, ∅)` outcomes; everything
    /// else is fatal to the operation.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, TagTrailError::VerificationFailed(_))
    }
}

/// Result type alias for tagtrail operations
pub type Result<T> = std::result::Result<T, TagTrailError>;
