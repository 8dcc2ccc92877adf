use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse failure taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal before any state is touched.
    Configuration,
    /// Business-rule rejection, safe to surface to the user verbatim.
    InsufficientFunds,
    /// Store, luck provider or signing failed; nothing was committed.
    Dependency,
}

#[derive(Debug, Error)]
pub enum TributeError {
    #[error("instrument '{0}' not found in manifest or instrument configuration")]
    UnknownInstrument(String),

    #[error("invalid instrument configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid tribute amount {0}")]
    InvalidAmount(Decimal),

    #[error("Cannot make tribute. Insufficient credits.")]
    InsufficientCredits { required: Decimal, available: Decimal },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("corrupt value in {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("luck provider error: {0}")]
    Provider(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("settlement task failed: {0}")]
    Join(String),
}

impl TributeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TributeError::UnknownInstrument(_)
            | TributeError::InvalidConfig(_)
            | TributeError::Config(_)
            | TributeError::InvalidAmount(_) => ErrorClass::Configuration,
            TributeError::InsufficientCredits { .. } => ErrorClass::InsufficientFunds,
            TributeError::NotFound { .. }
            | TributeError::Store(_)
            | TributeError::Corrupt { .. }
            | TributeError::Provider(_)
            | TributeError::Signing(_)
            | TributeError::Join(_) => ErrorClass::Dependency,
        }
    }
}

pub type Result<T> = std::result::Result<T, TributeError>;
