use thiserror::Error;

/// The stable error taxonomy every operation maps to. Validation and
/// authorization variants are detected before any mutation; `InvalidState`
/// is additionally enforced by conditional updates at the store, so the
/// precheck passing never guarantees the write will.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing caller identity")]
    Unauthorized,

    #[error("caller lacks permission for this entity")]
    Forbidden,

    #[error("entity not found")]
    NotFound,

    #[error("operation not valid for current status: {0}")]
    InvalidState(&'static str),

    #[error("a bid for this project and developer already exists")]
    DuplicateBid,

    #[error(transparent)]
    Adapter(#[from] lancer_escrow::AdapterError),

    #[error("invalid input: {0}")]
    Validation(&'static str),

    /// Infrastructure failures; callers see a generic message, the detail
    /// stays in the logs.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind, used by the HTTP boundary and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::DuplicateBid => "duplicate_bid",
            Self::Adapter(_) => "adapter_failure",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal",
        }
    }
}
