use http::StatusCode;
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::Serialize;

/// Errors raised by the drum ledger.
///
/// The registry and usage ledger raise the narrow variants (`DrumNotFound`,
/// `InvalidQuantity`, `DatabaseError`); the consumption coordinator turns
/// unit-of-work failures into `TransactionFailure` so callers see one
/// retryable category for anything that rolled back on the store side.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Drum not found: {0}")]
    DrumNotFound(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error(
        "Insufficient stock on drum {drum_number}. Available: {available}m, Required: {required}m"
    )]
    InsufficientStock {
        drum_number: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl ServiceError {
    /// Wraps a raw database error.
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    /// Builds an insufficient-stock error with normalised amounts so the
    /// operator-facing message reads `1685m` rather than `1685.0000m`.
    pub fn insufficient_stock(
        drum_number: impl Into<String>,
        available: Decimal,
        required: Decimal,
    ) -> Self {
        ServiceError::InsufficientStock {
            drum_number: drum_number.into(),
            available: available.normalize(),
            required: required.normalize(),
        }
    }

    /// Collapses store-level failures raised inside a unit of work into
    /// `TransactionFailure`. Domain errors pass through untouched.
    pub fn into_transaction_failure(self) -> Self {
        match self {
            ServiceError::DatabaseError(e) => ServiceError::TransactionFailure(e.to_string()),
            other => other,
        }
    }

    /// Whether the caller can retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::TransactionFailure(_) | ServiceError::DatabaseError(_)
        )
    }

    /// HTTP status for collaborators that surface these errors over HTTP.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::DrumNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidQuantity(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TransactionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for showing to an operator.
    /// Store errors are reported generically.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::TransactionFailure(_) => {
                "The update could not be saved. Please retry.".to_string()
            }
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}
