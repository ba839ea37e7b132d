use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by the simulators and their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("session has not been started")]
    NotStarted,

    #[error("cannot move session from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("session is stopped")]
    SessionStopped,

    #[error("got {inputs} inputs but {measurements} measurements")]
    LengthMismatch { inputs: usize, measurements: usize },

    #[error("cannot parse `{value}` as a number")]
    Parse { value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error(transparent)]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// Rejects negative, NaN and infinite values.
pub(crate) fn ensure_non_negative(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::config(field, format!("{value} is not finite")));
    }
    if value < 0.0 {
        return Err(Error::config(field, format!("{value} is negative")));
    }
    Ok(())
}
