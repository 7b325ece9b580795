//! Error types shared by the choice stream, strategies and the example database.

use std::path::PathBuf;
use thiserror::Error;

/// Why a draw from a [`ChoiceStream`](crate::ChoiceStream) could not produce a value.
///
/// None of these are test failures. The scheduler treats every variant as
/// "this candidate is invalid" and discards it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    /// A replayed stream ran out of choices, or a live stream hit its size limit.
    #[error("choice stream overrun after {consumed} choices")]
    Overrun { consumed: usize },

    /// A filtered strategy rejected every attempt it was allowed.
    #[error("unable to satisfy filter after {attempts} attempts")]
    Unsatisfiable { attempts: usize },

    /// A bundle had no value to hand out.
    #[error("bundle '{bundle}' has no value available")]
    PoolUnavailable { bundle: String },

    /// A strategy was called with arguments that can never produce a value.
    #[error("invalid draw argument: {0}")]
    InvalidArgument(String),
}

impl DrawError {
    /// Returns true for errors caused by running out of choices.
    pub fn is_overrun(&self) -> bool {
        matches!(self, DrawError::Overrun { .. })
    }
}

/// Malformed bytes handed to [`decode_choices`](crate::decode_choices).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated varint at byte {0}")]
    Truncated(usize),
    #[error("varint at byte {0} does not fit in 64 bits")]
    TooLong(usize),
}

/// Errors raised by an [`ExampleDatabase`](crate::ExampleDatabase).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored example is corrupt: {0}")]
    Corrupt(#[from] DecodeError),
}

impl DatabaseError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatabaseError::Io {
            path: path.into(),
            source,
        }
    }
}
