use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network, HTTP or archive failure while fetching the dataset.
    #[error("{context}: {source}")]
    Acquisition {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Any SQL failure.  `intent` says what the statement was meant to do.
    #[error("Error {intent}: {source}")]
    Database {
        intent: String,
        #[source]
        source: BoxError,
    },

    /// An external converter exited with a non-zero status.
    #[error("{tool} failed ({status}): {stderr}")]
    Conversion {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not find resource in \"{}\" (pattern {pattern:?}, {matches} matches)", dir.display())]
    ResourceNotFound {
        dir: PathBuf,
        pattern: Option<String>,
        matches: usize,
    },

    /// A swap failed and the production database could not be renamed back
    /// from its backup.  Both copies are left in place.
    #[error(
        "Database {production} is missing: {staging} could not be promoted and {backup} \
         could not be renamed back: {source}"
    )]
    ProductionMissing {
        production: String,
        backup: String,
        staging: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn acquisition(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SyncError::Acquisition {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn database(intent: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SyncError::Database {
            intent: intent.into(),
            source: source.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        SyncError::Configuration(msg.into())
    }
}
