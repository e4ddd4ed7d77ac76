//! Error types for ingestion, merge and export

use crate::ingestion::types::SourceType;
use thiserror::Error;

/// Ingestion failures. Any of these leaves the stored blob and staging rows untouched.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Upload is empty")]
    EmptyUpload,

    #[error("Missing required columns for {source_type}: {}", missing.join(", "))]
    MissingHeader {
        source_type: SourceType,
        missing: Vec<String>,
    },

    #[error("{source_type} row {row_number}: {cause} (line: {raw_line})")]
    RowParse {
        source_type: SourceType,
        row_number: usize,
        raw_line: String,
        cause: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    /// Validation problems with the uploaded file, as opposed to infrastructure failures
    pub fn is_validation(&self) -> bool {
        !matches!(self, IngestError::Database(_))
    }
}

/// Why a merge step could not be applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepFailure {
    #[error("unknown canonical column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("duplicate facility code '{0}'")]
    DuplicateKey(String),

    #[error("approved roster row without a facility code")]
    MissingKey,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Merge step '{step}' failed: {cause}")]
pub struct MergeStepError {
    pub step: &'static str,
    pub cause: StepFailure,
}

impl MergeStepError {
    pub fn new(step: &'static str, cause: StepFailure) -> Self {
        MergeStepError { step, cause }
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Merge(#[from] MergeStepError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Bulk-load failures against the target store
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Target connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Target schema error on {table}: {reason}")]
    Schema { table: String, reason: String },

    #[error("Batch {batch_index} failed: {cause}")]
    Batch {
        batch_index: usize,
        #[source]
        cause: sqlx::Error,
    },
}
