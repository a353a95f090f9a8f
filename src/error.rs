//! Error types for lookup acquisition and merging
//!
//! Per-page and per-source problems that still leave a usable table are NOT
//! errors: they travel as [`SourceFailure`] metadata on the table's provenance.
//! Only total failure or a safety-guard violation surfaces as a [`LookupError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LookupError>;

/// Hard failures surfaced to the caller
#[derive(Debug, Error)]
pub enum LookupError {
    /// A retryable failure (timeout, rate limit, 5xx). Page fetches absorb these;
    /// it only escapes from single-shot requests once retries are exhausted.
    #[error("transient fetch failure for {dataset}: {message}")]
    TransientFetch { dataset: String, message: String },

    #[error("schema mismatch in {dataset}: {message}")]
    SchemaMismatch { dataset: String, message: String },

    #[error("authentication rejected by {source_id}: {message}")]
    Authentication { source_id: String, message: String },

    #[error("dataset not found: {dataset}")]
    DatasetNotFound { dataset: String },

    #[error("refusing to replace local '{geography}' with a partial table ({} failure(s))", .failures.len())]
    StalenessGuardViolation {
        geography: String,
        failures: Vec<SourceFailure>,
    },

    #[error("no lookup tables to merge")]
    EmptyMergeInput,

    #[error("every dataset of {source_id} failed: {}", summarize(.failures))]
    SourceFailed {
        source_id: String,
        failures: Vec<SourceFailure>,
    },

    #[error("no service carries column {column}")]
    ColumnNotFound { column: String },

    #[error("no chain of services joins {start} to {end}")]
    NoConnectingPath { start: String, end: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Infrastructure setup failure, such as building the HTTP client
    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LookupError {
    /// Whether the failure may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Failure kind recorded when this error is absorbed as partial metadata
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::SchemaMismatch { .. } => FailureKind::SchemaMismatch,
            Self::Authentication { .. } => FailureKind::Authentication,
            Self::DatasetNotFound { .. } => FailureKind::DatasetNotFound,
            Self::Cancelled => FailureKind::Cancelled,
            Self::TransientFetch { .. } => FailureKind::TransientExhausted { attempts: 0 },
            _ => FailureKind::Other,
        }
    }
}

impl From<std::io::Error> for LookupError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {}", e))
    }
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Partial-failure metadata
// =============================================================================

/// Why a page, dataset or source did not contribute (all of) its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries for one page ran out; earlier pages were kept
    TransientExhausted { attempts: u32 },
    SchemaMismatch,
    Authentication,
    DatasetNotFound,
    Cancelled,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientExhausted { attempts } => {
                write!(f, "transient (gave up after {} attempts)", attempts)
            }
            Self::SchemaMismatch => write!(f, "schema-mismatch"),
            Self::Authentication => write!(f, "authentication"),
            Self::DatasetNotFound => write!(f, "dataset-not-found"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Position of a failed page within a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub index: usize,
    pub offset: u64,
}

/// One source/dataset/page level failure absorbed during acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub dataset: String,
    #[serde(default)]
    pub page: Option<PageRef>,
    pub kind: FailureKind,
    pub message: String,
}

impl SourceFailure {
    pub fn from_error(source: &str, dataset: &str, error: &LookupError) -> Self {
        Self {
            source: source.to_string(),
            dataset: dataset.to_string(),
            page: None,
            kind: error.failure_kind(),
            message: error.to_string(),
        }
    }

    pub fn at_page(mut self, page: PageRef) -> Self {
        self.page = Some(page);
        self
    }
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.source, self.dataset, self.kind)?;
        if let Some(page) = &self.page {
            write!(f, " at page {} (offset {})", page.index, page.offset)?;
        }
        write!(f, ": {}", self.message)
    }
}
