pub mod aggregate;
pub mod epoch;
pub mod gmm;
pub mod lda;
pub mod store;

mod utils;

pub use aggregate::{Aggregator, ExecutionStrategy};
pub use epoch::{EpochController, EpochState};
pub use gmm::{GmmFit, GmmModel, GmmTrainer, GmmTrainerBuilder};
pub use lda::{
    AssignedDocument, Document, LdaModel, LdaTrainer, LdaTrainerBuilder, TopicDescription,
};

use std::path::PathBuf;
use thiserror::Error;

/// Integer type of every count stored in a topic model.
pub type Count = u32;

/// Integer type of word and topic identifiers.
pub type WordID = u32;
pub type TopicID = u32;

/// Counts are persisted as signed 32-bit integers by most row stores so this
/// is the default overflow ceiling.
pub const DEFAULT_COUNT_CEILING: Count = i32::MAX as Count;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("empty input: {0}")]
    EmptyInput(&'static str),
    #[error("invalid document {doc_id}: {reason}")]
    InvalidDocument { doc_id: i64, reason: String },
    #[error("word id {word_id} of document {doc_id} is outside of the vocabulary (voc_size={voc_size})")]
    WordOutOfVocabulary {
        doc_id: i64,
        word_id: WordID,
        voc_size: usize,
    },
    #[error("vocabulary ids are not contiguous: expected id {expected}, found {found}")]
    NonContiguousVocabulary { expected: WordID, found: WordID },
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("count overflow: {what} exceeds the ceiling of {ceiling}")]
    CountOverflow { what: &'static str, ceiling: Count },
    #[error("covariance matrix is not positive definite")]
    SingularCovariance,
    #[error("the density of every cluster vanishes at point {0:?}")]
    VanishingDensity(Vec<f64>),
    #[error("output {0:?} already exists")]
    OutputExists(PathBuf),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{path:?}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
