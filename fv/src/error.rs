use std::path::PathBuf;

use crate::{DimensionSet, Float};

/// Errors raised while setting up or running a finite-volume calculation.
///
/// Setup errors (missing entries, unknown types, dimension mismatches) are reported before any
/// work is done on the affected equation.
#[derive(Debug, thiserror::Error)]
pub enum FvError {
    #[error("entry '{key}' not found in {dictionary}")]
    MissingEntry { dictionary: String, key: String },
    #[error("invalid entry '{key}' in {dictionary}: {message}")]
    InvalidEntry {
        dictionary: String,
        key: String,
        message: String,
    },
    #[error("unknown {kind} type '{name}', valid types are {valid:?}")]
    UnknownType {
        kind: &'static str,
        name: String,
        valid: Vec<String>,
    },
    #[error("dimensions {left} and {right} differ for operation {operation}")]
    DimensionMismatch {
        operation: String,
        left: DimensionSet,
        right: DimensionSet,
    },
    #[error("equation for {field} has no contributions")]
    EmptyEquation { field: String },
    #[error("{what} refers to mesh generation {expected} but the mesh is at generation {actual}")]
    StaleTopology {
        what: String,
        expected: u64,
        actual: u64,
    },
    #[error("equation for {matrix} cannot be solved for field {field}")]
    FieldMismatch { matrix: String, field: String },
    #[error("size of {what} is {actual}, expected {expected}")]
    SizeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },
    #[error("{operation} is not supported by {type_name} patch field on patch {patch}")]
    Unsupported {
        operation: &'static str,
        type_name: &'static str,
        patch: String,
    },
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    #[error(
        "{solver} failed to converge for {field}: final residual {final_residual:e} after \
         {iterations} iterations"
    )]
    NotConverged {
        solver: String,
        field: String,
        final_residual: Float,
        iterations: usize,
    },
    #[error("singular matrix in {0}")]
    Singular(String),
    #[error("communication failure: {0}")]
    Parallel(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type FvResult<T> = Result<T, FvError>;

impl FvError {
    pub fn missing(dictionary: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingEntry {
            dictionary: dictionary.into(),
            key: key.into(),
        }
    }

    pub fn invalid(
        dictionary: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidEntry {
            dictionary: dictionary.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn size_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
