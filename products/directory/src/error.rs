use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures while building a [`Directory`](crate::Directory) from its source.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("employee directory {} is unavailable: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("employee directory {} is malformed: {reason}", path.display())]
    SourceMalformed { path: PathBuf, reason: String },
}

/// Input rejected before any lookup is attempted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("employee id must be at least {min} characters (got {actual})")]
    TooShort { min: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
