use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("malformed line {line} in {path:?}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("{kind} {id} not found")]
    KeyNotFound { kind: &'static str, id: u64 },
    #[error("cannot collate an empty batch")]
    EmptyBatch,
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PrepError>;

impl PrepError {
    pub(crate) fn format(path: &std::path::Path, line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn missing(kind: &'static str, id: impl Into<u64>) -> Self {
        Self::KeyNotFound {
            kind,
            id: id.into(),
        }
    }
}

