use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// How a failed formula write should be treated by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteErrorKind {
    /// Timeout-like; the same write may succeed if retried or made smaller.
    Transient,
    /// Retrying cannot help (e.g. an unreachable external workbook).
    Permanent,
}

impl fmt::Display for WriteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteErrorKind::Transient => write!(f, "transient"),
            WriteErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} write failure: {message}")]
pub struct WriteError {
    pub kind: WriteErrorKind,
    pub message: String,
}

impl WriteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: WriteErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: WriteErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == WriteErrorKind::Transient
    }

    /// Classify a backend message: timeouts are transient, everything else
    /// (missing workbooks, broken references, unknown failures) is permanent.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let transient = [
            "timed out",
            "timeout",
            "busy",
            "temporarily unavailable",
            "oserror: -1712",
        ]
            .iter()
            .any(|needle| lower.contains(needle));
        if transient {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                Self::transient(err.to_string())
            }
            _ => Self::permanent(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("sheet '{0}' not found")]
    SheetNotFound(String),

    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("file error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl IoError {
    pub fn from_backend<E: std::fmt::Display>(backend: &'static str, err: E) -> Self {
        IoError::Backend {
            backend,
            message: err.to_string(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IoError::File {
            path: path.into(),
            source,
        }
    }
}

/// Failure to turn a sub-table file into a [`sheetmerge_common::Table`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("cannot decode {path} as {encoding}")]
    Decode { path: PathBuf, encoding: &'static str },

    #[error("invalid csv in {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("invalid spreadsheet {path}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    #[error("{path} contains no worksheets")]
    NoWorksheet { path: PathBuf },
}
