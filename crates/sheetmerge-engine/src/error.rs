use sheetmerge_io::IoError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure that aborts the merge of one sheet. Other sheets continue.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("column count mismatch: master region has {master}, sub-table has {sub}")]
    SchemaMismatch { master: usize, sub: usize },

    #[error("master data region has no columns")]
    NoDataColumns,

    #[error("sheet '{0}' not found in master workbook")]
    MissingSheet(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("malformed table: {0}")]
    Table(String),
}

impl From<IoError> for MergeError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::SheetNotFound(name) => MergeError::MissingSheet(name),
            other => MergeError::Backend(other.to_string()),
        }
    }
}

/// One problem found while validating a [`crate::MergeConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {}", format_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

impl ConfigError {
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            ConfigError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Both the in-place save and the copy-based fallback failed.
#[derive(Debug, Error)]
#[error("save failed ({primary}); fallback to {} failed ({fallback})", .fallback_path.display())]
pub struct PersistenceError {
    pub primary: String,
    pub fallback_path: PathBuf,
    pub fallback: String,
}

/// Failure of a whole run. Per-sheet failures are reported, not returned.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot open master workbook {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
