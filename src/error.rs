//! Error types.

use std::path::PathBuf;

/// Conditions that abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Cannot find the expected directory tree at {path}")]
    RootNotFound { path: PathBuf },

    #[error("Failed to remove the corrected stations directory {path}: {source}")]
    CorrectedAreaReset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open the master configuration file {path}: {source}")]
    MasterOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read the master configuration file at row {row}: {source}")]
    MasterRead {
        row: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Master file row {row}: end of file found while inside quotes")]
    UnterminatedQuote { row: usize },

    #[error("Master file header is missing expected columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Master file header has duplicated column '{0}'")]
    DuplicateColumn(String),

    #[error("{0} not found or invalid in the master file defaults row")]
    InvalidDefault(&'static str),

    #[error("No device configurations read from the master file")]
    NoRecords,
}

/// Per-device failure; counted and reported, never fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Cannot open the station file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML parse failure: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unsupported {0} found")]
    Unsupported(&'static str),

    #[error("unresolvable entity reference: {0}")]
    Entity(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot create the corrected station file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
