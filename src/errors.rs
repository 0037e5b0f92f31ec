//! Centralized error handling for the DELGA launcher.
//!
//! All fallible operations in the launcher backend return [`LauncherError`],
//! which groups failures into the small set of kinds the rest of the code
//! dispatches on: malformed manifests, missing artifacts, I/O failures,
//! protocol violations on the engine pipe, out-of-sequence commands and
//! unresolvable patch dependencies.

use std::io;
use thiserror::Error;

/// Main error type for the DELGA launcher.
#[derive(Error, Debug)]
pub enum LauncherError {
    /// Manifest or config XML is malformed or misses a mandatory field.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A UUID, named profile, module or file is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Disk or pipe operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A pipe reply did not arrive, had the wrong shape or carried a failure
    /// status.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command was issued out of sequence (e.g. writing to a read-only
    /// container, starting an already running game).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Patch prerequisites could not be satisfied.
    #[error("Unresolved dependency: {0}")]
    DependencyUnresolved(String),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Logging initialization error: {0}")]
    Logging(#[from] log::SetLoggerError),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    /// Create a new invalid-format error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        LauncherError::InvalidFormat(msg.into())
    }

    /// Create a new not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        LauncherError::NotFound(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        LauncherError::Protocol(msg.into())
    }

    /// Create a new invalid-state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        LauncherError::InvalidState(msg.into())
    }
}
