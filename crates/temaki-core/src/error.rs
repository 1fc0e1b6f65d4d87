//! Error types and handling for shorthand compilation

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for compilation operations
#[derive(Debug, Error)]
pub enum TemakiError {
    /// Parse errors from shorthand syntax issues
    #[error("Parse error: {message} at {file}:{line}")]
    ParseError {
        message: String,
        file: PathBuf,
        line: usize,
    },

    /// A parent declared on a profile or extension could not be resolved
    #[error("Parent not defined: {parent} (required by {entity})")]
    ParentNotDefined { parent: String, entity: String },

    /// An instance's InstanceOf could not be resolved
    #[error("InstanceOf not defined: {instance_of} (required by {instance})")]
    InstanceOfNotDefined {
        instance_of: String,
        instance: String,
    },

    /// Recursive RuleSet insertion detected
    #[error("Recursive RuleSet insertion detected: {chain}")]
    RecursiveRuleSetInsertion { chain: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system I/O errors
    #[error("IO error for path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Export pipeline errors
    #[error("Export error: {message}")]
    ExportError { message: String },

    /// FHIR definitions cache errors
    #[error("Package load error: {message}")]
    PackageLoad { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// Error kind enumeration for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Resolution,
    Config,
    Io,
    Export,
    PackageLoad,
    Internal,
}

impl TemakiError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TemakiError::ParseError { .. } => ErrorKind::Parse,
            TemakiError::ParentNotDefined { .. } => ErrorKind::Resolution,
            TemakiError::InstanceOfNotDefined { .. } => ErrorKind::Resolution,
            TemakiError::RecursiveRuleSetInsertion { .. } => ErrorKind::Resolution,
            TemakiError::ConfigError { .. } => ErrorKind::Config,
            TemakiError::IoError { .. } => ErrorKind::Io,
            TemakiError::ExportError { .. } => ErrorKind::Export,
            TemakiError::PackageLoad { .. } => ErrorKind::PackageLoad,
            TemakiError::InternalError { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable (the current entity is skipped and
    /// compilation continues with the remaining entities)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse | ErrorKind::Resolution | ErrorKind::Export
        )
    }

    /// Create a parse error
    pub fn parse_error(message: impl Into<String>, file: impl Into<PathBuf>, line: usize) -> Self {
        Self::ParseError {
            message: message.into(),
            file: file.into(),
            line,
        }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Create an export error
    pub fn export_error(message: impl Into<String>) -> Self {
        Self::ExportError {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TemakiError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            path: PathBuf::new(),
            source: err,
        }
    }
}
