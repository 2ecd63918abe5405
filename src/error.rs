//! Error taxonomy for a validation run.
//!
//! Every variant is terminal: the first error raised by any stage aborts the
//! run and prevents every later stage, including the result callback.

use std::path::Path;
use thiserror::Error;

use crate::verdict::Verdict;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration or credential file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure while archiving or hashing.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The archive could not be written or read back.
    #[error("archive error: {0}")]
    Archive(String),

    /// A computed digest does not match its expected value.
    #[error("{subject} has been modified. Please restore it to original state.")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Dependency install, reference clone, or test-asset swap failed.
    #[error("environment setup failed: {0}")]
    Env(String),

    /// The test command could not run to completion.
    #[error("test process failed: {0}")]
    Process(String),

    /// The test command produced output without a recognizable trailer line.
    #[error("unparseable test output: {0}")]
    Verdict(String),

    /// The trailer was parsed and the run is not a pass.
    #[error("tests did not pass: {0}")]
    TestsFailed(Verdict),

    /// The callback could not be delivered or was rejected.
    #[error("can not submit results: {0}")]
    Report(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// I/O error annotated with the path being touched.
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("{} {}", action, path.display()), source)
    }

    /// Name of the pipeline stage that raised this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io { .. } | Error::Archive(_) => "io",
            Error::Integrity { .. } => "integrity",
            Error::Env(_) => "environment",
            Error::Process(_) | Error::TestsFailed(_) => "tests",
            Error::Verdict(_) => "verdict",
            Error::Report(_) => "report",
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Archive(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
