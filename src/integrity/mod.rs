//! Tamper detection for the tests directory and the pipeline file.

pub mod archive;
pub mod hasher;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::IntegrityConfig;
use crate::error::{Error, Result};
pub use archive::Archive;
pub use hasher::{hash_dir, hash_file, hash_tree};

/// Reference digests baked into configuration at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigests {
    tree: String,
    pipeline: String,
}

impl ExpectedDigests {
    /// Validate and normalize both digests.
    ///
    /// The tree digest must be `h1:` followed by the base64 of 32 bytes; the
    /// pipeline digest must be 64 hex characters, optionally `sha256:`-prefixed.
    pub fn new(tree: &str, pipeline: &str) -> Result<Self> {
        let tree = tree.trim();
        let decoded = tree
            .strip_prefix(hasher::H1_PREFIX)
            .and_then(|b64| STANDARD.decode(b64).ok());
        if !matches!(decoded, Some(ref bytes) if bytes.len() == 32) {
            return Err(Error::Config(format!(
                "integrity.tree_digest must be an h1: digest, got '{}'",
                tree
            )));
        }

        let pipeline = pipeline.trim();
        let pipeline = pipeline.strip_prefix("sha256:").unwrap_or(pipeline);
        if pipeline.len() != 64 || !pipeline.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Config(format!(
                "integrity.pipeline_digest must be 64 hex characters, got '{}'",
                pipeline
            )));
        }

        Ok(Self {
            tree: tree.to_string(),
            pipeline: pipeline.to_ascii_lowercase(),
        })
    }

    pub fn tree(&self) -> &str {
        &self.tree
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}

/// Digests computed from the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedDigests {
    pub tree: String,
    pub pipeline: String,
}

/// Hashes the tests directory and pipeline file under a working directory.
pub struct IntegrityGate {
    tests_dir: PathBuf,
    tests_dir_name: String,
    pipeline_file: PathBuf,
    pipeline_file_name: String,
}

impl IntegrityGate {
    pub fn new(workdir: &Path, config: &IntegrityConfig) -> Self {
        Self {
            tests_dir: workdir.join(&config.tests_dir),
            tests_dir_name: config.tests_dir.clone(),
            pipeline_file: workdir.join(&config.pipeline_file),
            pipeline_file_name: config.pipeline_file.clone(),
        }
    }

    /// Digest of the archived tests directory.
    pub fn tree_digest(&self) -> Result<String> {
        if !self.tests_dir.is_dir() {
            return Err(Error::io(
                format!("archiving {}", self.tests_dir_name),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Directory '{}' does not exist", self.tests_dir_name),
                ),
            ));
        }
        let archive = Archive::create(&self.tests_dir)?;
        debug!("Hashing {} archived files", archive.entries());
        hash_tree(archive.path())
    }

    pub fn pipeline_digest(&self) -> Result<String> {
        hash_file(&self.pipeline_file)
    }

    pub fn compute(&self) -> Result<ComputedDigests> {
        Ok(ComputedDigests {
            tree: self.tree_digest()?,
            pipeline: self.pipeline_digest()?,
        })
    }

    /// Compare both digests against `expected`. The tree is checked first and
    /// a mismatch there stops before the pipeline file is read.
    pub fn verify(&self, expected: &ExpectedDigests) -> Result<ComputedDigests> {
        let tree = self.tree_digest()?;
        if tree != expected.tree() {
            return Err(Error::Integrity {
                subject: format!("Directory {}", self.tests_dir_name),
                expected: expected.tree().to_string(),
                actual: tree,
            });
        }
        info!("✓ Directory {} is unmodified", self.tests_dir_name);

        let pipeline = self.pipeline_digest()?;
        if pipeline != expected.pipeline() {
            return Err(Error::Integrity {
                subject: format!("File {}", self.pipeline_file_name),
                expected: expected.pipeline().to_string(),
                actual: pipeline,
            });
        }
        info!("✓ File {} is unmodified", self.pipeline_file_name);

        Ok(ComputedDigests { tree, pipeline })
    }
}
