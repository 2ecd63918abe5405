//! Submitter credential file.
//!
//! A small YAML document committed next to the submission:
//!
//! ```yaml
//! user_token: 0f1e2d3c
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::util::SecretString;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub user_token: SecretString,
}

impl Credentials {
    /// Parse the credential file, failing when `user_token` is missing or blank.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading credentials from {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Can not parse {}: {}", path.display(), e)))?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        // An empty document deserializes to YAML null rather than a mapping
        let credentials: Credentials = if content.trim().is_empty() {
            Credentials::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Can not parse {}: {}", path.display(), e)))?
        };

        if credentials.user_token.is_blank() {
            return Err(Error::Config(format!(
                "Can not find user_token in {}",
                path.display()
            )));
        }
        Ok(credentials)
    }
}
