use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::integrity::ExpectedDigests;
use crate::verdict::{VerdictPattern, JEST_SUMMARY, PYTEST_TRAILER};

/// Per-repo config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "validator.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub track: TrackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Endpoint receiving the POST
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub task_id: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
    /// HTTP deadline in seconds; unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            task_id: String::new(),
            auth_token_env: default_auth_token_env(),
            timeout_secs: None,
        }
    }
}

impl CallbackConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn auth_token(&self) -> Result<crate::util::SecretString> {
        match std::env::var(&self.auth_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.into()),
            _ => Err(Error::Config(format!(
                "auth token not found in environment variable: {}",
                self.auth_token_env
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// YAML file carrying the submitter's `user_token`
    #[serde(default = "default_credentials_filename")]
    pub filename: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            filename: default_credentials_filename(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_tests_dir")]
    pub tests_dir: String,
    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: String,
    /// Expected `h1:` digest of the archived tests directory
    #[serde(default)]
    pub tree_digest: String,
    /// Expected SHA-256 hex digest of the pipeline file
    #[serde(default)]
    pub pipeline_digest: String,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            tests_dir: default_tests_dir(),
            pipeline_file: default_pipeline_file(),
            tree_digest: String::new(),
            pipeline_digest: String::new(),
        }
    }
}

/// Environment variables describing the submission under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_repo_env")]
    pub repo_env: String,
    #[serde(default = "default_ref_env")]
    pub ref_env: String,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            repo_env: default_repo_env(),
            ref_env: default_ref_env(),
        }
    }
}

/// Built-in grading tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPreset {
    #[default]
    Pytest,
    Yarn,
    /// Integrity check and callback only, no test run
    Callback,
}

impl TrackPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackPreset::Pytest => "pytest",
            TrackPreset::Yarn => "yarn",
            TrackPreset::Callback => "callback",
        }
    }
}

impl fmt::Display for TrackPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pytest" => Ok(TrackPreset::Pytest),
            "yarn" => Ok(TrackPreset::Yarn),
            "callback" => Ok(TrackPreset::Callback),
            other => Err(Error::Config(format!(
                "unknown track '{}' (expected pytest, yarn or callback)",
                other
            ))),
        }
    }
}

/// Track section as written in the config file. Every field except
/// `preset` overrides the preset's value when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackConfig {
    #[serde(default)]
    pub preset: TrackPreset,
    #[serde(default)]
    pub test_command: Option<Vec<String>>,
    #[serde(default)]
    pub install_command: Option<Vec<String>>,
    #[serde(default)]
    pub dependency_manifest: Option<String>,
    #[serde(default)]
    pub test_asset_dir: Option<String>,
    #[serde(default)]
    pub verdict_pattern: Option<String>,
    #[serde(default)]
    pub reference_repo: Option<String>,
    #[serde(default)]
    pub reference_ref: Option<String>,
    #[serde(default)]
    pub report_submission: Option<bool>,
    #[serde(default)]
    pub install_timeout_secs: Option<u64>,
    /// Checked from the transfer progress callback, so it bounds the object
    /// download only. A clone stalled while connecting or negotiating refs is
    /// left to libgit2's own socket timeouts.
    #[serde(default)]
    pub clone_timeout_secs: Option<u64>,
    #[serde(default)]
    pub test_timeout_secs: Option<u64>,
}

/// Dependency installation, run only when `manifest` exists.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallStep {
    pub manifest: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSource {
    pub repo: String,
    pub git_ref: Option<String>,
}

/// Resolved track descriptor driving the pipeline.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub install: Option<InstallStep>,
    pub reference: Option<ReferenceSource>,
    pub test_asset_dir: String,
    /// `None` for tracks that only verify integrity and report
    pub test_command: Option<Vec<String>>,
    pub verdict_pattern: VerdictPattern,
    pub report_submission: bool,
    pub install_timeout: Option<Duration>,
    pub clone_timeout: Option<Duration>,
    pub test_timeout: Option<Duration>,
}

impl TrackConfig {
    /// Merge the overrides onto the preset and compile the verdict pattern.
    pub fn resolve(&self, tests_dir: &str) -> Result<Track> {
        let (install, test_command, pattern, report_submission) = match self.preset {
            TrackPreset::Pytest => (
                Some(InstallStep {
                    manifest: "requirements.txt".to_string(),
                    command: argv(&["pip", "install", "-r", "requirements.txt"]),
                }),
                Some(argv(&["pytest"])),
                PYTEST_TRAILER,
                true,
            ),
            TrackPreset::Yarn => (
                Some(InstallStep {
                    manifest: "package.json".to_string(),
                    command: argv(&["yarn", "install"]),
                }),
                Some(argv(&["yarn", "test"])),
                JEST_SUMMARY,
                true,
            ),
            TrackPreset::Callback => (None, None, PYTEST_TRAILER, false),
        };

        let install = match (&self.install_command, install) {
            (Some(command), preset_step) => Some(InstallStep {
                manifest: self
                    .dependency_manifest
                    .clone()
                    .or_else(|| preset_step.map(|s| s.manifest))
                    .ok_or_else(|| {
                        Error::Config(
                            "install_command requires dependency_manifest".to_string(),
                        )
                    })?,
                command: command.clone(),
            }),
            (None, Some(mut step)) => {
                if let Some(manifest) = &self.dependency_manifest {
                    step.manifest = manifest.clone();
                }
                Some(step)
            }
            (None, None) => None,
        };
        if let Some(step) = &install {
            if step.command.is_empty() {
                return Err(Error::Config("install_command must not be empty".to_string()));
            }
        }

        let test_command = self.test_command.clone().or(test_command);
        if matches!(&test_command, Some(cmd) if cmd.is_empty()) {
            return Err(Error::Config("test_command must not be empty".to_string()));
        }

        let pattern_src = self.verdict_pattern.as_deref().unwrap_or(pattern);
        let verdict_pattern = VerdictPattern::new(pattern_src)?;

        let reference = self.reference_repo.as_ref().map(|repo| ReferenceSource {
            repo: repo.clone(),
            git_ref: self.reference_ref.clone(),
        });

        Ok(Track {
            name: self.preset.to_string(),
            install,
            reference,
            test_asset_dir: self
                .test_asset_dir
                .clone()
                .unwrap_or_else(|| tests_dir.to_string()),
            test_command,
            verdict_pattern,
            report_submission: self.report_submission.unwrap_or(report_submission),
            install_timeout: self.install_timeout_secs.map(Duration::from_secs),
            clone_timeout: self.clone_timeout_secs.map(Duration::from_secs),
            test_timeout: self.test_timeout_secs.map(Duration::from_secs),
        })
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_auth_token_env() -> String {
    "LMS_COMPANY_TOKEN".to_string()
}

fn default_credentials_filename() -> String {
    "config.yml".to_string()
}

fn default_tests_dir() -> String {
    "tests".to_string()
}

fn default_pipeline_file() -> String {
    ".github/workflows/pipeline.yml".to_string()
}

fn default_repo_env() -> String {
    "GITHUB_REPOSITORY".to_string()
}

fn default_ref_env() -> String {
    "GITHUB_REF".to_string()
}

impl Config {
    /// Load configuration from a specific path, or use default search paths
    pub fn load_with_path(path: Option<String>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!("Loading config from explicit path: {}", config_path);
            return Self::load_from_path(&config_path);
        }

        if let Ok(config) = Self::load_from_path(CONFIG_FILENAME) {
            debug!("Loaded config from ./{}", CONFIG_FILENAME);
            return Ok(config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir
                .join("submission-validator")
                .join("config.toml");
            if let Ok(config) = Self::load_from_path(&config_path) {
                debug!("Loaded config from {:?}", config_path);
                return Ok(config);
            }
        }

        debug!("Using default config");
        Ok(Self::default())
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("can not read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("can not parse {}: {}", path.display(), e)))
    }

    /// Check required fields and resolve the track.
    pub fn validate(&self) -> Result<Track> {
        if self.callback.base_url.trim().is_empty() {
            return Err(Error::Config("callback.base_url is not set".to_string()));
        }
        if self.callback.task_id.trim().is_empty() {
            return Err(Error::Config("callback.task_id is not set".to_string()));
        }
        if self.credentials.filename.trim().is_empty() {
            return Err(Error::Config("credentials.filename is not set".to_string()));
        }
        self.expected_digests()?;
        self.track.resolve(&self.integrity.tests_dir)
    }

    pub fn expected_digests(&self) -> Result<ExpectedDigests> {
        ExpectedDigests::new(&self.integrity.tree_digest, &self.integrity.pipeline_digest)
    }
}
