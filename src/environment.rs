//! Working-tree preparation before the test run.
//!
//! Installs the track's dependencies when its manifest is present, then
//! swaps the local test-asset directory for the copy held in the reference
//! repository.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ReferenceSource, Track};
use crate::error::{Error, Result};
use crate::process::{CommandRunner, Invocation};
use crate::util::tail_lines;

/// Lines of subprocess output kept in an error message.
const OUTPUT_TAIL_LINES: usize = 30;

pub trait ReferenceFetcher: Send + Sync {
    /// Check out `source` into `dest`, which must not exist yet.
    fn fetch(
        &self,
        source: &ReferenceSource,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> anyhow::Result<()>;
}

/// Clones reference repositories with libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitFetcher;

impl ReferenceFetcher for GitFetcher {
    fn fetch(
        &self,
        source: &ReferenceSource,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> anyhow::Result<()> {
        let mut callbacks = git2::RemoteCallbacks::new();
        if let Some(timeout) = timeout {
            // Returning false from the progress callback aborts the transfer.
            // The callback only fires once objects flow, so connect and ref
            // negotiation are not covered.
            let deadline = Instant::now() + timeout;
            callbacks.transfer_progress(move |_| Instant::now() < deadline);
        }
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(git_ref) = &source.git_ref {
            builder.branch(git_ref);
        }

        let repo = builder.clone(&source.repo, dest)?;
        debug!("Cloned {} into {}", source.repo, repo.path().display());
        Ok(())
    }
}

pub struct EnvironmentPreparer<'a> {
    workdir: &'a Path,
    track: &'a Track,
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn ReferenceFetcher,
}

impl<'a> EnvironmentPreparer<'a> {
    pub fn new(
        workdir: &'a Path,
        track: &'a Track,
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn ReferenceFetcher,
    ) -> Self {
        Self {
            workdir,
            track,
            runner,
            fetcher,
        }
    }

    pub fn prepare(&self) -> Result<()> {
        self.install_dependencies()?;
        self.replace_test_assets()
    }

    fn install_dependencies(&self) -> Result<()> {
        let Some(step) = &self.track.install else {
            return Ok(());
        };
        if !self.workdir.join(&step.manifest).exists() {
            info!("No {} found, skipping dependency install", step.manifest);
            return Ok(());
        }

        let invocation = Invocation::from_argv(&step.command, self.workdir)
            .ok_or_else(|| Error::Env("install command is empty".to_string()))?;
        info!("Installing dependencies: {}", invocation.display());

        let output = self
            .runner
            .run(&invocation, self.track.install_timeout)
            .map_err(|e| Error::Env(format!("`{}`: {:#}", invocation.display(), e)))?;
        debug!("{}", output.combined);

        if !output.success() {
            return Err(Error::Env(format!(
                "`{}` exited with {}:\n{}",
                invocation.display(),
                exit_label(output.code),
                tail_lines(&output.combined, OUTPUT_TAIL_LINES)
            )));
        }
        info!("✓ Dependencies installed");
        Ok(())
    }

    fn replace_test_assets(&self) -> Result<()> {
        let Some(reference) = &self.track.reference else {
            warn!(
                "No reference repository configured, keeping local {}",
                self.track.test_asset_dir
            );
            return Ok(());
        };

        // Clone inside the working tree so the final move is a rename on one filesystem
        let scratch = tempfile::Builder::new()
            .prefix(".reference-")
            .tempdir_in(self.workdir)
            .map_err(|e| Error::Env(format!("can not create clone directory: {}", e)))?;
        let checkout = scratch.path().join("repo");

        info!("Cloning reference repository {}", reference.repo);
        self.fetcher
            .fetch(reference, &checkout, self.track.clone_timeout)
            .map_err(|e| Error::Env(format!("can not clone {}: {:#}", reference.repo, e)))?;

        let source = checkout.join(&self.track.test_asset_dir);
        if !source.is_dir() {
            return Err(Error::Env(format!(
                "reference repository {} has no '{}' directory",
                reference.repo, self.track.test_asset_dir
            )));
        }

        let target = self.workdir.join(&self.track.test_asset_dir);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| {
                Error::Env(format!("can not remove {}: {}", target.display(), e))
            })?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Env(format!("can not create {}: {}", parent.display(), e))
            })?;
        }
        fs::rename(&source, &target).map_err(|e| {
            Error::Env(format!(
                "can not move {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;

        info!(
            "✓ Replaced {} with the reference copy",
            self.track.test_asset_dir
        );
        Ok(())
    }
}

pub(crate) fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::process::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeRunner {
        code: Option<i32>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl FakeRunner {
        fn exiting(code: i32) -> Self {
            Self {
                code: Some(code),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(
            &self,
            invocation: &Invocation,
            _timeout: Option<Duration>,
        ) -> anyhow::Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(CommandOutput {
                code: self.code,
                combined: "Collecting requests\nERROR: no matching distribution\n".to_string(),
            })
        }
    }

    /// Writes a fixed tree instead of cloning.
    struct FakeFetcher {
        files: Vec<(&'static str, &'static str)>,
    }

    impl ReferenceFetcher for FakeFetcher {
        fn fetch(
            &self,
            _source: &ReferenceSource,
            dest: &Path,
            _timeout: Option<Duration>,
        ) -> anyhow::Result<()> {
            for (name, content) in &self.files {
                let path = dest.join(name);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, content)?;
            }
            Ok(())
        }
    }

    struct FailingFetcher;

    impl ReferenceFetcher for FailingFetcher {
        fn fetch(&self, _: &ReferenceSource, _: &Path, _: Option<Duration>) -> anyhow::Result<()> {
            anyhow::bail!("authentication required")
        }
    }

    fn track_with_reference() -> Track {
        let config = TrackConfig {
            reference_repo: Some("https://example.org/reference.git".to_string()),
            ..TrackConfig::default()
        };
        config.resolve("tests").unwrap()
    }

    #[test]
    fn test_install_skipped_without_manifest() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::exiting(0);
        let track = TrackConfig::default().resolve("tests").unwrap();
        let fetcher = FakeFetcher { files: vec![] };

        EnvironmentPreparer::new(dir.path(), &track, &runner, &fetcher)
            .prepare()
            .unwrap();
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_install_runs_when_manifest_present() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "pytest\n").unwrap();
        let runner = FakeRunner::exiting(0);
        let track = TrackConfig::default().resolve("tests").unwrap();
        let fetcher = FakeFetcher { files: vec![] };

        EnvironmentPreparer::new(dir.path(), &track, &runner, &fetcher)
            .prepare()
            .unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].display(), "pip install -r requirements.txt");
        assert_eq!(calls[0].cwd, dir.path());
    }

    #[test]
    fn test_install_failure_is_env_error_with_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "nope\n").unwrap();
        let runner = FakeRunner::exiting(1);
        let track = TrackConfig::default().resolve("tests").unwrap();
        let fetcher = FakeFetcher { files: vec![] };

        let err = EnvironmentPreparer::new(dir.path(), &track, &runner, &fetcher)
            .prepare()
            .unwrap_err();
        assert_eq!(err.stage(), "environment");
        assert!(err.to_string().contains("exit code 1"));
        assert!(err.to_string().contains("no matching distribution"));
    }

    #[test]
    fn test_replaces_local_tests_with_reference() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests").join("test_student.py"), "assert True").unwrap();

        let runner = FakeRunner::exiting(0);
        let fetcher = FakeFetcher {
            files: vec![
                ("tests/test_ref.py", "def test_ref(): pass\n"),
                ("README.md", "reference"),
            ],
        };
        let track = track_with_reference();

        EnvironmentPreparer::new(dir.path(), &track, &runner, &fetcher)
            .prepare()
            .unwrap();

        assert!(!dir.path().join("tests").join("test_student.py").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("tests").join("test_ref.py")).unwrap(),
            "def test_ref(): pass\n"
        );
        assert!(!dir.path().join("README.md").exists());
        // Scratch clone is gone
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".reference-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_reference_without_asset_dir() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::exiting(0);
        let fetcher = FakeFetcher {
            files: vec![("src/lib.py", "")],
        };
        let track = track_with_reference();

        let err = EnvironmentPreparer::new(dir.path(), &track, &runner, &fetcher)
            .prepare()
            .unwrap_err();
        assert!(err.to_string().contains("has no 'tests' directory"));
    }

    #[test]
    fn test_clone_failure_keeps_local_tests() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests").join("test_student.py"), "").unwrap();
        let runner = FakeRunner::exiting(0);
        let track = track_with_reference();

        let err = EnvironmentPreparer::new(dir.path(), &track, &runner, &FailingFetcher)
            .prepare()
            .unwrap_err();
        assert!(matches!(err, Error::Env(_)));
        assert!(err.to_string().contains("authentication required"));
        assert!(dir.path().join("tests").join("test_student.py").exists());
    }

    fn committed_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests").join("test_ref.py"), "").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("tests/test_ref.py")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Grader", "grader@example.org").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        dir
    }

    #[test]
    fn test_git_fetcher_clones_within_deadline() {
        let origin = committed_repo();
        let scratch = TempDir::new().unwrap();
        let dest = scratch.path().join("repo");
        let source = ReferenceSource {
            repo: origin.path().to_string_lossy().to_string(),
            git_ref: None,
        };

        GitFetcher
            .fetch(&source, &dest, Some(Duration::from_secs(60)))
            .unwrap();
        assert!(dest.join("tests").join("test_ref.py").is_file());
    }

    #[test]
    fn test_git_fetcher_unknown_branch_fails() {
        let origin = committed_repo();
        let scratch = TempDir::new().unwrap();
        let source = ReferenceSource {
            repo: origin.path().to_string_lossy().to_string(),
            git_ref: Some("no-such-branch".to_string()),
        };
        assert!(GitFetcher
            .fetch(&source, &scratch.path().join("repo"), Some(Duration::from_secs(60)))
            .is_err());
    }

    #[test]
    fn test_exit_label() {
        assert_eq!(exit_label(Some(2)), "exit code 2");
        assert_eq!(exit_label(None), "a signal");
    }
}
