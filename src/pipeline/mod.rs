//! The validation recipe shared by every track.
//!
//! Stages run strictly in order and the first error ends the run:
//!
//! 1. read the credential file
//! 2. verify the tests directory and pipeline file digests
//! 3. prepare the environment (tracks with a test command)
//! 4. run the tests and parse the verdict (tracks with a test command)
//! 5. POST the result callback

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, Track};
use crate::credentials::Credentials;
use crate::environment::{exit_label, EnvironmentPreparer, ReferenceFetcher};
use crate::error::{Error, Result};
use crate::integrity::{ComputedDigests, IntegrityGate};
use crate::process::{CommandRunner, Invocation};
use crate::reporter::{CallbackPayload, ResultReporter, SubmissionInfo};
use crate::verdict::Verdict;

/// What a successful run verified.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub track: String,
    pub digests: ComputedDigests,
    /// `None` for tracks without a test command
    pub verdict: Option<Verdict>,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    track: Track,
    workdir: PathBuf,
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn ReferenceFetcher,
    reporter: &'a dyn ResultReporter,
}

impl<'a> Pipeline<'a> {
    /// Validate `config` and bind the collaborators.
    pub fn new(
        config: &'a Config,
        workdir: &Path,
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn ReferenceFetcher,
        reporter: &'a dyn ResultReporter,
    ) -> Result<Self> {
        let track = config.validate()?;
        Ok(Self {
            config,
            track,
            workdir: workdir.to_path_buf(),
            runner,
            fetcher,
            reporter,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        info!("Validating submission with the {} track", self.track.name);

        let credentials =
            Credentials::load(self.workdir.join(&self.config.credentials.filename))?;
        info!("✓ Credentials loaded from {}", self.config.credentials.filename);

        let expected = self.config.expected_digests()?;
        let digests =
            IntegrityGate::new(&self.workdir, &self.config.integrity).verify(&expected)?;

        let verdict = match &self.track.test_command {
            Some(command) => {
                EnvironmentPreparer::new(&self.workdir, &self.track, self.runner, self.fetcher)
                    .prepare()?;
                Some(self.run_tests(command)?)
            }
            None => {
                debug!("Track {} has no test command", self.track.name);
                None
            }
        };

        let extra = if self.track.report_submission {
            SubmissionInfo::from_env(&self.config.submission)
        } else {
            None
        };
        let payload =
            CallbackPayload::new(&self.config.callback.task_id, credentials.user_token, extra);
        self.reporter.submit(&payload).await?;

        Ok(RunSummary {
            track: self.track.name.clone(),
            digests,
            verdict,
        })
    }

    fn run_tests(&self, command: &[String]) -> Result<Verdict> {
        let invocation = Invocation::from_argv(command, &self.workdir)
            .ok_or_else(|| Error::Process("test command is empty".to_string()))?;
        info!("Running tests: {}", invocation.display());

        let output = self
            .runner
            .run(&invocation, self.track.test_timeout)
            .map_err(|e| Error::Process(format!("`{}`: {:#}", invocation.display(), e)))?;
        debug!("{}", output.combined);

        // A failing run still prints a summary; only a silent failure is a process error
        if !output.success() && output.combined.trim().is_empty() {
            return Err(Error::Process(format!(
                "`{}` exited with {} without output",
                invocation.display(),
                exit_label(output.code)
            )));
        }

        let verdict = self.track.verdict_pattern.parse(&output.combined)?;
        info!("Test summary: {}", verdict);
        let verdict = verdict.into_result()?;
        info!("✓ All tests passed");
        Ok(verdict)
    }
}
