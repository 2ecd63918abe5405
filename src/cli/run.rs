use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::environment::GitFetcher;
use crate::pipeline::{Pipeline, RunSummary};
use crate::process::SystemRunner;
use crate::reporter::HttpReporter;

/// Load configuration, apply CLI overrides, and run the full pipeline.
pub async fn run(
    config_path: Option<String>,
    track_override: Option<String>,
    workdir: Option<String>,
    task_id_override: Option<String>,
) -> Result<RunSummary> {
    let mut config = Config::load_with_path(config_path)?;
    apply_overrides(&mut config, track_override, task_id_override)?;

    let workdir = resolve_workdir(workdir);

    let timeout = config
        .callback
        .timeout_secs
        .map(std::time::Duration::from_secs);
    let reporter = HttpReporter::new(
        config.callback.base_url.clone(),
        config.callback.auth_token()?,
        timeout,
    )?;

    let pipeline = Pipeline::new(&config, &workdir, &SystemRunner, &GitFetcher, &reporter)?;
    let summary = pipeline.run().await?;
    Ok(summary)
}

/// `--workdir` when given, the current directory otherwise.
fn resolve_workdir(workdir_override: Option<String>) -> PathBuf {
    match workdir_override {
        Some(workdir) => {
            info!("CLI override: workdir = {}", workdir);
            PathBuf::from(workdir)
        }
        None => PathBuf::from("."),
    }
}

pub(crate) fn apply_overrides(
    config: &mut Config,
    track_override: Option<String>,
    task_id_override: Option<String>,
) -> Result<()> {
    if let Some(track) = track_override {
        info!("CLI override: track = {}", track);
        config.track.preset = track.parse()?;
    }
    if let Some(task_id) = task_id_override {
        info!("CLI override: task_id = {}", task_id);
        config.callback.task_id = task_id;
    }
    Ok(())
}
