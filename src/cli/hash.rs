use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::integrity::{ComputedDigests, IntegrityGate};

/// Compute the digests of the current checkout and print them as a TOML
/// fragment ready to paste into the `[integrity]` section.
pub fn run(
    config_path: Option<String>,
    workdir: Option<String>,
    tests_dir: Option<String>,
    pipeline_file: Option<String>,
) -> Result<()> {
    let digests = compute(config_path, workdir, tests_dir, pipeline_file)?;
    println!("{}", render(&digests));
    Ok(())
}

fn compute(
    config_path: Option<String>,
    workdir: Option<String>,
    tests_dir: Option<String>,
    pipeline_file: Option<String>,
) -> Result<ComputedDigests> {
    let mut config = Config::load_with_path(config_path)?;
    if let Some(dir) = tests_dir {
        info!("CLI override: tests_dir = {}", dir);
        config.integrity.tests_dir = dir;
    }
    if let Some(file) = pipeline_file {
        info!("CLI override: pipeline_file = {}", file);
        config.integrity.pipeline_file = file;
    }

    let workdir = workdir.unwrap_or_else(|| ".".to_string());
    let gate = IntegrityGate::new(Path::new(&workdir), &config.integrity);
    Ok(gate.compute()?)
}

fn render(digests: &ComputedDigests) -> String {
    format!(
        "tree_digest = \"{}\"\npipeline_digest = \"{}\"",
        digests.tree, digests.pipeline
    )
}
