use anyhow::Result;
use std::env;
use std::path::Path;
use std::process::Command;

use crate::config::{Config, Track};
use crate::credentials::Credentials;

struct CheckResult {
    passed: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl CheckResult {
    fn new() -> Self {
        Self {
            passed: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn pass(&mut self, msg: impl Into<String>) {
        self.passed.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }
}

pub fn run(config_path: Option<String>, workdir: Option<String>) -> Result<()> {
    let mut results = CheckResult::new();
    let workdir = workdir.unwrap_or_else(|| ".".to_string());
    let workdir = Path::new(&workdir);

    // 1. Load config
    let config = match Config::load_with_path(config_path.clone()) {
        Ok(config) => {
            let source = config_path.as_deref().unwrap_or("default search path");
            results.pass(format!("Config loaded from {}", source));
            config
        }
        Err(e) => {
            // Diagnostic command: report and return Ok so the error is not printed twice
            results.error(format!("Failed to load config: {}", e));
            print_results(&results);
            return Ok(());
        }
    };

    // 2. Callback endpoint and token
    if config.callback.base_url.trim().is_empty() {
        results.error("callback.base_url is not set");
    } else {
        results.pass(format!("Callback URL: {}", config.callback.base_url));
    }
    if config.callback.task_id.trim().is_empty() {
        results.error("callback.task_id is not set");
    } else {
        results.pass(format!("Task id: {}", config.callback.task_id));
    }
    check_token_env(&config.callback.auth_token_env, &mut results);

    // 3. Expected digests
    match config.expected_digests() {
        Ok(_) => results.pass("Expected digests are well-formed"),
        Err(e) => results.error(e.to_string()),
    }

    // 4. Track
    let track = match config.track.resolve(&config.integrity.tests_dir) {
        Ok(track) => {
            results.pass(format!("Track: {}", track.name));
            Some(track)
        }
        Err(e) => {
            results.error(format!("Track: {}", e));
            None
        }
    };
    if let Some(track) = &track {
        check_track(track, workdir, &mut results);
    }

    // 5. Files the run will read
    let credentials_path = workdir.join(&config.credentials.filename);
    match Credentials::load(&credentials_path) {
        Ok(_) => results.pass(format!("Credentials: {} has a user_token", config.credentials.filename)),
        Err(e) => results.error(format!("Credentials: {}", e)),
    }
    if workdir.join(&config.integrity.tests_dir).is_dir() {
        results.pass(format!("Tests directory: {}", config.integrity.tests_dir));
    } else {
        results.error(format!(
            "Directory '{}' does not exist",
            config.integrity.tests_dir
        ));
    }
    if workdir.join(&config.integrity.pipeline_file).is_file() {
        results.pass(format!("Pipeline file: {}", config.integrity.pipeline_file));
    } else {
        results.error(format!(
            "Pipeline file '{}' does not exist",
            config.integrity.pipeline_file
        ));
    }

    print_results(&results);

    if !results.errors.is_empty() {
        anyhow::bail!("{} config error(s) found", results.errors.len());
    }

    Ok(())
}

fn check_track(track: &Track, workdir: &Path, results: &mut CheckResult) {
    let Some(command) = &track.test_command else {
        results.pass("No test command (integrity check and callback only)");
        return;
    };

    if let Some(program) = command.first() {
        if check_program_available(program) {
            results.pass(format!("Test runner: {} (available)", program));
        } else {
            results.error(format!(
                "Test runner '{}' not found, the test stage will fail",
                program
            ));
        }
    }

    if let Some(install) = &track.install {
        if workdir.join(&install.manifest).exists() {
            results.pass(format!("Dependency manifest: {}", install.manifest));
        } else {
            results.warn(format!(
                "{} not found, dependency install will be skipped",
                install.manifest
            ));
        }
    }

    match &track.reference {
        Some(reference) => results.pass(format!("Reference repository: {}", reference.repo)),
        None => results.warn(format!(
            "No reference repository, tests run against the local {}",
            track.test_asset_dir
        )),
    }

    if track.test_timeout.is_none() {
        results.warn("No test timeout, a hanging test run blocks the job until CI kills it");
    }
}

fn check_token_env(env_var: &str, results: &mut CheckResult) {
    match env::var(env_var) {
        Ok(v) if !v.trim().is_empty() => {
            results.pass(format!("Auth token: {} is set", env_var));
        }
        Ok(_) => results.error(format!("Auth token: {} is set but empty", env_var)),
        Err(_) => results.error(format!("Auth token: {} is not set", env_var)),
    }
}

fn check_program_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn print_results(results: &CheckResult) {
    println!();
    for msg in &results.passed {
        println!("  \u{2713} {}", msg);
    }
    for msg in &results.warnings {
        println!("  ! {}", msg);
    }
    for msg in &results.errors {
        println!("  \u{2717} {}", msg);
    }
    println!();
    println!(
        "{} passed, {} warnings, {} errors",
        results.passed.len(),
        results.warnings.len(),
        results.errors.len()
    );
}
