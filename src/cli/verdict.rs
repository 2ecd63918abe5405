use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::verdict::Verdict;

/// Parse a saved test-runner log with the track's verdict pattern.
pub fn run(path: String, config_path: Option<String>, track_override: Option<String>) -> Result<()> {
    let verdict = parse_log(&path, config_path, track_override)?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if !verdict.is_success() {
        bail!("tests did not pass: {}", verdict);
    }
    Ok(())
}

fn parse_log(
    path: &str,
    config_path: Option<String>,
    track_override: Option<String>,
) -> Result<Verdict> {
    let file = Path::new(path);
    if !file.is_file() {
        bail!("File not found: {}", path);
    }
    let output =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", path))?;

    let mut config = Config::load_with_path(config_path)?;
    super::run::apply_overrides(&mut config, track_override, None)?;
    let track = config.track.resolve(&config.integrity.tests_dir)?;
    info!("Parsing {} with the {} track pattern", path, track.name);

    Ok(track.verdict_pattern.parse(&output)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(dir: &tempfile::TempDir, content: &str) -> (String, String) {
        let log = dir.path().join("pytest.log");
        fs::write(&log, content).unwrap();
        let config = dir.path().join("validator.toml");
        fs::write(&config, "").unwrap();
        (
            log.to_string_lossy().to_string(),
            config.to_string_lossy().to_string(),
        )
    }

    #[test]
    fn test_run_passing_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let (log, config) = write_log(&dir, "===== 3 passed in 0.12s =====\n");
        assert!(run(log, Some(config), None).is_ok());
    }

    #[test]
    fn test_run_failing_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let (log, config) = write_log(&dir, "===== 1 failed, 3 passed in 0.12s =====\n");
        let err = run(log, Some(config), None).unwrap_err();
        assert!(err.to_string().contains("1 failed"));
    }

    #[test]
    fn test_run_with_track_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let (log, config) = write_log(&dir, "Tests:       2 passed, 2 total\n");
        let verdict = parse_log(&log, Some(config), Some("yarn".into())).unwrap();
        assert_eq!(verdict.passed, Some(2));
    }

    #[test]
    fn test_run_unparseable_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let (log, config) = write_log(&dir, "Segmentation fault\n");
        let err = parse_log(&log, Some(config), None).unwrap_err();
        assert!(err.to_string().contains("unparseable test output"));
    }

    #[test]
    fn test_run_missing_file() {
        let err = run("/nonexistent/pytest.log".into(), None, None).unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }
}
