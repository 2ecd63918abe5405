use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use submission_validator::cli;
use submission_validator::error::Error;

#[derive(Parser)]
#[command(name = "submission-validator", version)]
#[command(about = "Validate a student submission and report the result", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify integrity, run the tests, and report the result
    Run {
        /// Path to config file (defaults to ./validator.toml or the user config dir)
        #[arg(long)]
        config: Option<String>,

        /// Grading track: pytest, yarn, callback
        #[arg(long)]
        track: Option<String>,

        /// Checkout to validate (defaults to current directory)
        #[arg(long)]
        workdir: Option<String>,

        /// Override the callback task id
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Print the digests of the current checkout for the [integrity] section
    Hash {
        #[arg(long)]
        config: Option<String>,

        #[arg(long)]
        workdir: Option<String>,

        /// Override integrity.tests_dir
        #[arg(long)]
        tests_dir: Option<String>,

        /// Override integrity.pipeline_file
        #[arg(long)]
        pipeline_file: Option<String>,
    },

    /// Parse a saved test-runner log and print the verdict
    Verdict {
        /// Log file to parse
        path: String,

        #[arg(long)]
        config: Option<String>,

        #[arg(long)]
        track: Option<String>,
    },

    /// Check configuration and the files a run needs
    ConfigCheck {
        #[arg(long)]
        config: Option<String>,

        #[arg(long)]
        workdir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            track,
            workdir,
            task_id,
        } => match cli::run::run(config, track, workdir, task_id).await {
            Ok(summary) => {
                info!("✓ Submission accepted ({} track)", summary.track);
            }
            Err(e) => {
                let stage = e.downcast_ref::<Error>().map(Error::stage).unwrap_or("run");
                error!(stage, "{:#}", e);
                std::process::exit(1);
            }
        },
        Commands::Hash {
            config,
            workdir,
            tests_dir,
            pipeline_file,
        } => {
            cli::hash::run(config, workdir, tests_dir, pipeline_file)?;
        }
        Commands::Verdict {
            path,
            config,
            track,
        } => {
            cli::verdict::run(path, config, track)?;
        }
        Commands::ConfigCheck { config, workdir } => {
            cli::config_check::run(config, workdir)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["submission-validator", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                config,
                track,
                workdir,
                task_id,
            } => {
                assert!(config.is_none());
                assert!(track.is_none());
                assert!(workdir.is_none());
                assert!(task_id.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_run_with_all_args() {
        let cli = Cli::try_parse_from([
            "submission-validator",
            "run",
            "--config",
            "ci/validator.toml",
            "--track",
            "yarn",
            "--workdir",
            "/src",
            "--task-id",
            "17",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                track,
                workdir,
                task_id,
            } => {
                assert_eq!(config.unwrap(), "ci/validator.toml");
                assert_eq!(track.unwrap(), "yarn");
                assert_eq!(workdir.unwrap(), "/src");
                assert_eq!(task_id.unwrap(), "17");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_hash_overrides() {
        let cli = Cli::try_parse_from([
            "submission-validator",
            "hash",
            "--tests-dir",
            "spec",
            "--pipeline-file",
            ".gitlab-ci.yml",
        ])
        .unwrap();
        match cli.command {
            Commands::Hash {
                tests_dir,
                pipeline_file,
                ..
            } => {
                assert_eq!(tests_dir.unwrap(), "spec");
                assert_eq!(pipeline_file.unwrap(), ".gitlab-ci.yml");
            }
            _ => panic!("expected hash"),
        }
    }

    #[test]
    fn test_parse_verdict_requires_path() {
        assert!(Cli::try_parse_from(["submission-validator", "verdict"]).is_err());
        let cli = Cli::try_parse_from(["submission-validator", "verdict", "out.log"]).unwrap();
        assert!(matches!(cli.command, Commands::Verdict { ref path, .. } if path == "out.log"));
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["submission-validator", "config-check"]).unwrap();
        assert!(matches!(cli.command, Commands::ConfigCheck { .. }));
    }

    #[test]
    fn test_parse_missing_subcommand() {
        assert!(Cli::try_parse_from(["submission-validator"]).is_err());
    }
}
