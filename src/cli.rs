// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `eltflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "eltflow",
    version,
    about = "Run extract-load-transform pipelines with retries, watermarks and quality gates.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    ///
    /// Default: `Eltflow.toml` in the current working directory.
    #[arg(long, global = true, value_name = "PATH", default_value = "Eltflow.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ELTFLOW_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute one run of a pipeline.
    ///
    /// Exit status: 0 succeeded, 1 failed, 2 partial.
    Run {
        pipeline_id: String,

        /// Logical timestamp of the run (RFC 3339, `YYYY-MM-DD HH:MM:SS` or
        /// `YYYY-MM-DD`). Defaults to now.
        #[arg(long, value_name = "TS")]
        from: Option<String>,

        /// Validate and print the execution plan without running anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Keep running the pipeline on its cron schedule until interrupted.
    Schedule { pipeline_id: String },

    /// Print the ledger entries of a run.
    History { run_id: String },

    /// Parse and validate the config, then print the task graph.
    Validate,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_flags() {
        let args = CliArgs::try_parse_from([
            "eltflow",
            "run",
            "marketplace_elt_pipeline",
            "--from",
            "2024-05-01",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(args.config, "Eltflow.toml");
        match args.command {
            Command::Run {
                pipeline_id,
                from,
                dry_run,
            } => {
                assert_eq!(pipeline_id, "marketplace_elt_pipeline");
                assert_eq!(from.as_deref(), Some("2024-05-01"));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = CliArgs::try_parse_from([
            "eltflow",
            "validate",
            "--config",
            "pipelines/p.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.config, "pipelines/p.toml");
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn run_requires_pipeline_id() {
        assert!(CliArgs::try_parse_from(["eltflow", "run"]).is_err());
    }
}
