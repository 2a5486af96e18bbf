//! Command-line flags of the `cluster-alertd` binary.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// How log lines are rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One human-readable line per event.
    #[default]
    Text,
    /// One JSON object per event, for shipping to a log pipeline.
    Json,
}

/// Receives cluster monitoring alerts, queues them per cluster and hands
/// each one to the analysis agent, reporting results to the bound device.
#[derive(Parser, Debug)]
#[command(name = "cluster-alertd", version)]
#[command(about = "Per-cluster alert queueing, analysis dispatch and device notification")]
pub struct Cli {
    /// YAML file with listener, queue, agent and push gateway settings.
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Check the configuration and its secrets, print a summary, then exit.
    #[arg(long = "validate")]
    pub validate: bool,

    /// Log rendering; `LOG_FORMAT` is read when the flag is absent.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("cluster-alertd").chain(args.iter().copied()))
    }

    #[test]
    #[serial]
    fn defaults_to_packaged_config_and_text_logs() {
        temp_env::with_var_unset("LOG_FORMAT", || {
            let cli = parse(&[]).unwrap();
            assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
            assert!(!cli.validate);
            assert_eq!(cli.log_format, LogFormat::Text);
        });
    }

    #[test]
    fn short_and_long_config_flags_agree() {
        let short = parse(&["-c", "/srv/alertd.yaml"]).unwrap();
        let long = parse(&["--config", "/srv/alertd.yaml"]).unwrap();
        assert_eq!(short.config, long.config);
        assert_eq!(short.config, PathBuf::from("/srv/alertd.yaml"));
    }

    #[test]
    fn validate_combines_with_config() {
        let cli = parse(&["--validate", "-c", "staging.yaml"]).unwrap();
        assert!(cli.validate);
        assert_eq!(cli.config, PathBuf::from("staging.yaml"));
    }

    #[test]
    fn unknown_log_format_is_an_error() {
        let err = parse(&["--log-format", "yaml"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    #[serial]
    fn log_format_comes_from_environment() {
        temp_env::with_var("LOG_FORMAT", Some("json"), || {
            assert_eq!(parse(&[]).unwrap().log_format, LogFormat::Json);
        });
    }

    #[test]
    #[serial]
    fn log_format_flag_beats_environment() {
        temp_env::with_var("LOG_FORMAT", Some("json"), || {
            let cli = parse(&["--log-format", "text"]).unwrap();
            assert_eq!(cli.log_format, LogFormat::Text);
        });
    }
}
