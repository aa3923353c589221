//! Command-line interface parsing and configuration.
//!
//! Overrides are applied on top of the TOML configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command-line arguments for the replica node.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of simulated participants
    pub participants: Option<usize>,
    /// Optional override for the tick interval in milliseconds
    pub tick_ms: Option<u64>,
    /// Optional override for the run time in seconds (0 runs until Ctrl+C)
    pub run_for_secs: Option<u64>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("Replica Node")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Simulated room of participants sharing one entity/component scene")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("replica.toml"),
            )
            .arg(
                Arg::new("participants")
                    .short('n')
                    .long("participants")
                    .value_name("COUNT")
                    .help("Number of simulated participants")
                    .value_parser(clap::value_parser!(usize)),
            )
            .arg(
                Arg::new("tick-ms")
                    .short('t')
                    .long("tick-ms")
                    .value_name("MILLIS")
                    .help("Simulation tick interval in milliseconds")
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("run-for")
                    .long("run-for")
                    .value_name("SECONDS")
                    .help("Leave the room after this many seconds (0 runs until Ctrl+C)")
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("replica.toml")),
            participants: matches.get_one::<usize>("participants").copied(),
            tick_ms: matches.get_one::<u64>("tick-ms").copied(),
            run_for_secs: matches.get_one::<u64>("run-for").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
