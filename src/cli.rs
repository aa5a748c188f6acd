use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

pub const DEFAULT_TARGET_HEIGHT: u32 = 720;
pub const DEFAULT_WORKERS: usize = 8;

/// Which defaulted flags were given on the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliSources {
    pub target_height_from_cli: bool,
    pub workers_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            target_height_from_cli: value_from_cli(matches, "target_height"),
            workers_from_cli: value_from_cli(matches, "workers"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Default, Parser)]
#[command(
    name = "rally-cut",
    about = "Detect the tennis ball in a match video and cut it into rallies",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Print the list of available decoding backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// Ball log used for resuming and for --skip-detection
    #[arg(long = "ball-log", value_name = "FILE")]
    pub ball_log: Option<PathBuf>,

    /// Where to write the detected rallies (JSON)
    #[arg(long = "rally-log", value_name = "FILE")]
    pub rally_log: Option<PathBuf>,

    /// Analysis height in pixels; width follows the video aspect ratio
    #[arg(
        long = "target-height",
        id = "target_height",
        default_value_t = DEFAULT_TARGET_HEIGHT,
        value_parser = clap::value_parser!(u32).range(36..)
    )]
    pub target_height: u32,

    /// Number of concurrent ball extractors
    #[arg(
        short = 'j',
        long = "workers",
        id = "workers",
        default_value_t = DEFAULT_WORKERS,
        value_parser = clap::value_parser!(usize)
    )]
    pub workers: usize,

    /// Write an annotated PNG per analysed frame into this directory
    #[arg(long = "preview-dir", value_name = "DIR")]
    pub preview_dir: Option<PathBuf>,

    /// Reuse a complete ball log and only rebuild arcs and rallies
    #[arg(long = "skip-detection")]
    pub skip_detection: bool,

    /// Input video path
    pub input: Option<PathBuf>,
}
