//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Waymark: browser test orchestration with evidence capture
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the mock auth backend
    MockServer(MockServerArgs),

    /// Show the merged harness configuration
    Config(ConfigArgs),

    /// Print or create the artifact layout of a test case
    Artifacts(ArtifactsArgs),

    /// Open a URL in Chromium and store a screenshot as test evidence
    Capture(CaptureArgs),
}

/// Arguments for the mock-server command
#[derive(Args, Debug)]
pub struct MockServerArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "3001")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// YAML or JSON file with overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// What to print
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the whole configuration as JSON
    Show,
    /// Print one value by dotted key
    Get {
        /// Dotted key, e.g. `retry.maxAttempts`
        key: String,
    },
}

/// Arguments for the artifacts command
#[derive(Args, Debug)]
pub struct ArtifactsArgs {
    /// Test suite name
    pub suite: String,

    /// Test case name
    pub test: String,

    /// Create the directories instead of only printing them
    #[arg(long)]
    pub create: bool,

    /// Output root (defaults to `reporting.outputPath`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML or JSON file with overrides
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the capture command
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Page to open
    pub url: String,

    /// Suite name used for the artifact directory
    #[arg(long, default_value = "capture")]
    pub suite: String,

    /// Test name used for the artifact directory
    #[arg(long, default_value = "page")]
    pub test: String,

    /// Output root (defaults to `reporting.outputPath`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML or JSON file with overrides
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// Color argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
