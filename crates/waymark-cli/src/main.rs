//! Waymark CLI
//!
//! ## Usage
//!
//! ```bash
//! waymark mock-server --port 3001          # Serve the mock auth backend
//! waymark config show                      # Merged configuration as JSON
//! waymark config -c waymark.yaml get retry.maxAttempts
//! waymark artifacts Auth "login ok" --create
//! waymark capture http://localhost:3000    # needs --features browser
//! ```

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use waymark_cli::{
    handlers, Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, Reporter, Verbosity,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity);
    let reporter = Reporter::new(config.color.should_color(), config.verbosity.is_quiet());

    match run(cli, &reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.failure(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.clone().into();
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
}

fn init_tracing(verbosity: Verbosity) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::config(format!("Failed to create runtime: {e}")))
}

fn run(cli: Cli, reporter: &Reporter) -> CliResult<()> {
    match cli.command {
        Commands::MockServer(args) => {
            runtime()?.block_on(handlers::run_mock_server(&args, reporter))
        }
        Commands::Config(args) => {
            println!("{}", handlers::run_config(&args)?);
            Ok(())
        }
        Commands::Artifacts(args) => {
            let paths = handlers::run_artifacts(&args)?;
            println!("{}", paths.root().display());
            for dir in paths.subdirectories() {
                println!("  {}", dir.display());
            }
            if args.create {
                reporter.success("Artifact directories created");
            }
            Ok(())
        }
        #[cfg(feature = "browser")]
        Commands::Capture(args) => {
            let dir = runtime()?.block_on(handlers::run_capture(&args))?;
            reporter.success(&format!("Evidence written to {}", dir.display()));
            Ok(())
        }
        #[cfg(not(feature = "browser"))]
        Commands::Capture(_) => Err(CliError::invalid_argument(
            "capture needs a browser. Rebuild with --features browser",
        )),
    }
}
