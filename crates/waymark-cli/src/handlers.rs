//! Command implementations.
//!
//! Each handler returns what it would print so `main` owns the terminal and
//! the handlers stay testable.

use crate::commands::{ArtifactsArgs, ConfigAction, ConfigArgs, MockServerArgs};
use crate::error::{CliError, CliResult};
use crate::mock_server::{MockAuthBackend, MockServer, MockServerConfig};
use crate::output::Reporter;
use std::path::{Path, PathBuf};
use waymark::{keys, ArtifactPaths, ConfigManager};

/// Defaults merged with the overrides file, if any
pub fn load_config(file: Option<&Path>) -> CliResult<ConfigManager> {
    match file {
        Some(path) => ConfigManager::from_file(path)
            .map_err(|e| CliError::config(format!("{}: {e}", path.display()))),
        None => Ok(ConfigManager::new()),
    }
}

/// `config show` / `config get <key>` as pretty JSON
pub fn run_config(args: &ConfigArgs) -> CliResult<String> {
    let config = load_config(args.config.as_deref())?;
    let value = match &args.action {
        ConfigAction::Show => config.get_all(),
        ConfigAction::Get { key } => config
            .get_value(key)
            .cloned()
            .ok_or_else(|| CliError::invalid_argument(format!("Unknown configuration key: {key}")))?,
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

fn output_root(output: Option<&Path>, config: &ConfigManager) -> PathBuf {
    output.map_or_else(
        || PathBuf::from(config.get(keys::REPORTING_OUTPUT_PATH, "./test-results".to_string())),
        Path::to_path_buf,
    )
}

/// Artifact layout of one test case, created on disk with `--create`
pub fn run_artifacts(args: &ArtifactsArgs) -> CliResult<ArtifactPaths> {
    let config = load_config(args.config.as_deref())?;
    let root = output_root(args.output.as_deref(), &config);
    let paths = ArtifactPaths::new(root, &args.suite, &args.test);
    if args.create {
        paths.create()?;
        tracing::info!(root = %paths.root().display(), "artifact directories created");
    }
    Ok(paths)
}

/// Serve the mock auth backend until interrupted
pub async fn run_mock_server(args: &MockServerArgs, reporter: &Reporter) -> CliResult<()> {
    let config = MockServerConfig::new(args.host.clone(), args.port);
    let server = MockServer::bind(&config, MockAuthBackend::new()).await?;
    reporter.success(&format!(
        "Mock auth backend on http://{}",
        server.local_addr()?
    ));
    server.run().await
}

/// Open `args.url` in Chromium through a [`waymark::TestService`] and keep
/// the success screenshot
#[cfg(feature = "browser")]
pub async fn run_capture(args: &crate::commands::CaptureArgs) -> CliResult<PathBuf> {
    use std::sync::Arc;
    use waymark::{
        ActionOptions, BrowserLauncher, ChromiumLauncher, ContextOptions, TestService,
    };

    let config = load_config(args.config.as_deref())?;
    let root = output_root(args.output.as_deref(), &config);
    let launcher = ChromiumLauncher::from_config(&config).with_headless(!args.headed);

    let browser = launcher.launch().await?;
    let context = browser.new_context(ContextOptions::default()).await?;
    let page = context.new_page().await?;

    let service = TestService::builder(page.clone(), &args.suite, &args.test)
        .with_config(config)
        .with_output_dir(root)
        .with_launcher(Arc::new(launcher))
        .build()?;

    let url = args.url.as_str();
    let outcome = service
        .try_catch_handler(|| page.goto(url), ActionOptions::named("capture"))
        .await;

    context.close().await?;
    browser.close().await?;
    outcome?;
    Ok(service.artifacts().screenshots())
}
