// ABOUTME: Entry point for the mikrocloud CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mikrocloud::build::{BuildOrchestrator, BuildRequest, GitCliFetcher};
use mikrocloud::config::{self, Config};
use mikrocloud::database::{DatabaseConfig, DatabaseKind};
use mikrocloud::error::{Error, Result};
use mikrocloud::output::{Output, OutputMode};
use mikrocloud::runtime::{
    BollardRuntime, RuntimeError, RuntimeErrorKind, RuntimeInfoTrait, connect_local,
    detect_local,
};
use serde::Serialize;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(OutputMode::from_flags(cli.quiet, cli.json));

    if let Err(e) = run(cli.command, output).await {
        eprintln!("Error: {e}");
        if let Error::Runtime(runtime) = &e
            && runtime.kind() == RuntimeErrorKind::NoRuntimeFound
        {
            eprintln!("Hint: start Docker or Podman, or set runtime.socket in mikrocloud.yml");
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands, mut output: Output) -> Result<()> {
    match command {
        Commands::Init { force } => {
            let cwd = env::current_dir()?;
            let path = config::init_config(&cwd, force)?;
            output.success(&format!("Created {}", path.display()));
            Ok(())
        }
        Commands::Check => {
            let cwd = env::current_dir()?;
            check(&cwd, &output).await
        }
        Commands::Build { file } => {
            let cwd = env::current_dir()?;
            output.start_timer();
            build(&cwd, &file, &output).await
        }
        Commands::Defaults { kind } => defaults(kind, &output),
    }
}

#[derive(Serialize)]
struct CheckReport {
    config: Option<String>,
    runtime: String,
    socket: String,
    version: String,
    api_version: String,
    os: String,
    arch: String,
}

/// Validate configuration, then detect, ping, and describe the engine.
async fn check(cwd: &Path, output: &Output) -> Result<()> {
    let config = Config::discover_or_default(cwd)?;
    let config_path = Config::locate(cwd);
    match &config_path {
        Some(path) => output.progress(&format!("Configuration OK: {}", path.display())),
        None => output.progress("No configuration file, using defaults"),
    }

    let endpoint = detect_local(Some(&config.runtime)).map_err(RuntimeError::from)?;
    output.progress(&format!(
        "Found {} at {}",
        endpoint.runtime_type, endpoint.socket_path
    ));
    let runtime = BollardRuntime::connect(&endpoint)?;
    runtime.ping().await?;
    let metadata = runtime.info().await?;

    let report = CheckReport {
        config: config_path.map(|p| p.display().to_string()),
        runtime: endpoint.runtime_type.to_string(),
        socket: endpoint.socket_path,
        version: metadata.version,
        api_version: metadata.api_version,
        os: metadata.os,
        arch: metadata.arch,
    };
    match output.mode() {
        OutputMode::Normal => output.success(&format!(
            "{} {} (API {}) on {}/{} is reachable",
            report.runtime, report.version, report.api_version, report.os, report.arch
        )),
        _ => output.value(&report)?,
    }
    Ok(())
}

/// Run one build request against the local engine.
async fn build(cwd: &Path, file: &Path, output: &Output) -> Result<()> {
    let config = Config::discover_or_default(cwd)?;
    let contents = std::fs::read_to_string(file)?;
    let request: BuildRequest = serde_yaml::from_str(&contents)?;

    let runtime = connect_local(Some(&config.runtime)).await?;
    let orchestrator = BuildOrchestrator::new(
        Arc::new(runtime),
        Arc::new(GitCliFetcher::default()),
        config.build,
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            interrupt.cancel();
        }
    });

    output.progress(&format!(
        "Building {} from {}@{} ({})",
        request.image,
        request.source.url,
        request.source.reference,
        request.strategy.kind()
    ));
    let result = orchestrator.build(&request, &cancel).await?;
    info!(build = %request.id, success = result.success, "build finished");

    if output.mode() == OutputMode::Json {
        output.value(&result)?;
    } else if output.mode() == OutputMode::Normal {
        print!("{}", result.logs);
    }

    match (result.success, &result.image) {
        (true, Some(image)) => {
            if output.mode() != OutputMode::Json {
                output.success(&format!("Built {}", image));
            }
            Ok(())
        }
        _ => Err(Error::BuildFailed(
            result
                .error
                .unwrap_or_else(|| "build produced no image".to_string()),
        )),
    }
}

#[derive(Serialize)]
struct DefaultsReport {
    image: String,
    port: u16,
    data_dir: &'static str,
    connection_string: String,
    config: DatabaseConfig,
}

fn defaults(kind: DatabaseKind, output: &Output) -> Result<()> {
    let config = DatabaseConfig::defaults(kind);
    let blueprint = config.blueprint()?;
    let report = DefaultsReport {
        image: blueprint.image.to_string(),
        port: blueprint.port,
        data_dir: blueprint.data_dir,
        connection_string: config.connection_string("localhost"),
        config,
    };
    output.value(&report)
}
