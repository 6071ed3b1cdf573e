//! Tutor CLI
//!
//! Main entry point for serving the tutoring orchestrator over HTTP.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_orchestrator::{
    create_router, AppState, Backend, Backends, Config, EventBroadcaster, HttpBackend,
    HttpTranscriber, InMemoryRepository, ServiceId, Transcriber, TutorOrchestrator,
};

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Tutor - AI tutoring orchestration service
///
/// Routes explanation, challenge, security-analysis and contract-generation
/// requests between a local and a cloud model backend, with health-based
/// failover, per-user quotas and adaptive learning state.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind the HTTP API server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads config, wires the orchestrator, and serves until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print_config(&config);

    let backends = build_backends(&config)?;
    let transcriber = config
        .services
        .transcription_endpoint
        .as_deref()
        .map(|endpoint| Arc::new(HttpTranscriber::new(endpoint)) as Arc<dyn Transcriber>);
    if transcriber.is_none() {
        tracing::info!("No transcription endpoint configured, voice commands are unavailable");
    }

    let orchestrator = TutorOrchestrator::new(
        config,
        backends,
        Arc::new(InMemoryRepository::new()),
        transcriber,
        EventBroadcaster::default(),
    );
    let probes = orchestrator.spawn_health_probes();

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid bind address '{}:{}': {e}\n\nSuggestion: Pass an IP address to --bind, e.g. 127.0.0.1",
                args.bind,
                args.port
            )
        })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Check if port {} is already in use",
            args.port
        )
    })?;

    let router = create_router(AppState::new(orchestrator));
    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    let result = tokio::select! {
        served = axum::serve(listener, router).into_future() => served.map_err(anyhow::Error::from),
        Ok(()) = tokio::signal::ctrl_c() => {
            println!();
            println!("Received interrupt, shutting down...");
            Ok(())
        }
    };

    for probe in probes {
        probe.abort();
    }
    tracing::info!("Tutor stopped");
    result
}

/// Builds the HTTP adapters for both backends.
fn build_backends(config: &Config) -> anyhow::Result<Backends> {
    let timeout = config.backend_timeout();
    let adapter = |id: ServiceId| -> anyhow::Result<Arc<dyn Backend>> {
        let Some(endpoint) = config.services.get(id).endpoint.as_deref() else {
            anyhow::bail!(
                "No endpoint configured for the {id} backend\n\nSuggestion: Set services.{id}.endpoint in tutor.json"
            );
        };
        let backend = HttpBackend::new(id, endpoint, timeout).map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(Arc::new(backend))
    };

    Ok(Backends::new(
        adapter(ServiceId::Local)?,
        adapter(ServiceId::Cloud)?,
    ))
}

/// Loads configuration from the given path or the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the configuration summary.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    for id in ServiceId::ALL {
        let service = config.services.get(id);
        println!(
            "  {id} backend: {} (probe every {}s)",
            service.endpoint.as_deref().unwrap_or("<not set>"),
            service.probe_interval_secs
        );
    }
    println!("  Backend timeout: {}s", config.backend.timeout_secs);
    println!("  Health failure threshold: {}", config.health.failure_threshold);
    println!("  Learning path length: {}", config.learning.learning_path_length);

    let enabled: Vec<&str> = config
        .feature_flags
        .iter()
        .filter(|(_, on)| **on)
        .map(|(name, _)| name.as_str())
        .collect();
    println!("  Features: {}", enabled.join(", "));
}
