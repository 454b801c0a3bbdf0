use std::path::{Path, PathBuf};

use clap::Parser;
use schemagate::{
    config::{ExtraConfig, GatewayConfig},
    observability, server,
    validation::{self, CompilationError},
};

/// CLI arguments for schemagate
#[derive(Parser, Debug)]
#[command(version, about = "JSON Schema validating API gateway", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "schemagate.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the gateway server (default)
    Serve,
    /// Load the configuration, compile every schema and report per route
    Check,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(&args.config).await,
        Command::Check => run_check(&args.config),
    }
}

fn load_config(path: &Path) -> GatewayConfig {
    match GatewayConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// Run the gateway server
async fn run_server(config_path: &Path) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let client = match config.server.http_client.build_client() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let app = match server::build_gateway(&config, client) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to build gateway: {}", e);
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        endpoints = config.endpoints.len(),
        "Server listening on http://{}",
        bind_addr
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}

/// Validate the configuration and report which routes validate requests.
fn run_check(config_path: &Path) {
    let config = load_config(config_path);

    let mut invalid = 0;
    for endpoint in &config.endpoints {
        let status = schema_status(&endpoint.extra_config);
        invalid += usize::from(status.is_err());
        println!(
            "{} {}: {}",
            endpoint.method.to_ascii_uppercase(),
            endpoint.endpoint,
            describe(&status)
        );

        for backend in &endpoint.backend {
            let status = schema_status(&backend.extra_config);
            invalid += usize::from(status.is_err());
            let host = backend.host.first().map(String::as_str).unwrap_or_default();
            println!("  -> {}{}: {}", host, backend.url_pattern, describe(&status));
        }
    }

    if invalid > 0 {
        eprintln!("{invalid} invalid schema(s); validation is disabled where they appear");
        std::process::exit(1);
    }
}

/// `Ok(true)` when a schema is configured and compiles, `Ok(false)` when
/// none is configured.
fn schema_status(extra_config: &ExtraConfig) -> Result<bool, CompilationError> {
    match validation::extract(extra_config) {
        Some(definition) => validation::compile(definition).map(|_| true),
        None => Ok(false),
    }
}

fn describe(status: &Result<bool, CompilationError>) -> String {
    match status {
        Ok(true) => "validated".to_string(),
        Ok(false) => "no schema".to_string(),
        Err(e) => format!("invalid schema: {e}"),
    }
}
