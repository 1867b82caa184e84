use clap::Parser;
use envdock_core::{EnvService, ServiceConfig};
use envdock_runtime::{check_tool_prereqs, format_missing};
use envdock_server::ServerError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "envdock-server", about = "HTTP API for managing conda environments")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Config file (default: ~/.config/envdock/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend to use: conda or mock.
    #[arg(long)]
    backend: Option<String>,

    /// Path to the conda binary.
    #[arg(long)]
    tool: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<ServiceConfig, ServerError> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::load_default()?,
    };
    if let Some(backend) = &cli.backend {
        config.backend.clone_from(backend);
    }
    if let Some(tool) = &cli.tool {
        config.tool.clone_from(tool);
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), ServerError> {
    let config = load_config(cli)?;
    if config.backend == "conda" {
        let missing = check_tool_prereqs(&config.tool);
        if !missing.is_empty() {
            warn!("{}", format_missing(&missing));
        }
    }

    let service = EnvService::from_config(config)?;
    let addr = format!("{}:{}", cli.host, cli.port);
    let server = Arc::new(envdock_server::bind(&addr)?);

    let srv = Arc::clone(&server);
    let _ = ctrlc::set_handler(move || {
        eprintln!("\nshutdown requested, finishing current request...");
        srv.unblock();
    });

    info!(
        "starting envdock-server on {addr} (backend: {})",
        service.backend().name()
    );
    envdock_server::run_server(&service, &server);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
