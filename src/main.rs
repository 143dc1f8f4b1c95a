//! opshub-mcp: MCP client/server core for AI-assisted operations platforms
//!
//! Serves the platform's tool registry over stdio while bridging the
//! tool catalogues of configured remote MCP servers into it. Remote
//! tools appear under the reserved `mcp:<server>:<tool>` namespace.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use opshub_mcp::bridge::{BridgeError, McpBridge};
use opshub_mcp::config;
use opshub_mcp::registry::builtin::register_builtin_tools;
use opshub_mcp::registry::ToolRegistry;
use opshub_mcp::server::{McpServer, McpServerConfig};

/// MCP client/server core for AI-assisted operations platforms.
///
/// Speaks MCP over stdio to whatever client launched this process, and
/// bridges the configured remote MCP servers into one unified tool
/// catalogue.
#[derive(Parser, Debug)]
#[command(name = "opshub-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<std::path::PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr: stdout carries the protocol.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the opshub-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration first to get the log level
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting opshub-mcp server"
    );

    // Each bridged server gets its own reader task, so a multi-threaded
    // runtime keeps slow servers from stalling each other.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Wires the registry, bridge, and serve loop together.
async fn run(cfg: config::Config) -> std::io::Result<()> {
    let registry = Arc::new(ToolRegistry::new());
    if let Err(e) = register_builtin_tools(&registry) {
        error!(error = %e, "failed to register built-in tools");
    }

    let bridge = McpBridge::new(Arc::clone(&registry), cfg.into_bridge_config()).await;

    // Bridge what we can; servers that failed are reported and skipped.
    match bridge.initialize().await {
        Ok(count) if count > 0 => info!(tools = count, "bridged remote tool catalogues"),
        Ok(_) => {}
        Err(BridgeError::Discovery { failures }) => {
            for (id, message) in &failures {
                warn!(server = %id, message, "server not bridged");
            }
        }
        Err(e) => warn!(error = %e, "bridge initialisation failed"),
    }

    let stats = bridge.pool_stats().await;
    info!(
        servers = stats.total_servers,
        connections = stats.active_connections,
        tools = registry.len(),
        "MCP server ready, waiting for client connection..."
    );

    let server = Arc::new(McpServer::new(registry, McpServerConfig::default()));

    // Flip the serve loop's shutdown flag on SIGINT/SIGTERM.
    spawn_signal_handler(Arc::clone(&server));

    let result = server.run().await;

    bridge.close().await;
    result
}

/// Requests server shutdown when the process receives a signal.
fn spawn_signal_handler(server: Arc<McpServer>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        server.shutdown();
    });
}
