//! copilot-bridge CLI
//!
//! Main entry point for the Security Copilot / Sentinel MCP server.
//! Supports:
//! - server http: streamable HTTP MCP endpoint (default)
//! - server stdio: MCP over stdin/stdout
//! - self-test: run smoke checks against the configured services

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use copilot_bridge::config::Settings;
use copilot_bridge::copilot::evaluation::PollSettings;
use copilot_bridge::selftest::{run_smoke_checks, SmokeReport};
use copilot_bridge::{BridgeContext, BridgeServer};
use rmcp::{transport::stdio, ServiceExt};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Parser)]
#[command(name = "copilot-bridge")]
#[command(version, about = "MCP server for Microsoft Security Copilot and Sentinel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (HTTP unless a mode is given)
    Server {
        #[command(subcommand)]
        mode: Option<ServerMode>,

        /// Run the smoke checks before serving
        #[arg(long)]
        run_tests: bool,
    },

    /// Run the smoke checks and exit
    SelfTest,
}

#[derive(Subcommand)]
enum ServerMode {
    /// Run in stdio mode
    Stdio,

    /// Run in HTTP mode
    Http {
        /// Bind address
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Initialize logging; everything goes to stderr so stdio mode keeps stdout clean
fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}={}", env!("CARGO_CRATE_NAME"), level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn print_report(report: &SmokeReport) {
    for check in &report.checks {
        let mark = if check.passed { "+" } else { "-" };
        eprintln!("[{}] {}: {}", mark, check.name, check.detail);
    }
    eprintln!(
        "{} of {} checks passed",
        report.checks.len() - report.failures(),
        report.checks.len()
    );
}

async fn serve_http(server: BridgeServer, bind: &str) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager,
        tower::{StreamableHttpServerConfig, StreamableHttpService},
    };
    use tower_http::cors::{Any, CorsLayer};

    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .route(
            "/health",
            axum::routing::get(|| async {
                axum::response::Json(serde_json::json!({
                    "status": "healthy",
                    "service": "copilot-bridge",
                    "version": env!("CARGO_PKG_VERSION")
                }))
            }),
        )
        .nest_service("/mcp", mcp_service)
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("HTTP server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables still apply
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let context = Arc::new(BridgeContext::from_settings(&cli.settings)?);
    context.probe_authentication().await;

    match cli.command {
        Commands::SelfTest => {
            let report = run_smoke_checks(&context, PollSettings::default()).await;
            print_report(&report);
            if !report.passed() {
                anyhow::bail!("{} smoke check(s) failed", report.failures());
            }
        }

        Commands::Server { mode, run_tests } => {
            if run_tests {
                let report = run_smoke_checks(&context, PollSettings::default()).await;
                print_report(&report);
            }

            let server = BridgeServer::new(context);
            let tools = server.tool_names();
            eprintln!("Exposing {} tools: {}", tools.len(), tools.join(", "));

            match mode.unwrap_or(ServerMode::Http {
                bind: DEFAULT_BIND.to_string(),
            }) {
                ServerMode::Stdio => {
                    info!("Starting copilot-bridge in stdio mode");
                    let service = server.serve(stdio()).await?;
                    service.waiting().await?;
                }

                ServerMode::Http { bind } => {
                    info!("Starting copilot-bridge in HTTP mode on {}", bind);
                    eprintln!("MCP Endpoint: http://{}/mcp", bind);
                    serve_http(server, &bind).await?;
                }
            }
        }
    }

    Ok(())
}
