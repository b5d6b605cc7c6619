#![cfg_attr(not(test), deny(clippy::panic))]

use chat_gateway::config;
use chat_gateway::logging;
use chat_gateway::server::GatewayServer;
use chat_gateway::websocket;
use clap::Parser;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// Chat gateway -- tiered HTTP rate limiting and authenticated WebSocket sessions
#[derive(Parser, Debug)]
#[command(name = "chat-gateway")]
#[command(about = "Token-bucket rate limiting and authenticated WebSocket connections for chat backends")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON, secrets redacted) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

const REDACTED: &str = "<redacted>";

/// Configuration as JSON with secrets replaced.
fn redacted_config(cfg: &config::Config) -> anyhow::Result<Value> {
    let mut value = serde_json::to_value(cfg)?;
    for (section, field) in [
        ("auth", "jwt_secret"),
        ("auth", "signing_secret"),
        ("security", "admin_token"),
    ] {
        if let Some(slot) = value.get_mut(section).and_then(|s| s.get_mut(field)) {
            if !slot.is_null() {
                *slot = Value::String(REDACTED.to_owned());
            }
        }
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&redacted_config(&cfg)?)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() only reports validation problems; startup and
    // --validate-config need the result.
    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Rate limiting enabled: {}", cfg.rate_limit.enabled);
                println!("  Bucket store: {:?}", cfg.rate_limit.storage);
                println!(
                    "  Failure policy: {}",
                    cfg.rate_limit.failure_policy.as_str()
                );
                println!("  Default tier: {}", cfg.rate_limit.default_tier);
                println!(
                    "  Tiers: {}",
                    cfg.rate_limit
                        .tiers
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                println!(
                    "  Max connections per user: {}",
                    cfg.websocket.max_connections_per_user
                );
                println!(
                    "  Admin token configured: {}",
                    cfg.security.admin_token().is_some()
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result?;

    let _log_guard = logging::init_with_config(&cfg.logging);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let cors_origins = cfg.security.cors_origins.clone();
    let server = GatewayServer::new(cfg).await?;

    let maintenance_server = Arc::clone(&server);
    let maintenance = tokio::spawn(async move {
        maintenance_server.maintenance_task().await;
    });

    let app = websocket::create_router(Arc::clone(&server));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        %cors_origins,
        "Chat gateway listening - WebSocket: /ws/chat, rate limits: /api/rate-limits"
    );

    let shutdown_server = Arc::clone(&server);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let closed = shutdown_server.connections().shutdown().await;
        tracing::info!(closed, "Shutdown signal received, closed WebSocket sessions");
    })
    .await?;

    maintenance.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
