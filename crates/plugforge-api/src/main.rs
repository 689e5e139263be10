//! plugforge CLI and server entry point.
//!
//! Binary name: `plugforge`
//!
//! Parses CLI arguments, initializes tracing, database and services, then
//! dispatches to the command handler or starts the server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands, ConfigAction, UserAction};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let enable_otel = plugforge_observe::tracing_setup::otel_requested();
    if let Err(e) = plugforge_observe::tracing_setup::init_tracing(enable_otel, cli.log_filter()) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = run(cli).await;
    plugforge_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Serve { host, port } => {
            if !state.connector.has_api_key() {
                tracing::warn!(
                    "No upstream API key configured; relay sessions will fail to connect"
                );
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} plugforge listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }
            tracing::info!(%addr, model = %state.relay_config.upstream.model, "Server started");

            let shutdown = state.shutdown.clone();
            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    // Relay sessions close their upstream sockets on cancel.
                    shutdown.cancel();
                })
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::User { action } => match action {
            UserAction::Create { name } => {
                cli::user::create_user(&state, &name, cli.json).await?;
            }
            UserAction::List => {
                cli::user::list_users(&state, cli.json).await?;
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                cli::config::show_config(&state, cli.json)?;
            }
        },
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
