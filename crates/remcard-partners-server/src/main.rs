use clap::Parser;
use remcard_partners_server::server::config::{CliArgs, ServerConfig};
use remcard_partners_server::server::cors::CorsPolicy;
use remcard_partners_server::server::handler::AppState;
use remcard_partners_server::server::router::{ROUTES, router};
use remcard_partners_server::server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let state = AppState::from_config(&config)?;
    let app = router(state, CorsPolicy::new(&config.allowed_origins));

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match &served {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(err) => tracing::error!("Server error: {err}"),
    }
    providers.shutdown();
    served?;
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting partner endpoint on {} ({}) with full config: {:#?}",
            config.server_addr,
            ROUTES.join(", "),
            config
        );
    } else {
        tracing::info!(
            "Starting partner endpoint on {} ({}), configured: {}",
            config.server_addr,
            ROUTES.join(", "),
            config.is_configured()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, finishing in-flight requests...");
}
