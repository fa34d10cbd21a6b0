use clap::Parser;
use dotenvy::dotenv;
use panorama_gateway::config::GatewayConfig;
use panorama_gateway::infrastructure::storage;
use panorama_gateway::services::executor::TokioProcessExecutor;
use panorama_gateway::services::worker::BackgroundWorker;
use panorama_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Image asset and panorama stitching gateway")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 4000)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: std::net::IpAddr,

    /// Use the in-memory store and permissive CORS
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panorama_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Panorama Gateway...");

    let config = if args.dev {
        GatewayConfig::development()
    } else {
        GatewayConfig::from_env()
    };
    info!(
        "🧵 Stitcher: {} {:?} (timeout {}s, single-flight={}, unique keys={})",
        config.stitch_command,
        config.stitch_args,
        config.stitch_timeout_secs,
        config.single_flight,
        config.unique_output_keys
    );

    // Setup Infrastructure
    let storage_service = storage::setup_storage(&config).await?;
    let state = AppState::new(
        config.clone(),
        storage_service,
        Arc::new(TokioProcessExecutor::new()),
    )?;
    info!("📂 Staging area: {}", state.staging.root().display());

    let max_age = Duration::from_secs(config.staging_cleanup_age_hours * 3600);
    let purged = state.staging.purge_stale(max_age).await;
    if purged > 0 {
        warn!("🧹 Removed {} staging entries left by a previous run", purged);
    }

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Start Background Worker
    let worker = BackgroundWorker::new(state.staging.clone(), max_age, shutdown_rx)
        .with_locks(state.pipeline.in_flight());
    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });

    let app = create_app(state);

    let addr = SocketAddr::new(args.host, args.port);
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = worker_handle.await;
    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
