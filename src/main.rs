use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use carupload::catalog::Fleet;
use carupload::config::Config;
use carupload::media::cloudinary::CloudinaryClient;
use carupload::media::fetch::ImageFetcher;
use carupload::{api, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::load();

    let filter = EnvFilter::try_from_env("CARUPLOAD_LOG").unwrap_or_else(|_| "info".into());
    if cfg.dev_mode {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    }

    if cfg.cloudinary.cloud_name.is_empty() || cfg.cloudinary.api_secret.is_empty() {
        tracing::warn!("cloudinary credentials not configured; uploads will fail");
    }
    let images = CloudinaryClient::new(cfg.cloudinary.clone())?;
    let fetcher = ImageFetcher::new(cfg.max_image_bytes, cfg.allow_private_urls)?;
    let catalog = store::catalog_from_config(&cfg);

    // Tables are also ensured per request; a database that is down at boot is not fatal
    for fleet in [Fleet::Car, Fleet::Scooter] {
        if let Err(e) = catalog.ensure_schema(fleet).await {
            tracing::warn!(%fleet, error = %e, "could not ensure table at startup");
        }
    }

    let state = store::AppState {
        catalog,
        images: Arc::new(images),
        fetcher,
        config: Arc::new(cfg.clone()),
    };

    let app = api::app(state);

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, store = ?cfg.store, "starting carupload");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("carupload stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received");
}
