//! pasta server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pasta_core::config::AppConfig;
use pasta_core::{MimeLookup, MimeTypes};
use pasta_server::sweeper::spawn_sweeper;
use pasta_server::{AppState, PublicListing, create_router};
use pasta_storage::RecordStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pasta - an ephemeral, anonymous blob store
#[derive(Parser, Debug)]
#[command(name = "pastad")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "PASTA_CONFIG", default_value = "pastad.toml")]
    config: String,
}

/// Load configuration: optional TOML file, overridden by `PASTA_*` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", path);
    }

    figment
        .merge(Env::prefixed("PASTA_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Load the MIME table. A missing or unreadable table is not fatal.
fn load_mime_types(config: &AppConfig) -> MimeTypes {
    let Some(path) = &config.storage.mime_types else {
        return MimeTypes::new();
    };
    match MimeTypes::load(path) {
        Ok(table) => {
            tracing::info!(path = %path.display(), entries = table.len(), "Loaded MIME types");
            table
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not load MIME types, falling back to the default type"
            );
            MimeTypes::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pasta v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("Configuration warning: {}", warning);
            }
        }
        Err(error) => anyhow::bail!("invalid configuration: {error}"),
    }

    let mime: Arc<dyn MimeLookup> = Arc::new(load_mime_types(&config));

    let store = RecordStore::open(
        &config.storage.path,
        config.storage.id_length,
        config.storage.token_length,
    )
    .await
    .with_context(|| {
        format!(
            "failed to open storage at {}",
            config.storage.path.display()
        )
    })?;
    tracing::info!(path = %config.storage.path.display(), "Record store opened");

    let public = PublicListing::load(&store, config.public.max_entries)
        .await
        .context("failed to load public listing")?;
    if public.is_enabled() {
        tracing::info!(
            entries = public.entries().await.len(),
            max_entries = public.max_entries(),
            "Public listing loaded"
        );
    }

    let state = AppState::new(config.clone(), Arc::new(store), Arc::new(public), mime);

    if let Some(interval) = state.sweep_interval() {
        spawn_sweeper(state.clone(), interval);
        tracing::info!(interval_secs = interval.as_secs(), "Expiration sweeper spawned");
    } else {
        tracing::info!("Expiration sweeper disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo provides the client address to the throttle
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
