//! shelf server binary.
//!
//! Usage: `shelfd [CONFIG_FILE]` — the optional argument overrides the
//! platform-default `shelf.toml` location. Everything else is configured
//! through the file or `SHELF_*` environment variables.

use shelf::{AppState, FsCatalog, RenderWorker};
use shelf_cache::ArtifactStore;
use shelf_config::Config;
use shelf_preprocess::{Catalog, Scheduler};
use shelf_render::PageRenderer;
use shelf_storage::StoreHandle;
use shelf_storage::backend::S3Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,aws_config=warn,aws_smithy_runtime=warn")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            std::process::exit(1);
        },
    };

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let cache_root = &config.cache.root;
    // Each item type gets its own scratch subdirectory so concurrent jobs
    // never sweep each other's temporaries. Both stay under the cache root,
    // keeping renames on one filesystem.
    let magazine_cache = ArtifactStore::new(cache_root.join("magazine"), cache_root.join("tmp").join("magazine"))?;
    let ebook_cache = ArtifactStore::new(cache_root.join("ebook"), cache_root.join("tmp").join("ebook"))?;

    let store: Option<StoreHandle> = match &config.storage {
        Some(storage) => {
            let prefix = (!storage.prefix.is_empty()).then(|| storage.prefix.clone());
            let s3 = S3Store::new(
                "primary",
                &storage.bucket,
                prefix,
                &storage.region,
                storage.endpoint.clone(),
                &storage.key_id,
                &storage.key_secret,
            )?;
            tracing::info!(bucket = %storage.bucket, "object store configured");
            Some(Arc::new(s3) as StoreHandle)
        },
        None => {
            tracing::info!("no object store configured; serving from the local library only");
            None
        },
    };

    let pages = match PageRenderer::discover() {
        Ok(pages) => Some(pages),
        Err(err) => {
            tracing::warn!(error = %err, "page rendering disabled");
            None
        },
    };

    let catalog = Arc::new(FsCatalog::new(config.library.root.clone()));
    let worker = RenderWorker::new(
        magazine_cache.clone(),
        ebook_cache.clone(),
        store.clone(),
        config.library.root.clone(),
        pages,
    );
    let scheduler = Scheduler::with_item_delay(
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        Arc::new(worker),
        Duration::from_millis(config.preprocess.item_delay_ms),
    );

    let state = Arc::new(AppState::new(
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        scheduler,
        store,
        config.library.root.clone(),
        magazine_cache,
        ebook_cache,
    ));
    let app = shelf::server::router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "shelf server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
}
