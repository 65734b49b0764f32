pub mod memory;
pub mod mssql;

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{Fleet, ImageSlot, Listing, ListingKey, StoredImage};
use crate::config::{Config, StoreKind};
use crate::media::ImageHost;
use crate::media::fetch::ImageFetcher;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("listing already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] tiberius::error::Error),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out connecting to database")]
    Timeout,
}

/// Persistence of vehicle listings, one table per [`Fleet`].
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create the fleet table if it does not exist yet.
    async fn ensure_schema(&self, fleet: Fleet) -> Result<(), StoreError>;

    async fn exists(&self, fleet: Fleet, key: &ListingKey) -> Result<bool, StoreError>;

    /// Insert a listing and return its generated id.
    async fn insert(&self, fleet: Fleet, listing: &Listing) -> Result<i32, StoreError>;

    /// Current URL of `slot` for every listing matching segment and model.
    async fn image_urls(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
    ) -> Result<Vec<StoredImage>, StoreError>;

    /// Point `slot` at `url` for every listing matching segment and model.
    async fn update_image(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
        url: &str,
    ) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub images: Arc<dyn ImageHost>,
    pub fetcher: ImageFetcher,
    pub config: Arc<Config>,
}

/// Build the catalog backend selected by configuration.
pub fn catalog_from_config(config: &Config) -> Arc<dyn CatalogStore> {
    match config.store {
        StoreKind::Mssql => Arc::new(mssql::MssqlStore::new(&config.sql)),
        StoreKind::Memory => {
            tracing::warn!("using in-memory catalog; listings are lost on restart");
            Arc::new(memory::MemoryStore::default())
        }
    }
}
