pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, RecResult};
pub use models::*;

use anyhow::Result;
use config::StorageBackend;
use services::events::{EventDeduplicator, EventStore, MemoryEventStore, PgEventStore};
use services::recommendation::RecommendationService;
use services::serving::ServingService;
use services::store::{DataStore, MemoryStore, PgStore};
use services::tracking::RecommendationTracker;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DataStore>,
    pub recommendation_service: Arc<RecommendationService>,
    pub serving_service: Arc<ServingService>,
    pub events: Arc<EventDeduplicator>,
}

impl AppState {
    /// Connects the configured backend (running its migrations for PostgreSQL) and wires
    /// the services on top of it.
    pub async fn new(config: Config) -> Result<Self> {
        let (store, event_store): (Arc<dyn DataStore>, Arc<dyn EventStore>) = match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                (Arc::new(MemoryStore::new()), Arc::new(MemoryEventStore::new()))
            }
            StorageBackend::Postgres => {
                let store = PgStore::connect(&config.postgres).await?;
                store.migrate().await?;
                let events = PgEventStore::new(store.pool().clone());
                events.migrate().await?;
                (Arc::new(store), Arc::new(events))
            }
        };

        Ok(Self::from_parts(config, store, event_store))
    }

    pub fn from_parts(config: Config, store: Arc<dyn DataStore>, event_store: Arc<dyn EventStore>) -> Self {
        let config = Arc::new(config);

        let recommendation_service = Arc::new(RecommendationService::new(store.clone(), &config));
        let serving_service = Arc::new(ServingService::new(
            recommendation_service.clone(),
            Arc::new(RecommendationTracker::new()),
            store.clone(),
        ));
        let events = Arc::new(EventDeduplicator::new(event_store, config.events.clone()));

        Self {
            config,
            store,
            recommendation_service,
            serving_service,
            events,
        }
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
