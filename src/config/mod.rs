use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub recommendation: RecommendationConfig,
    pub hybrid: HybridConfig,
    pub events: EventConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub ttl_seconds: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub k_neighbors: usize,
    pub min_co_rated: usize,
    pub min_predicted_rating: f32,
    pub default_limit: usize,
    /// How many candidates each source contributes to a hybrid pass.
    pub candidate_depth: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub collaborative_weight: f32,
    pub content_weight: f32,
    pub personalized_weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub shown_lookback_days: i64,
    pub history_lookback_days: i64,
    pub retention_days: i64,
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
            },
            postgres: PostgresConfig {
                url: "postgresql://localhost:5432/hybridrec".to_string(),
                max_connections: 10,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                ttl_seconds: 300,
                enabled: false,
            },
            recommendation: RecommendationConfig::default(),
            hybrid: HybridConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            min_co_rated: 1,
            min_predicted_rating: 3.5,
            default_limit: 5,
            candidate_depth: 15,
            max_limit: 100,
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            collaborative_weight: 0.40,
            content_weight: 0.30,
            personalized_weight: 0.30,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            shown_lookback_days: 7,
            history_lookback_days: 30,
            retention_days: 90,
            max_batch_size: 500,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("HYBRIDREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Defaults overlaid with `HYBRIDREC__*` environment variables only.
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::Environment::with_prefix("HYBRIDREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
