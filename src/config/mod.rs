use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which execution substrate submissions are dispatched to.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskBackendKind {
    InProcess,
    Redis,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. The in-memory job store is used when unset.
    pub database_url: Option<String>,

    /// Redis connection string for the distributed task backend
    pub redis_url: Option<String>,

    #[serde(default = "default_task_backend")]
    pub task_backend: TaskBackendKind,

    /// Nominatim base URL used for geocoding
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,

    /// Overpass interpreter endpoint used for amenity and building search
    #[serde(default = "default_overpass_url")]
    pub overpass_url: String,

    /// Raster tile server base URL ({base}/{z}/{x}/{y}.png)
    #[serde(default = "default_tile_url")]
    pub tile_url: String,

    /// OSM usage policy requires an identifying User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Root directory for `results/` and `maps/` artifacts
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Directory for temporary raster tiles (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,

    /// Lifetime of distributed task-state entries
    #[serde(default = "default_task_result_ttl_secs")]
    pub task_result_ttl_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_task_backend() -> TaskBackendKind {
    TaskBackendKind::InProcess
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_overpass_url() -> String {
    "https://overpass-api.de/api/interpreter".to_string()
}

fn default_tile_url() -> String {
    "https://tile.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("neighborhood-insight/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_task_result_ttl_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Shared client for every outbound OpenStreetMap request.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()
    }
}
