use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// HMAC key used to sign and verify bearer tokens
    pub auth_secret: String,

    /// Claim lease length. Unset means claims never expire.
    pub lease_seconds: Option<u64>,

    /// How often expired leases are swept back to the queue
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_reaper_interval() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn lease(&self) -> Option<chrono::Duration> {
        self.lease_seconds
            .filter(|s| *s > 0)
            .and_then(|s| chrono::Duration::try_seconds(s as i64))
    }
}

/// Settings for the reference worker process.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the dispatch server, e.g. "http://localhost:3000"
    pub api_base_url: String,

    /// Bearer token carrying this worker's identity
    pub worker_token: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
