use std::path::PathBuf;

/// Inventory core configuration
///
/// # Environment variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | WORK_DIR | ./work_dir | Queue database and logs |
/// | ENVIRONMENT | development | Runtime environment |
/// | LOG_LEVEL | info | Default log level |
/// | LOG_JSON | false | JSON log output |
/// | CACHE_BASE_KEY | inventory-cache | Prefix of the persisted state key |
/// | CACHE_VERSION | v1.0.0 | Bump to discard all persisted client state |
/// | CACHE_MAX_AGE_MS | 604800000 | Persisted cache older than this is dropped (7 days) |
/// | SAVE_DEBOUNCE_MS | 1000 | Cart save debounce delay |
/// | SESSION_STALE_MS | 18000000 | Picking session expiry (5 hours) |
/// | MUTATION_MAX_RETRIES | 5 | Transient failures before a mutation moves to error |
/// | RETRY_BASE_DELAY_MS | 1000 | Backoff base delay |
/// | RETRY_MAX_DELAY_MS | 30000 | Backoff cap |
/// | QUEUE_SCAN_INTERVAL_MS | 15000 | Pending queue rescan interval |
/// | SWEEP_INTERVAL_MS | 300000 | Queue maintenance sweep interval |
/// | APPLIED_RETENTION_MS | 604800000 | Applied mutation ids kept for replay dedup (7 days) |
/// | GHOST_UPDATE_WINDOW_MS | 4000 | Remote quantity echoes ignored after a local edit |
///
/// # Example
///
/// ```ignore
/// WORK_DIR=/data/inventory CACHE_VERSION=v1.1.0 cargo test
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    /// development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,

    // === Persisted client state ===
    pub cache_base_key: String,
    pub cache_version: String,
    pub cache_max_age_ms: i64,

    // === Picking ===
    pub save_debounce_ms: u64,
    pub session_stale_ms: i64,

    // === Mutation queue ===
    pub mutation_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub queue_scan_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub applied_retention_ms: i64,

    // === Cache patcher ===
    pub ghost_update_window_ms: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, using defaults for unset ones
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./work_dir".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("LOG_JSON", false),

            cache_base_key: std::env::var("CACHE_BASE_KEY")
                .unwrap_or_else(|_| "inventory-cache".into()),
            cache_version: std::env::var("CACHE_VERSION").unwrap_or_else(|_| "v1.0.0".into()),
            cache_max_age_ms: env_or("CACHE_MAX_AGE_MS", 7 * 24 * 60 * 60 * 1000),

            save_debounce_ms: env_or("SAVE_DEBOUNCE_MS", 1000),
            session_stale_ms: env_or("SESSION_STALE_MS", 5 * 60 * 60 * 1000),

            mutation_max_retries: env_or("MUTATION_MAX_RETRIES", 5),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 1000),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", 30_000),
            queue_scan_interval_ms: env_or("QUEUE_SCAN_INTERVAL_MS", 15_000),
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", 300_000),
            applied_retention_ms: env_or("APPLIED_RETENTION_MS", 7 * 24 * 60 * 60 * 1000),

            ghost_update_window_ms: env_or("GHOST_UPDATE_WINDOW_MS", 4000),
        }
    }

    /// Load `.env` (if present) and then the environment
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    /// Override the work directory
    ///
    /// Used by tests
    pub fn with_overrides(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    /// Key of the persisted client-state blob; changes with the cache version
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.cache_base_key, self.cache_version)
    }

    pub fn queue_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("mutations.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
