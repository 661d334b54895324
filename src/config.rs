use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub headers: HeaderNamesConfig,
    pub throttle: ThrottleConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
    pub acquire_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

/// Token lifecycle settings for the rotating bearer-token engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Mint a fresh token on every successful validation. When disabled the
    /// session keeps a fixed token and only `token_lifespan_secs` bounds it.
    pub rotate_on_each_request: bool,
    /// Seconds until a session expires, refreshed on each rotation.
    pub token_lifespan_secs: i64,
    /// bcrypt work factor for stored token hashes. Valid range is 4..=31;
    /// keep it at 4 in test profiles so validation stays cheap.
    pub token_cost: u32,
    /// Concurrent sessions allowed per user before the oldest is evicted.
    pub max_devices: u32,
    /// Seconds after a rotation during which the superseded token still
    /// validates, so parallel in-flight requests do not fail.
    pub grace_duration_secs: i64,
}

/// Names used for the credential headers at the HTTP boundary. The engine
/// itself never sees these; only (de)serialization in `auth` consults them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HeaderNamesConfig {
    pub access_token: String,
    pub client: String,
    pub uid: String,
    pub expiry: String,
    pub token_type: String,
    pub authorization: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ThrottleConfig {
    pub sign_in_limit: u32,
    pub window_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub require_client_ip: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/turnstile".to_string(),
            max_connections: 16,
            min_connections: 4,
            connection_timeout: 5,
            acquire_timeout: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            rotate_on_each_request: true,
            token_lifespan_secs: 14 * 24 * 60 * 60,
            token_cost: 10,
            max_devices: 10,
            grace_duration_secs: 5,
        }
    }
}

impl Default for HeaderNamesConfig {
    fn default() -> Self {
        Self {
            access_token: "access-token".to_string(),
            client: "client".to_string(),
            uid: "uid".to_string(),
            expiry: "expiry".to_string(),
            token_type: "token-type".to_string(),
            authorization: "Authorization".to_string(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sign_in_limit: 10,
            window_seconds: 60,
            cleanup_interval_seconds: 300,
            require_client_ip: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
            api: ApiConfig::default(),
            auth: AuthConfig::default(),
            headers: HeaderNamesConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl AuthConfig {
    /// bcrypt rejects work factors outside this range.
    pub const MIN_TOKEN_COST: u32 = 4;
    pub const MAX_TOKEN_COST: u32 = 31;

    pub fn validate(&self) -> Result<(), String> {
        if !(Self::MIN_TOKEN_COST..=Self::MAX_TOKEN_COST).contains(&self.token_cost) {
            return Err(format!(
                "auth.token_cost must be within {}..={}, got {}",
                Self::MIN_TOKEN_COST,
                Self::MAX_TOKEN_COST,
                self.token_cost
            ));
        }
        if self.max_devices == 0 {
            return Err("auth.max_devices must be at least 1".to_string());
        }
        if self.token_lifespan_secs <= 0 {
            return Err("auth.token_lifespan_secs must be positive".to_string());
        }
        if self.grace_duration_secs < 0 {
            return Err("auth.grace_duration_secs must not be negative".to_string());
        }
        Ok(())
    }

    pub fn token_lifespan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_lifespan_secs)
    }

    pub fn grace_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_duration_secs)
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Turnstile.toml (base configuration file)
    /// 2. Environment variables (prefixed with TURNSTILE_)
    /// 3. DATABASE_URL environment variable (for backwards compatibility)
    pub fn load() -> Result<Self, figment::Error> {
        let figment = Figment::new()
            // Start with defaults
            .merge(Toml::string(&toml::to_string(&Config::default()).unwrap()).nested())
            // Layer on Turnstile.toml if it exists
            .merge(Toml::file("Turnstile.toml").nested())
            // Layer on environment variables (e.g., TURNSTILE_AUTH_TOKEN_COST)
            .merge(Env::prefixed("TURNSTILE_").split("_"))
            // Special case: DATABASE_URL for backwards compatibility
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()));

        figment.extract()
    }
}
