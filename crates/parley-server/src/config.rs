//! Layered server configuration.
//!
//! Defaults come from the `Default` impls below, then an optional JSON file,
//! then `PARLEY_`-prefixed environment variables (`__` separates sections,
//! e.g. `PARLEY_SERVER__PORT=5001`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json};
use figment::Figment;
use parley_telemetry::TelemetryConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

const ENV_PREFIX: &str = "PARLEY_";
const DEV_JWT_SECRET: &str = "parley-dev-secret-change-me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Load(Box::new(e))
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub images: ImageConfig,
    pub telemetry: TelemetryConfig,
}

/// HTTP and push-channel settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Bounded send queue per push connection.
    pub max_send_queue: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close the connection after this long without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Max request body size in bytes.
    pub max_body_bytes: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5001,
            max_send_queue: 256,
            heartbeat_interval_secs: 25,
            heartbeat_timeout_secs: 60,
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB
            cors_origins: vec![
                "http://localhost:5173".into(),
                "http://127.0.0.1:5173".into(),
            ],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub token_ttl_secs: u64,
    /// Mark the session cookie `Secure`.
    pub cookie_secure: bool,
    /// Accept the `userId` query parameter on push handshakes that carry no token.
    pub trust_query_user_id: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::from(DEV_JWT_SECRET),
            token_ttl_secs: 7 * 24 * 60 * 60,
            cookie_secure: false,
            trust_query_user_id: true,
        }
    }
}

impl AuthConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.expose_secret() == DEV_JWT_SECRET
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("parley.db"),
        }
    }
}

/// Cloudinary credentials. Uploads are disabled while `cloud_name` is empty.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub upload_preset: String,
    pub folder: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: SecretString::from(String::new()),
            upload_preset: "chat_app".into(),
            folder: "chat_images".into(),
        }
    }
}

impl ImageConfig {
    pub fn is_configured(&self) -> bool {
        !self.cloud_name.is_empty()
            && !self.api_key.is_empty()
            && !self.api_secret.expose_secret().is_empty()
    }
}

impl ParleyConfig {
    /// Build the provider stack. `path` falls back to `$PARLEY_CONFIG`.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut figment = Figment::new();
        if let Some(file) = file {
            figment = figment.merge(Json::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_send_queue == 0 {
            return Err(ConfigError::Invalid("server.max_send_queue must be > 0".into()));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.heartbeat_interval_secs must be > 0".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(ConfigError::Invalid(
                "server.heartbeat_timeout_secs must be >= heartbeat_interval_secs".into(),
            ));
        }
        if self.auth.jwt_secret.expose_secret().is_empty() {
            return Err(ConfigError::Invalid("auth.jwt_secret must not be empty".into()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("auth.token_ttl_secs must be > 0".into()));
        }
        Ok(())
    }
}
