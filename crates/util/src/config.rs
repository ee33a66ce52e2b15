use std::{env, fmt, net::SocketAddr, sync::Arc};

use super::{server_bind_address, DEFAULT_DATABASE_URL};

const SECRET_VAR: &str = "GITHUB_WEBHOOK_SECRET";
const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Shared secret used to authenticate webhook deliveries.
///
/// `Debug` output never includes the secret bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(Arc<[u8]>);

impl WebhookSecret {
    pub fn new(value: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn shared(&self) -> Arc<[u8]> {
        self.0.clone()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub webhook_secret: WebhookSecret,
    pub database_url: String,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let secret = env::var(SECRET_VAR).map_err(|_| ConfigError::MissingVariable(SECRET_VAR))?;
        if secret.is_empty() {
            return Err(ConfigError::EmptyVariable(SECRET_VAR));
        }

        let database_url = match env::var(DATABASE_URL_VAR) {
            Ok(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyVariable(DATABASE_URL_VAR))
            }
            Ok(value) => value,
            Err(_) => DEFAULT_DATABASE_URL.to_string(),
        };

        Ok(Self {
            bind_addr,
            environment,
            webhook_secret: WebhookSecret::new(secret),
            database_url,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    EmptyVariable(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(name) => write!(f, "{name} must be set"),
            Self::EmptyVariable(name) => write!(f, "{name} must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
