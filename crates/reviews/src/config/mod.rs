use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the review service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub reservations: ReservationsConfig,
    pub broker: BrokerConfig,
    pub mongo: MongoConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3005")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort { var: "APP_PORT" })?;
        let allowed_origin = env::var("APP_ALLOWED_ORIGIN")
            .ok()
            .filter(|origin| !origin.trim().is_empty());

        let log_level = var_or("APP_LOG_LEVEL", "info");

        let reservations = ReservationsConfig {
            base_url: var_or("RESERVATIONS_URL", "http://localhost:3002"),
            timeout_ms: number_var("RESERVATIONS_TIMEOUT_MS", 5_000)?,
        };

        let broker = BrokerConfig {
            host: var_or("RABBITMQ_HOST", "localhost"),
            port: var_or("RABBITMQ_PORT", "5672")
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort {
                    var: "RABBITMQ_PORT",
                })?,
            username: var_or("RABBITMQ_USERNAME", "guest"),
            password: var_or("RABBITMQ_PASSWORD", "guest"),
            timeout_ms: number_var("BROKER_TIMEOUT_MS", 3_000)?,
        };

        let mongo = MongoConfig {
            uri: var_or("MONGO_URI", "mongodb://localhost:27017"),
            database: var_or("MONGO_DB_NAME", "reviews"),
            collection: var_or("MONGO_COLLECTION_NAME", "reviews"),
        };

        Ok(Self {
            environment,
            server: ServerConfig {
                host,
                port,
                allowed_origin,
            },
            telemetry: TelemetryConfig { log_level },
            reservations,
            broker,
            mongo,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn number_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { var: name }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS; any origin when unset.
    pub allowed_origin: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the reservation service answers permission questions.
#[derive(Debug, Clone)]
pub struct ReservationsConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// RabbitMQ address and credentials.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout_ms: u64,
}

impl BrokerConfig {
    /// AMQP URI on the default vhost.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/",
            self.username, self.password, self.host, self.port
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Document store holding the review collection.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort { var: &'static str },
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort { var } => write!(f, "{var} must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var } => {
                write!(f, "{var} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort { .. } | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
