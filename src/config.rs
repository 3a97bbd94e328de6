//! Configuration loading for dblink
//!
//! Settings are layered in this order:
//! 1. built-in defaults (a local MySQL server on its standard port)
//! 2. a TOML file (`dblink.toml` by default)
//! 3. `DBLINK_*` environment variables
//!
//! The password is never part of the file. It is read from the environment
//! variable named by `password_env` when the settings are resolved.

use crate::errors::ConfigurationError;
use crate::retry::RetryPolicy;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "dblink.toml";

/// Environment variable holding the password unless configured otherwise
pub const DEFAULT_PASSWORD_ENV: &str = "DBLINK_PASSWORD";

/// Database server flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// MySQL or MariaDB
    #[default]
    #[serde(alias = "mariadb")]
    MySql,
    /// `PostgreSQL`
    #[serde(alias = "postgresql")]
    Postgres,
}

impl Backend {
    /// Standard server port
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }

    /// Administrative user the server ships with
    #[must_use]
    pub const fn default_user(self) -> &'static str {
        match self {
            Self::MySql => "root",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigurationError::InvalidValue {
                field: "database.backend".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Main configuration structure for dblink
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Database endpoint and credentials
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Managed pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Retry settings for connection establishment
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Database connection configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Server flavour
    #[serde(default)]
    pub backend: Backend,
    /// Database host
    #[serde(default = "default_host")]
    pub host: String,
    /// Database port, defaults to the backend's standard port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database user, defaults to the backend's administrative user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Environment variable containing the password, empty for none
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    /// Database (schema) to select after connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Seconds to wait for the connect handshake
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// `mysql://` or `postgres://` URL overriding the discrete fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Managed pool configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Idle connections kept warm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_idle: Option<u32>,
    /// Seconds to wait for a connection to be checked out
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Retry configuration for connection establishment
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, 1 disables retrying
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_password_env() -> Option<String> {
    Some(DEFAULT_PASSWORD_ENV.to_string())
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_max_size() -> u32 {
    10
}

const fn default_acquire_timeout_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    1
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            host: default_host(),
            port: None,
            user: None,
            password_env: default_password_env(),
            database: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            url: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: None,
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigurationError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigurationError::Unreadable {
                    path: path.display().to_string(),
                    details: e.to_string(),
                }
            }
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(contents).map_err(|e| ConfigurationError::ParseError {
            details: e.to_string(),
        })
    }

    /// Load the effective configuration
    ///
    /// Reads `path` if given, otherwise `dblink.toml` when it exists, otherwise
    /// starts from defaults. Environment overrides are applied last and the
    /// result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                debug!("Loading configuration from {}", DEFAULT_CONFIG_FILE);
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DBLINK_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigurationError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply `DBLINK_*` overrides using `lookup` to read variables
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = &mut self.database;

        if let Some(url) = lookup("DBLINK_URL") {
            debug!("Overriding database.url from DBLINK_URL");
            db.url = Some(url);
        }
        if let Some(backend) = lookup("DBLINK_BACKEND") {
            db.backend = backend.parse()?;
        }
        if let Some(host) = lookup("DBLINK_HOST") {
            db.host = host;
        }
        if let Some(port) = lookup("DBLINK_PORT") {
            db.port = Some(port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "DBLINK_PORT".to_string(),
                value: port.clone(),
            })?);
        }
        if let Some(user) = lookup("DBLINK_USER") {
            db.user = Some(user);
        }
        if let Some(database) = lookup("DBLINK_DATABASE") {
            db.database = Some(database);
        }
        Ok(())
    }

    /// Check values that deserialization alone cannot rule out
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.url.is_none() && self.database.host.trim().is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "database.host".to_string(),
            });
        }
        if self.database.port == Some(0) {
            return Err(invalid("database.port", "0"));
        }
        if self.database.connect_timeout_secs == 0 {
            return Err(invalid("database.connect_timeout_secs", "0"));
        }
        if self.pool.max_size == 0 {
            return Err(invalid("pool.max_size", "0"));
        }
        if let Some(min_idle) = self.pool.min_idle {
            if min_idle > self.pool.max_size {
                return Err(invalid("pool.min_idle", &min_idle.to_string()));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0"));
        }
        Ok(())
    }

    /// Resolve everything needed to open a connection, reading the password
    /// from the process environment
    pub fn connection_settings(&self) -> Result<ConnectionSettings, ConfigurationError> {
        self.connection_settings_with(|key| env::var(key).ok())
    }

    /// Resolve connection settings using `lookup` to read the password variable
    pub fn connection_settings_with<F>(
        &self,
        lookup: F,
    ) -> Result<ConnectionSettings, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = &self.database;
        let endpoint = match &db.url {
            Some(url) => Endpoint::from_url(url)?,
            None => Endpoint {
                backend: db.backend,
                host: db.host.clone(),
                port: db.port.unwrap_or_else(|| db.backend.default_port()),
                user: db
                    .user
                    .clone()
                    .unwrap_or_else(|| db.backend.default_user().to_string()),
                database: db.database.clone(),
            },
        };

        if endpoint.host.trim().is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "database.host".to_string(),
            });
        }
        if endpoint.port == 0 {
            return Err(invalid("database.port", "0"));
        }

        let password = db
            .password_env
            .as_deref()
            .filter(|name| !name.is_empty())
            .map_or_else(Secret::default, |password_env| {
                debug!("Reading password from environment variable: {}", password_env);
                lookup(password_env).map_or_else(
                    || {
                        warn!(
                            "Environment variable {} not found, using empty password",
                            password_env
                        );
                        Secret::default()
                    },
                    Secret::new,
                )
            });

        Ok(ConnectionSettings {
            backend: endpoint.backend,
            host: endpoint.host,
            port: endpoint.port,
            user: endpoint.user,
            password,
            database: endpoint.database,
            connect_timeout: Duration::from_secs(db.connect_timeout_secs),
            retry: RetryPolicy::from_config(&self.retry),
        })
    }
}

fn invalid(field: &str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Where to connect and as whom, without the password
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    backend: Backend,
    host: String,
    port: u16,
    user: String,
    database: Option<String>,
}

impl Endpoint {
    fn from_url(raw: &str) -> Result<Self, ConfigurationError> {
        let url = Url::parse(raw).map_err(|e| invalid("database.url", &e.to_string()))?;

        let backend: Backend = url
            .scheme()
            .parse()
            .map_err(|_| invalid("database.url", &format!("unsupported scheme '{}'", url.scheme())))?;

        if url.password().is_some() {
            return Err(ConfigurationError::CredentialsInUrl {
                field: "database.url".to_string(),
            });
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map_or_else(default_host, |h| {
                h.trim_start_matches('[').trim_end_matches(']').to_string()
            });
        let user = if url.username().is_empty() {
            backend.default_user().to_string()
        } else {
            decode_component(url.username())?
        };
        let database = Some(url.path().trim_start_matches('/'))
            .filter(|db| !db.is_empty())
            .map(decode_component)
            .transpose()?;

        Ok(Self {
            backend,
            host,
            port: url.port().unwrap_or_else(|| backend.default_port()),
            user,
            database,
        })
    }
}

/// Undo URL percent-encoding in a user or database name
fn decode_component(raw: &str) -> Result<String, ConfigurationError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| invalid("database.url", &format!("'{raw}' is not valid UTF-8 once decoded")))
}

/// A password that never appears in `Debug` or `Display` output
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Access the raw value, only for handing it to a driver
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no password is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Fully resolved parameters for opening one connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Server flavour
    pub backend: Backend,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Login password
    pub password: Secret,
    /// Database selected after login
    pub database: Option<String>,
    /// Deadline for the connect handshake
    pub connect_timeout: Duration,
    /// Retry policy for establishing the connection
    pub retry: RetryPolicy,
}

impl ConnectionSettings {
    /// `host:port`, safe to log
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection URL without the password, safe to log
    #[must_use]
    pub fn redacted_url(&self) -> String {
        format!(
            "{}://{}@{}/{}",
            self.backend,
            self.user,
            self.endpoint(),
            self.database.as_deref().unwrap_or_default()
        )
    }

    /// Options for `mysql_async`
    #[must_use]
    pub fn mysql_opts(&self) -> mysql_async::Opts {
        let password = (!self.password.is_empty()).then(|| self.password.expose().to_string());
        mysql_async::OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(password)
            .db_name(self.database.clone())
            .into()
    }

    /// Options for `tokio-postgres`
    #[must_use]
    pub fn postgres_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .connect_timeout(self.connect_timeout)
            .application_name("dblink");
        if !self.password.is_empty() {
            config.password(self.password.expose());
        }
        if let Some(database) = &self.database {
            config.dbname(database);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_target_local_mysql() {
        let settings = Config::default().connection_settings_with(no_env).unwrap();
        assert_eq!(settings.backend, Backend::MySql);
        assert_eq!(settings.endpoint(), "localhost:3306");
        assert_eq!(settings.user, "root");
        assert!(settings.password.is_empty());
        assert_eq!(settings.database, None);
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_postgres_backend_defaults() {
        let mut config = Config::default();
        config.database.backend = Backend::Postgres;
        let settings = config.connection_settings_with(no_env).unwrap();
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.user, "postgres");
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2".to_string());
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_ipv6_endpoint_is_bracketed() {
        let mut config = Config::default();
        config.database.host = "::1".to_string();
        let settings = config.connection_settings_with(no_env).unwrap();
        assert_eq!(settings.endpoint(), "[::1]:3306");
    }
}
