//! Error handling for dblink
//!
//! Every failure to establish or use a connection is surfaced to the caller
//! as a [`DbLinkError`]. Each error carries:
//! - a categorised source ([`ConfigurationError`] or [`ConnectionError`])
//! - an [`ErrorContext`] describing where it happened
//! - a severity used for logging

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::ConnectionSettings;

/// MySQL `ER_DBACCESS_DENIED_ERROR`
const MYSQL_DB_ACCESS_DENIED: u16 = 1044;
/// MySQL `ER_ACCESS_DENIED_ERROR`
const MYSQL_ACCESS_DENIED: u16 = 1045;
/// MySQL `ER_ACCESS_DENIED_NO_PASSWORD_ERROR`
const MYSQL_ACCESS_DENIED_NO_PASSWORD: u16 = 1698;

/// The main error type for dblink operations
#[derive(Debug, Clone, Error)]
pub enum DbLinkError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {source}")]
    Config {
        /// Underlying configuration problem
        source: ConfigurationError,
        /// Where the error happened
        context: Box<ErrorContext>,
    },

    /// A connection could not be established or is no longer usable
    #[error("Connection error: {source}")]
    Connection {
        /// Underlying connection problem
        source: ConnectionError,
        /// Where the error happened
        context: Box<ErrorContext>,
    },
}

/// Configuration-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The configuration file does not exist
    #[error("Configuration file not found: {path}")]
    NotFound {
        /// Path that was looked up
        path: String,
    },

    /// The configuration file exists but could not be read
    #[error("Configuration file {path} could not be read: {details}")]
    Unreadable {
        /// Path that was read
        path: String,
        /// IO error description
        details: String,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("Configuration parsing failed: {details}")]
    ParseError {
        /// Parser error description
        details: String,
    },

    /// A required setting is absent
    #[error("Missing required configuration: {field}")]
    MissingField {
        /// Name of the missing setting
        field: String,
    },

    /// A setting has a value that cannot be used
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue {
        /// Name of the offending setting
        field: String,
        /// The rejected value
        value: String,
    },

    /// A connection URL carried an inline password
    #[error("Connection URL for {field} must not embed a password; use password_env instead")]
    CredentialsInUrl {
        /// Name of the setting holding the URL
        field: String,
    },
}

/// Connection establishment and session errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The server could not be reached at the network level
    #[error("Database at {endpoint} is unreachable: {details}")]
    Unreachable {
        /// `host:port` that was dialled
        endpoint: String,
        /// Driver error description
        details: String,
    },

    /// The connection attempt did not finish in time
    #[error("Timed out after {timeout:?} connecting to {endpoint}")]
    Timeout {
        /// `host:port` that was dialled
        endpoint: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The server rejected the credentials
    #[error("Authentication failed for user '{user}' at {endpoint}")]
    AuthenticationFailed {
        /// User that attempted to log in
        user: String,
        /// `host:port` that was dialled
        endpoint: String,
    },

    /// The driver or server reported a protocol-level failure
    #[error("Protocol error: {details}")]
    Protocol {
        /// Driver error description
        details: String,
    },

    /// The session was already closed
    #[error("Connection to {endpoint} is closed")]
    Closed {
        /// `host:port` of the closed session
        endpoint: String,
    },
}

impl ConnectionError {
    /// Classify a `mysql_async` error
    #[must_use]
    pub fn from_mysql(err: &mysql_async::Error, settings: &ConnectionSettings) -> Self {
        match err {
            mysql_async::Error::Server(server)
                if matches!(
                    server.code,
                    MYSQL_DB_ACCESS_DENIED | MYSQL_ACCESS_DENIED | MYSQL_ACCESS_DENIED_NO_PASSWORD
                ) =>
            {
                Self::AuthenticationFailed {
                    user: settings.user.clone(),
                    endpoint: settings.endpoint(),
                }
            }
            mysql_async::Error::Io(io) => Self::Unreachable {
                endpoint: settings.endpoint(),
                details: io.to_string(),
            },
            mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed) => {
                Self::Closed {
                    endpoint: settings.endpoint(),
                }
            }
            other => Self::Protocol {
                details: other.to_string(),
            },
        }
    }

    /// Classify a `mysql_async` error raised on an established session
    ///
    /// A broken socket means the session is gone, not that the server is
    /// unreachable.
    #[must_use]
    pub fn from_mysql_session(err: &mysql_async::Error, endpoint: &str) -> Self {
        match err {
            mysql_async::Error::Io(_)
            | mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed) => {
                Self::Closed {
                    endpoint: endpoint.to_string(),
                }
            }
            other => Self::Protocol {
                details: other.to_string(),
            },
        }
    }

    /// Classify a `tokio-postgres` error
    #[must_use]
    pub fn from_postgres(err: &tokio_postgres::Error, settings: &ConnectionSettings) -> Self {
        use tokio_postgres::error::SqlState;

        if let Some(code) = err.code() {
            if *code == SqlState::INVALID_PASSWORD
                || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
            {
                return Self::AuthenticationFailed {
                    user: settings.user.clone(),
                    endpoint: settings.endpoint(),
                };
            }
        }

        if err.is_closed() {
            return Self::Closed {
                endpoint: settings.endpoint(),
            };
        }

        let io_cause = std::error::Error::source(err)
            .and_then(|source| source.downcast_ref::<std::io::Error>());
        match io_cause {
            Some(io) if io.kind() == std::io::ErrorKind::TimedOut => Self::Timeout {
                endpoint: settings.endpoint(),
                timeout: settings.connect_timeout,
            },
            Some(io) => Self::Unreachable {
                endpoint: settings.endpoint(),
                details: io.to_string(),
            },
            None => Self::Protocol {
                details: err.to_string(),
            },
        }
    }

    /// Severity used when this error is logged
    #[must_use]
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } => ErrorSeverity::Medium,
            Self::Closed { .. } => ErrorSeverity::Low,
            Self::Unreachable { .. } | Self::AuthenticationFailed { .. } | Self::Protocol { .. } => {
                ErrorSeverity::High
            }
        }
    }
}

/// Error context provides additional information about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation being performed when error occurred
    pub operation: String,

    /// Component where error originated
    pub component: String,

    /// Additional context information
    pub details: HashMap<String, String>,

    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Error severity level
    pub severity: ErrorSeverity,
}

/// Error severity levels (ordered from lowest to highest severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Mostly informational
    Low,

    /// May cause issues
    Medium,

    /// Affects functionality
    High,

    /// Requires immediate attention
    Critical,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new("unknown", "unknown")
    }
}

impl ErrorContext {
    /// Create a new error context
    #[must_use]
    pub fn new(operation: &str, component: &str) -> Self {
        Self {
            operation: operation.to_string(),
            component: component.to_string(),
            details: HashMap::new(),
            timestamp: chrono::Utc::now(),
            severity: ErrorSeverity::Medium,
        }
    }

    /// Set the severity level
    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Add additional context detail
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

impl From<ConfigurationError> for DbLinkError {
    fn from(source: ConfigurationError) -> Self {
        Self::Config {
            source,
            context: Box::new(ErrorContext::default().with_severity(ErrorSeverity::High)),
        }
    }
}

impl From<ConnectionError> for DbLinkError {
    fn from(source: ConnectionError) -> Self {
        let severity = source.severity();
        Self::Connection {
            source,
            context: Box::new(ErrorContext::default().with_severity(severity)),
        }
    }
}

/// Result type for dblink operations
pub type DbLinkResult<T> = Result<T, DbLinkError>;

/// Trait for adding context to errors
pub trait ErrorContextExt<T> {
    /// Record the operation and component, keeping the source's severity
    fn with_context(self, operation: &str, component: &str) -> DbLinkResult<T>;
}

impl<T, E> ErrorContextExt<T> for Result<T, E>
where
    E: Into<DbLinkError>,
{
    fn with_context(self, operation: &str, component: &str) -> DbLinkResult<T> {
        self.map_err(|e| {
            let mut error: DbLinkError = e.into();
            match &mut error {
                DbLinkError::Config { context, .. } | DbLinkError::Connection { context, .. } => {
                    context.operation = operation.to_string();
                    context.component = component.to_string();
                }
            }
            error
        })
    }
}

impl DbLinkError {
    /// Get the error context
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } | Self::Connection { context, .. } => context,
        }
    }

    /// Attach a detail to the error's context
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        match &mut self {
            Self::Config { context, .. } | Self::Connection { context, .. } => {
                context.details.insert(key.to_string(), value.to_string());
            }
        }
        self
    }

    /// The underlying connection error, if this is one
    #[must_use]
    pub const fn connection_error(&self) -> Option<&ConnectionError> {
        match self {
            Self::Connection { source, .. } => Some(source),
            Self::Config { .. } => None,
        }
    }

    /// Log the error with appropriate level based on severity
    pub fn log(&self) {
        let context = self.context();
        match context.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error = %self,
                    operation = %context.operation,
                    component = %context.component,
                    severity = %context.severity,
                    "Error occurred"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error = %self,
                    operation = %context.operation,
                    component = %context.component,
                    "Warning occurred"
                );
            }
            ErrorSeverity::Low => {
                tracing::info!(
                    error = %self,
                    operation = %context.operation,
                    component = %context.component,
                    "Info: Minor issue occurred"
                );
            }
        }
    }

    /// Get user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { source, .. } => format!("Configuration issue: {source}"),
            Self::Connection {
                source: source @ ConnectionError::AuthenticationFailed { .. },
                ..
            } => format!("{source}. Check the user and the password environment variable"),
            Self::Connection { source, .. } => format!("Database connection problem: {source}"),
        }
    }

    /// Whether retrying the same operation might succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                source: ConnectionError::Unreachable { .. } | ConnectionError::Timeout { .. },
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("acquire_connection", "provider")
            .with_severity(ErrorSeverity::High)
            .with_detail("endpoint", "localhost:3306");

        assert_eq!(ctx.operation, "acquire_connection");
        assert_eq!(ctx.component, "provider");
        assert_eq!(ctx.severity, ErrorSeverity::High);
        assert_eq!(
            ctx.details.get("endpoint"),
            Some(&"localhost:3306".to_string())
        );
    }

    #[test]
    fn test_error_recoverability() {
        let config_error: DbLinkError = ConfigurationError::NotFound {
            path: "dblink.toml".to_string(),
        }
        .into();
        assert!(!config_error.is_recoverable());

        let timeout: DbLinkError = ConnectionError::Timeout {
            endpoint: "localhost:3306".to_string(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert!(timeout.is_recoverable());

        let auth: DbLinkError = ConnectionError::AuthenticationFailed {
            user: "root".to_string(),
            endpoint: "localhost:3306".to_string(),
        }
        .into();
        assert!(!auth.is_recoverable());
    }

    fn mysql_settings() -> ConnectionSettings {
        crate::config::Config::default()
            .connection_settings_with(|_| None)
            .unwrap()
    }

    fn mysql_server_error(code: u16) -> mysql_async::Error {
        mysql_async::ServerError {
            code,
            message: "Access denied".to_string(),
            state: "28000".to_string(),
        }
        .into()
    }

    #[test]
    fn test_mysql_access_denied_codes_are_authentication_failures() {
        let settings = mysql_settings();

        for code in [1044, 1045, 1698] {
            let classified = ConnectionError::from_mysql(&mysql_server_error(code), &settings);
            assert_eq!(
                classified,
                ConnectionError::AuthenticationFailed {
                    user: "root".to_string(),
                    endpoint: "localhost:3306".to_string(),
                },
                "server error {code}"
            );
        }
    }

    #[test]
    fn test_mysql_io_error_is_unreachable() {
        let settings = mysql_settings();
        let err = mysql_async::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));

        let classified = ConnectionError::from_mysql(&err, &settings);
        assert!(matches!(
            classified,
            ConnectionError::Unreachable { ref endpoint, .. } if endpoint == "localhost:3306"
        ));
    }

    #[test]
    fn test_mysql_other_errors_are_protocol_errors() {
        let settings = mysql_settings();

        let unknown_db = ConnectionError::from_mysql(&mysql_server_error(1049), &settings);
        assert!(matches!(unknown_db, ConnectionError::Protocol { .. }));

        let out_of_order = mysql_async::Error::from(mysql_async::DriverError::PacketOutOfOrder);
        let classified = ConnectionError::from_mysql(&out_of_order, &settings);
        assert!(matches!(classified, ConnectionError::Protocol { .. }));
    }

    #[test]
    fn test_mysql_session_errors_report_closed_sockets() {
        let broken_pipe = mysql_async::Error::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert_eq!(
            ConnectionError::from_mysql_session(&broken_pipe, "db:3306"),
            ConnectionError::Closed {
                endpoint: "db:3306".to_string()
            }
        );

        let closed = mysql_async::Error::from(mysql_async::DriverError::ConnectionClosed);
        assert!(matches!(
            ConnectionError::from_mysql_session(&closed, "db:3306"),
            ConnectionError::Closed { .. }
        ));

        let server = ConnectionError::from_mysql_session(&mysql_server_error(1317), "db:3306");
        assert!(matches!(server, ConnectionError::Protocol { .. }));
    }

    #[test]
    fn test_with_detail_records_on_error_context() {
        let err: DbLinkError = ConnectionError::Closed {
            endpoint: "db:3306".to_string(),
        }
        .into();

        let err = err.with_detail("endpoint", "db:3306");
        assert_eq!(
            err.context().details.get("endpoint").map(String::as_str),
            Some("db:3306")
        );
    }

    #[test]
    fn test_with_context_keeps_severity() {
        let result: Result<(), ConnectionError> = Err(ConnectionError::Timeout {
            endpoint: "db:3306".to_string(),
            timeout: Duration::from_millis(50),
        });

        let err = result.with_context("acquire_connection", "provider").unwrap_err();
        assert_eq!(err.context().operation, "acquire_connection");
        assert_eq!(err.context().component, "provider");
        assert_eq!(err.context().severity, ErrorSeverity::Medium);
    }
}
