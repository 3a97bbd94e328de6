//! Connection provider
//!
//! Owns exactly one [`ConnectionHandle`] for its whole lifetime. Construction
//! either yields a provider with an open session or fails with a typed error.
//! There is no state in which a provider holds an unusable handle.
//!
//! ```rust,no_run
//! use dblink::{Config, ConnectionProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Config::load(None)?.connection_settings()?;
//! let mut provider = ConnectionProvider::connect(&settings).await?;
//! println!("server {}", provider.get_connection().server_version());
//! provider.get_connection_mut().ping().await?;
//! provider.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ConnectionSettings;
use crate::connection::ConnectionHandle;
use crate::errors::{DbLinkResult, ErrorContextExt};
use crate::retry::RetryResult;
use tracing::{error, info};

/// Holds one open connection to a preconfigured endpoint
#[derive(Debug)]
pub struct ConnectionProvider {
    connection: ConnectionHandle,
}

impl ConnectionProvider {
    /// Acquire a connection and keep it for the provider's lifetime
    pub async fn connect(settings: &ConnectionSettings) -> DbLinkResult<Self> {
        let connection = Self::acquire_connection(settings).await?;
        Ok(Self { connection })
    }

    /// Wrap a connection that was opened elsewhere
    #[must_use]
    pub const fn from_connection(connection: ConnectionHandle) -> Self {
        Self { connection }
    }

    /// Open a new connection, applying the connect timeout and retry policy
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt when every attempt fails. The
    /// failure is also logged, but never only logged.
    pub async fn acquire_connection(settings: &ConnectionSettings) -> DbLinkResult<ConnectionHandle> {
        info!(
            "Acquiring connection to {} (max_attempts={})",
            settings.redacted_url(),
            settings.retry.max_attempts
        );

        let result = match settings.retry.execute(|| ConnectionHandle::open(settings)).await {
            RetryResult::Success(connection) => Ok(connection),
            RetryResult::Failed {
                last_error,
                attempts,
                ..
            } => Err(last_error.with_detail("attempts", &attempts.to_string())),
        }
        .with_context("acquire_connection", "provider");

        if let Err(e) = &result {
            error!("Failed to acquire connection to {}: {}", settings.endpoint(), e);
        }
        result
    }

    /// The connection acquired at construction
    ///
    /// Every call returns the same session; nothing reconnects behind the
    /// caller's back.
    #[must_use]
    pub const fn get_connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Mutable access to the connection, for pings and driver calls
    pub fn get_connection_mut(&mut self) -> &mut ConnectionHandle {
        &mut self.connection
    }

    /// Give up the provider and keep the connection
    #[must_use]
    pub fn into_connection(self) -> ConnectionHandle {
        self.connection
    }

    /// Release the connection explicitly
    pub async fn close(self) -> DbLinkResult<()> {
        self.connection.close().await
    }
}
