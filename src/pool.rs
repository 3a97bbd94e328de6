//! # Managed Connection Pool
//!
//! Provides pooled connections for MySQL and `PostgreSQL` using bb8. Use this
//! instead of a single [`ConnectionHandle`](crate::ConnectionHandle) when many
//! tasks need database sessions at once.
//!
//! The pool is built lazily. No connection is opened until the first
//! checkout, and connections are validated with a ping before they are
//! handed out.
//!
//! bb8 only reports a timeout to the caller of `get`. Failed connection
//! attempts are routed back through an error sink instead, so a checkout
//! ends as soon as the server refuses a new session and reports why.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dblink::{Config, DatabasePool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let pool = DatabasePool::connect(&config).await?;
//! let mut conn = pool.get().await?;
//! conn.ping().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{Backend, Config, ConnectionSettings};
use crate::errors::{ConnectionError, DbLinkResult, ErrorContextExt};
use crate::mysql::MySqlConnectionManager;
use bb8::{ErrorSink, Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use mysql_async::prelude::Queryable;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Failures buffered for checkouts that are still waiting
const FAILURE_CHANNEL_CAPACITY: usize = 16;

type PostgresPool = Pool<PostgresConnectionManager<NoTls>>;
type MySqlPool = Pool<MySqlConnectionManager>;

#[derive(Clone)]
enum PoolInner {
    MySql(MySqlPool),
    Postgres(PostgresPool),
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DatabasePool {
    inner: PoolInner,
    settings: ConnectionSettings,
    max_size: u32,
    acquire_timeout: Duration,
    failures: broadcast::Sender<ConnectionError>,
}

/// Forwards connection failures seen inside bb8 to waiting checkouts
#[derive(Debug, Clone)]
struct FailureSink {
    settings: ConnectionSettings,
    failures: broadcast::Sender<ConnectionError>,
}

impl FailureSink {
    fn forward(&self, failure: ConnectionError) {
        debug!(
            "Pooled connection to {} failed: {}",
            self.settings.endpoint(),
            failure
        );
        // No receiver just means no checkout is waiting right now.
        let _ = self.failures.send(failure);
    }
}

impl ErrorSink<mysql_async::Error> for FailureSink {
    fn sink(&self, error: mysql_async::Error) {
        self.forward(ConnectionError::from_mysql(&error, &self.settings));
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<mysql_async::Error>> {
        Box::new(self.clone())
    }
}

impl ErrorSink<tokio_postgres::Error> for FailureSink {
    fn sink(&self, error: tokio_postgres::Error) {
        self.forward(ConnectionError::from_postgres(&error, &self.settings));
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<tokio_postgres::Error>> {
        Box::new(self.clone())
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStatistics {
    /// Open connections, idle or checked out
    pub connections: u32,
    /// Open connections waiting in the pool
    pub idle_connections: u32,
    /// Connections currently checked out
    pub in_use: u32,
    /// Configured maximum
    pub max_size: u32,
    /// `in_use / max_size` as a percentage (0-100)
    pub utilization_percent: f32,
}

impl PoolStatistics {
    /// Compute statistics from raw bb8 counters
    #[must_use]
    pub fn new(connections: u32, idle_connections: u32, max_size: u32) -> Self {
        let in_use = connections.saturating_sub(idle_connections);
        #[allow(clippy::cast_precision_loss)]
        let utilization_percent = if max_size == 0 {
            0.0
        } else {
            in_use as f32 / max_size as f32 * 100.0
        };
        Self {
            connections,
            idle_connections,
            in_use,
            max_size,
            utilization_percent,
        }
    }
}

impl DatabasePool {
    /// Create a pool from configuration without opening any connection
    ///
    /// Must be called from within a tokio runtime; bb8 spawns its
    /// maintenance task on construction.
    pub fn from_config(config: &Config) -> DbLinkResult<Self> {
        let settings = config
            .connection_settings()
            .with_context("from_config", "pool")?;
        Ok(Self::with_settings(settings, config))
    }

    /// Create a pool and verify that one connection can be established
    ///
    /// # Errors
    ///
    /// Returns the classified error of the first failed connection attempt,
    /// without waiting for the acquire timeout.
    pub async fn connect(config: &Config) -> DbLinkResult<Self> {
        let pool = Self::from_config(config)?;
        pool.ping().await?;
        info!(
            "Connection pool to {} verified (max_size={})",
            pool.settings.endpoint(),
            pool.max_size
        );
        Ok(pool)
    }

    fn with_settings(settings: ConnectionSettings, config: &Config) -> Self {
        let max_size = config.pool.max_size;
        let acquire_timeout = Duration::from_secs(config.pool.acquire_timeout_secs);

        debug!(
            "Building {} connection pool for {} with max_size={}",
            settings.backend,
            settings.endpoint(),
            max_size
        );

        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let sink = FailureSink {
            settings: settings.clone(),
            failures: failures.clone(),
        };

        let inner = match settings.backend {
            Backend::MySql => {
                let manager = MySqlConnectionManager::new(settings.mysql_opts());
                PoolInner::MySql(
                    Pool::builder()
                        .max_size(max_size)
                        .min_idle(config.pool.min_idle)
                        .connection_timeout(acquire_timeout)
                        .test_on_check_out(true)
                        .retry_connection(false)
                        .error_sink(Box::new(sink))
                        .build_unchecked(manager),
                )
            }
            Backend::Postgres => {
                let manager = PostgresConnectionManager::new(settings.postgres_config(), NoTls);
                PoolInner::Postgres(
                    Pool::builder()
                        .max_size(max_size)
                        .min_idle(config.pool.min_idle)
                        .connection_timeout(acquire_timeout)
                        .test_on_check_out(true)
                        .retry_connection(false)
                        .error_sink(Box::new(sink))
                        .build_unchecked(manager),
                )
            }
        };

        Self {
            inner,
            settings,
            max_size,
            acquire_timeout,
            failures,
        }
    }

    /// Server flavour of the pooled connections
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.settings.backend
    }

    /// `host:port` the pool connects to
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.settings.endpoint()
    }

    /// Check out a connection
    ///
    /// # Errors
    ///
    /// Returns the classified driver error as soon as an attempt to open a
    /// new connection fails, or [`ConnectionError::Timeout`] when no
    /// connection becomes available within the acquire timeout.
    pub async fn get(&self) -> DbLinkResult<PooledHandle<'_>> {
        let mut failures = self.failures.subscribe();
        let mut last_failure = None;

        let checkout = async {
            match &self.inner {
                PoolInner::MySql(pool) => pool
                    .get()
                    .await
                    .map(PooledSession::MySql)
                    .map_err(|e| match e {
                        RunError::User(e) => Some(ConnectionError::from_mysql(&e, &self.settings)),
                        RunError::TimedOut => None,
                    }),
                PoolInner::Postgres(pool) => pool
                    .get()
                    .await
                    .map(PooledSession::Postgres)
                    .map_err(|e| match e {
                        RunError::User(e) => {
                            Some(ConnectionError::from_postgres(&e, &self.settings))
                        }
                        RunError::TimedOut => None,
                    }),
            }
        };

        let outcome = tokio::select! {
            biased;
            outcome = checkout => outcome,
            failure = next_connect_failure(&mut failures, &mut last_failure) => Err(Some(failure)),
        };

        outcome
            .map(|session| PooledHandle {
                session,
                endpoint: self.settings.endpoint(),
            })
            .map_err(|failure| {
                while let Ok(late) = failures.try_recv() {
                    last_failure = Some(late);
                }
                failure
                    .or(last_failure)
                    .unwrap_or_else(|| ConnectionError::Timeout {
                        endpoint: self.settings.endpoint(),
                        timeout: self.acquire_timeout,
                    })
            })
            .with_context("get", "pool")
    }

    /// Check out a connection and round-trip a liveness probe
    pub async fn ping(&self) -> DbLinkResult<()> {
        let mut conn = self.get().await?;
        conn.ping().await
    }

    /// Current pool occupancy
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        let state = match &self.inner {
            PoolInner::MySql(pool) => pool.state(),
            PoolInner::Postgres(pool) => pool.state(),
        };
        PoolStatistics::new(state.connections, state.idle_connections, self.max_size)
    }
}

/// Wait for a failure that means no new session can be opened right now
///
/// Closed sessions come from validating stale idle connections; bb8 replaces
/// those on its own, so they are remembered but not waited on.
async fn next_connect_failure(
    failures: &mut broadcast::Receiver<ConnectionError>,
    last_failure: &mut Option<ConnectionError>,
) -> ConnectionError {
    loop {
        match failures.recv().await {
            Ok(failure @ ConnectionError::Closed { .. }) => *last_failure = Some(failure),
            Ok(failure) => return failure,
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

enum PooledSession<'a> {
    MySql(PooledConnection<'a, MySqlConnectionManager>),
    Postgres(PooledConnection<'a, PostgresConnectionManager<NoTls>>),
}

/// A connection checked out of a [`DatabasePool`]
///
/// Returned to the pool when dropped.
pub struct PooledHandle<'a> {
    session: PooledSession<'a>,
    endpoint: String,
}

impl PooledHandle<'_> {
    /// Round-trip a liveness probe
    pub async fn ping(&mut self) -> DbLinkResult<()> {
        let endpoint = &self.endpoint;
        let result = match &mut self.session {
            PooledSession::MySql(conn) => conn
                .ping()
                .await
                .map_err(|e| ConnectionError::from_mysql_session(&e, endpoint)),
            PooledSession::Postgres(client) => client
                .simple_query("SELECT 1")
                .await
                .map(|_| ())
                .map_err(|e| {
                    if e.is_closed() {
                        ConnectionError::Closed {
                            endpoint: endpoint.clone(),
                        }
                    } else {
                        ConnectionError::Protocol {
                            details: e.to_string(),
                        }
                    }
                }),
        };
        result.with_context("ping", "pool")
    }

    /// Underlying `mysql_async` connection, for MySQL pools
    pub fn as_mysql(&mut self) -> Option<&mut mysql_async::Conn> {
        match &mut self.session {
            PooledSession::MySql(conn) => Some(&mut **conn),
            PooledSession::Postgres(_) => None,
        }
    }

    /// Underlying `tokio-postgres` client, for `PostgreSQL` pools
    #[must_use]
    pub fn as_postgres(&self) -> Option<&tokio_postgres::Client> {
        match &self.session {
            PooledSession::Postgres(client) => Some(&**client),
            PooledSession::MySql(_) => None,
        }
    }

    /// Version string reported by the server
    pub async fn server_version(&mut self) -> DbLinkResult<String> {
        let result = match &mut self.session {
            PooledSession::MySql(conn) => {
                let (major, minor, patch) = conn.server_version();
                Ok(format!("{major}.{minor}.{patch}"))
            }
            PooledSession::Postgres(client) => client
                .query_one("SELECT current_setting('server_version')", &[])
                .await
                .and_then(|row| row.try_get::<_, String>(0))
                .map_err(|e| ConnectionError::Protocol {
                    details: e.to_string(),
                }),
        };
        result.with_context("server_version", "pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_statistics_utilization() {
        let stats = PoolStatistics::new(8, 5, 10);
        assert_eq!(stats.in_use, 3);
        assert!((stats.utilization_percent - 30.0).abs() < f32::EPSILON);

        let empty = PoolStatistics::new(0, 0, 0);
        assert_eq!(empty.utilization_percent, 0.0);
    }

    #[tokio::test]
    async fn test_connect_failure_wait_skips_closed_sessions() {
        let (sender, mut receiver) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let mut last_failure = None;

        sender
            .send(ConnectionError::Closed {
                endpoint: "db:3306".to_string(),
            })
            .unwrap();
        sender
            .send(ConnectionError::AuthenticationFailed {
                user: "root".to_string(),
                endpoint: "db:3306".to_string(),
            })
            .unwrap();

        let failure = next_connect_failure(&mut receiver, &mut last_failure).await;
        assert!(matches!(failure, ConnectionError::AuthenticationFailed { .. }));
        assert!(matches!(last_failure, Some(ConnectionError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_from_config_is_lazy() {
        let mut config = Config::default();
        config.database.port = Some(1);
        config.database.password_env = None;

        let pool = DatabasePool::from_config(&config).unwrap();
        let stats = pool.statistics();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.max_size, 10);
        assert_eq!(pool.endpoint(), "localhost:1");
    }
}
