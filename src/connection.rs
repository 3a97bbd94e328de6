//! Database connection handle
//!
//! A [`ConnectionHandle`] only exists for a session whose handshake succeeded.
//! It stays open until it is closed with [`ConnectionHandle::close`] or dropped.

use crate::config::{Backend, ConnectionSettings};
use crate::errors::{ConnectionError, DbLinkError, DbLinkResult, ErrorContextExt};
use chrono::{DateTime, Utc};
use mysql_async::prelude::Queryable;
use std::fmt;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tracing::{debug, error, info};

/// Driver-owned session state
enum Session {
    MySql(mysql_async::Conn),
    Postgres {
        client: tokio_postgres::Client,
        driver: JoinHandle<()>,
    },
}

/// An open session to a database server
pub struct ConnectionHandle {
    session: Session,
    backend: Backend,
    endpoint: String,
    session_id: u64,
    server_version: String,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// Open a new session, bounded by the settings' connect timeout
    ///
    /// This performs a single attempt. See
    /// [`ConnectionProvider::acquire_connection`](crate::ConnectionProvider::acquire_connection)
    /// for the retrying variant.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the server is unreachable, rejects the
    /// credentials, does not answer within the timeout or speaks an
    /// unexpected protocol.
    pub async fn open(settings: &ConnectionSettings) -> DbLinkResult<Self> {
        debug!(
            "Opening {} connection to {} as {}",
            settings.backend,
            settings.endpoint(),
            settings.user
        );
        let started = Instant::now();

        let attempt = async {
            match settings.backend {
                Backend::MySql => Self::open_mysql(settings).await,
                Backend::Postgres => Self::open_postgres(settings).await,
            }
        };

        let handle = match tokio::time::timeout(settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                endpoint: settings.endpoint(),
                timeout: settings.connect_timeout,
            }
            .into()),
        }
        .with_context("open", "connection")
        .map_err(|e| {
            e.with_detail("backend", &settings.backend.to_string())
                .with_detail("endpoint", &settings.endpoint())
                .with_detail("user", &settings.user)
        })?;

        info!(
            backend = %handle.backend,
            endpoint = %handle.endpoint,
            session_id = handle.session_id,
            server_version = %handle.server_version,
            "Connection established in {:?}",
            started.elapsed()
        );
        Ok(handle)
    }

    async fn open_mysql(settings: &ConnectionSettings) -> DbLinkResult<Self> {
        let conn = mysql_async::Conn::new(settings.mysql_opts())
            .await
            .map_err(|e| ConnectionError::from_mysql(&e, settings))?;

        let (major, minor, patch) = conn.server_version();
        Ok(Self {
            session_id: u64::from(conn.id()),
            session: Session::MySql(conn),
            backend: Backend::MySql,
            endpoint: settings.endpoint(),
            server_version: format!("{major}.{minor}.{patch}"),
            connected_at: Utc::now(),
        })
    }

    async fn open_postgres(settings: &ConnectionSettings) -> DbLinkResult<Self> {
        let (client, connection) = settings
            .postgres_config()
            .connect(NoTls)
            .await
            .map_err(|e| ConnectionError::from_postgres(&e, settings))?;

        let endpoint = settings.endpoint();
        let driver_endpoint = endpoint.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection to {} terminated: {}", driver_endpoint, e);
            }
        });

        let row = client
            .query_one(
                "SELECT pg_backend_pid(), current_setting('server_version')",
                &[],
            )
            .await
            .map_err(|e| ConnectionError::from_postgres(&e, settings))?;
        let pid: i32 = row
            .try_get(0)
            .map_err(|e| ConnectionError::from_postgres(&e, settings))?;
        let server_version: String = row
            .try_get(1)
            .map_err(|e| ConnectionError::from_postgres(&e, settings))?;

        Ok(Self {
            session: Session::Postgres { client, driver },
            backend: Backend::Postgres,
            endpoint,
            session_id: u64::from(pid.unsigned_abs()),
            server_version,
            connected_at: Utc::now(),
        })
    }

    /// Server flavour of this session
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// `host:port` this session is connected to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Server-side session identifier (MySQL connection id or `PostgreSQL` backend pid)
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Version string reported by the server
    #[must_use]
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// When the handshake completed
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Round-trip a liveness probe to the server
    pub async fn ping(&mut self) -> DbLinkResult<()> {
        let endpoint = &self.endpoint;
        let result: Result<(), ConnectionError> = match &mut self.session {
            Session::MySql(conn) => conn
                .ping()
                .await
                .map_err(|e| ConnectionError::from_mysql_session(&e, endpoint)),
            Session::Postgres { client, .. } if client.is_closed() => {
                Err(ConnectionError::Closed {
                    endpoint: endpoint.clone(),
                })
            }
            Session::Postgres { client, .. } => client
                .simple_query("SELECT 1")
                .await
                .map(|_| ())
                .map_err(|e| ConnectionError::Protocol {
                    details: e.to_string(),
                }),
        };
        result.with_context("ping", "connection")
    }

    /// Whether the session still answers a ping
    pub async fn is_valid(&mut self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Connection to {} is no longer valid: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Underlying `mysql_async` connection, for MySQL sessions
    pub fn as_mysql(&mut self) -> Option<&mut mysql_async::Conn> {
        match &mut self.session {
            Session::MySql(conn) => Some(conn),
            Session::Postgres { .. } => None,
        }
    }

    /// Underlying `tokio-postgres` client, for `PostgreSQL` sessions
    #[must_use]
    pub const fn as_postgres(&self) -> Option<&tokio_postgres::Client> {
        match &self.session {
            Session::Postgres { client, .. } => Some(client),
            Session::MySql(_) => None,
        }
    }

    /// Release the session with an orderly protocol-level disconnect
    pub async fn close(self) -> DbLinkResult<()> {
        debug!("Closing connection to {}", self.endpoint);
        let endpoint = self.endpoint;
        let result: Result<(), DbLinkError> = match self.session {
            Session::MySql(conn) => conn
                .disconnect()
                .await
                .map_err(|e| ConnectionError::from_mysql_session(&e, &endpoint).into()),
            Session::Postgres { client, driver } => {
                // Dropping the last client handle ends the driver task.
                drop(client);
                driver.await.map_err(|e| {
                    ConnectionError::Protocol {
                        details: format!("connection task failed: {e}"),
                    }
                    .into()
                })
            }
        };
        let result = result.with_context("close", "connection");
        if result.is_ok() {
            info!("Connection to {} closed", endpoint);
        }
        result
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("server_version", &self.server_version)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
