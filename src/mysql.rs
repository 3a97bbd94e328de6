//! bb8 connection manager for `mysql_async`
//!
//! Plays the role `bb8-postgres` plays for `PostgreSQL`: it opens connections
//! from a fixed set of options and validates them with a ping. A failed ping
//! on a broken socket is reported as `DriverError::ConnectionClosed`.

use bb8::ManageConnection;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, DriverError, Error, Opts};

/// A `bb8::ManageConnection` for MySQL servers
#[derive(Debug, Clone)]
pub struct MySqlConnectionManager {
    opts: Opts,
}

impl MySqlConnectionManager {
    /// Create a manager that connects with `opts`
    #[must_use]
    pub const fn new(opts: Opts) -> Self {
        Self { opts }
    }

    /// Options every new connection is opened with
    #[must_use]
    pub const fn opts(&self) -> &Opts {
        &self.opts
    }
}

impl ManageConnection for MySqlConnectionManager {
    type Connection = Conn;
    type Error = Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Conn::new(self.opts.clone()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        // A dead socket on a pooled session is a closed session, not an
        // unreachable server.
        conn.ping().await.map_err(|e| match e {
            Error::Io(_) => DriverError::ConnectionClosed.into(),
            other => other,
        })
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // mysql_async reports a dead socket on the next round trip only
        false
    }
}
