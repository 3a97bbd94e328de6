//! `dblink` - Configuration-driven database connections
//!
//! Opens sessions to MySQL or `PostgreSQL` servers using settings from a TOML
//! file and the environment. Connection failures are always returned to the
//! caller as typed errors.

#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/// Command line interface definition
pub mod cli;
/// CLI command handlers
pub mod commands;
/// Configuration management for dblink
pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod mysql;
pub mod pool;
pub mod provider;
pub mod retry;

pub use config::{Backend, Config, ConnectionSettings};
pub use connection::ConnectionHandle;
pub use errors::{ConnectionError, DbLinkError, DbLinkResult};
pub use pool::DatabasePool;
pub use provider::ConnectionProvider;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
