//! Connection acquisition against unreachable and (optionally) live servers
//!
//! Live tests run only when `DBLINK_TEST_URL` points at a server, e.g.
//! `DBLINK_TEST_URL=mysql://root@127.0.0.1:3306/ DBLINK_PASSWORD=... cargo test`.

use dblink::config::{Backend, Config, ConnectionSettings};
use dblink::errors::{ConnectionError, DbLinkError};
use dblink::retry::RetryPolicy;
use dblink::{ConnectionHandle, ConnectionProvider};
use std::time::{Duration, Instant};

/// Settings for a local port nothing listens on
fn closed_port_settings(backend: Backend) -> ConnectionSettings {
    let mut config = Config::default();
    config.database.backend = backend;
    config.database.host = "127.0.0.1".to_string();
    config.database.port = Some(1);
    config.database.password_env = None;
    config.database.connect_timeout_secs = 2;
    config.connection_settings().unwrap()
}

fn live_settings() -> Option<ConnectionSettings> {
    let url = std::env::var("DBLINK_TEST_URL").ok()?;
    let mut config = Config::default();
    config.database.url = Some(url);
    Some(config.connection_settings().unwrap())
}

fn assert_unreachable_or_timeout(err: &DbLinkError) {
    assert!(
        matches!(
            err.connection_error(),
            Some(ConnectionError::Unreachable { .. } | ConnectionError::Timeout { .. })
        ),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_mysql_closed_port_reports_failure() {
    let settings = closed_port_settings(Backend::MySql);
    let err = ConnectionHandle::open(&settings).await.unwrap_err();
    assert_unreachable_or_timeout(&err);
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_postgres_closed_port_reports_failure() {
    let settings = closed_port_settings(Backend::Postgres);
    let err = ConnectionHandle::open(&settings).await.unwrap_err();
    assert_unreachable_or_timeout(&err);
}

#[tokio::test]
async fn test_provider_construction_fails_loudly() {
    let settings = closed_port_settings(Backend::MySql);
    let result = ConnectionProvider::connect(&settings).await;

    let err = result.unwrap_err();
    assert_eq!(err.context().operation, "acquire_connection");
    assert_eq!(err.context().component, "provider");

    let details = &err.context().details;
    assert_eq!(details.get("endpoint").map(String::as_str), Some("127.0.0.1:1"));
    assert_eq!(details.get("backend").map(String::as_str), Some("mysql"));
    assert_eq!(details.get("attempts").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_connect_timeout_is_applied() {
    let mut settings = closed_port_settings(Backend::MySql);
    // TEST-NET-1 (RFC 5737) is never routed
    settings.host = "192.0.2.1".to_string();
    settings.port = 3306;
    settings.connect_timeout = Duration::from_millis(200);

    let started = Instant::now();
    let err = ConnectionHandle::open(&settings).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_unreachable_or_timeout(&err);
}

#[tokio::test]
async fn test_acquire_retries_recoverable_failures() {
    let mut settings = closed_port_settings(Backend::MySql);
    settings.retry = RetryPolicy::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(10))
        .with_jitter(false);

    let started = Instant::now();
    let err = ConnectionProvider::acquire_connection(&settings)
        .await
        .unwrap_err();
    assert_unreachable_or_timeout(&err);
    // 10ms + 20ms of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(
        err.context().details.get("attempts").map(String::as_str),
        Some("3")
    );
}

#[tokio::test]
async fn test_live_connection_is_usable() {
    let Some(settings) = live_settings() else {
        println!("⚠️  DBLINK_TEST_URL not set, skipping live connection test");
        return;
    };

    let mut provider = ConnectionProvider::connect(&settings).await.unwrap();
    assert!(provider.get_connection_mut().is_valid().await);
    assert!(!provider.get_connection().server_version().is_empty());
    assert_eq!(provider.get_connection().backend(), settings.backend);
    provider.close().await.unwrap();
}

#[tokio::test]
async fn test_live_get_connection_returns_same_session() {
    let Some(settings) = live_settings() else {
        println!("⚠️  DBLINK_TEST_URL not set, skipping live session test");
        return;
    };

    let mut provider = ConnectionProvider::connect(&settings).await.unwrap();

    let first: *const ConnectionHandle = provider.get_connection();
    let first_session = provider.get_connection().session_id();
    provider.get_connection_mut().ping().await.unwrap();
    let second: *const ConnectionHandle = provider.get_connection();

    assert!(std::ptr::eq(first, second));
    assert_eq!(first_session, provider.get_connection().session_id());

    let connection = provider.into_connection();
    assert_eq!(connection.session_id(), first_session);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_live_bad_credentials_are_reported() {
    let Some(mut settings) = live_settings() else {
        println!("⚠️  DBLINK_TEST_URL not set, skipping bad credentials test");
        return;
    };
    settings.user = "dblink_no_such_user".to_string();
    settings.password = dblink::config::Secret::new("wrong".to_string());

    let err = ConnectionHandle::open(&settings).await.unwrap_err();
    assert!(
        matches!(
            err.connection_error(),
            Some(ConnectionError::AuthenticationFailed { .. })
        ),
        "unexpected error: {err:?}"
    );
    assert!(!err.is_recoverable());
}
