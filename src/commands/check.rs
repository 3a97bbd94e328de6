//! `dblink check`: acquire a single connection and release it

use crate::config::Config;
use crate::provider::ConnectionProvider;
use anyhow::Result;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Handle check command
#[allow(clippy::disallowed_methods)]
pub async fn handle_check(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let settings = config.connection_settings()?;

    println!("🔌 Connecting to {}", settings.redacted_url());

    let started = Instant::now();
    let mut provider = ConnectionProvider::connect(&settings).await.map_err(|e| {
        println!("   Connection:  ❌ {}", e.user_message());
        anyhow::Error::new(e)
    })?;
    let elapsed = started.elapsed();

    let connection = provider.get_connection();
    println!("   Backend:     {}", connection.backend());
    println!("   Endpoint:    {}", connection.endpoint());
    println!("   Server:      {}", connection.server_version());
    println!("   Session:     {}", connection.session_id());
    println!("   Connected:   ✅ in {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    provider.get_connection_mut().ping().await?;
    println!("   Ping:        ✅");

    provider.close().await?;
    info!("Connection check completed");
    println!("✅ Connection released");
    Ok(())
}
