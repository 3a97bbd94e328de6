//! `dblink config`: print the resolved configuration

use crate::config::Config;
use anyhow::Result;
use std::path::Path;

/// Handle config command
#[allow(clippy::disallowed_methods)]
pub fn handle_config(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let settings = config.connection_settings()?;

    println!("⚙️  dblink Configuration");
    println!("   Backend:     {}", settings.backend);
    println!("   Endpoint:    {}", settings.endpoint());
    println!("   User:        {}", settings.user);
    println!(
        "   Database:    {}",
        settings.database.as_deref().unwrap_or("(none)")
    );
    match config.database.password_env.as_deref().filter(|name| !name.is_empty()) {
        Some(password_env) => println!(
            "   Password:    [REDACTED] from {password_env} ({})",
            if settings.password.is_empty() {
                "❌ not set"
            } else {
                "✅ set"
            }
        ),
        None => println!("   Password:    None"),
    }
    println!("   Timeout:     {:?}", settings.connect_timeout);
    println!(
        "   Pool:        max_size={} min_idle={}",
        config.pool.max_size,
        config
            .pool
            .min_idle
            .map_or_else(|| "none".to_string(), |n| n.to_string())
    );
    println!("   Retry:       max_attempts={}", settings.retry.max_attempts);
    Ok(())
}
