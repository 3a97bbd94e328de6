//! `dblink health`: probe the database through a pool

use crate::config::Config;
use crate::health::{HealthCheck, HealthStatus};
use crate::pool::DatabasePool;
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

/// Handle health command
#[allow(clippy::disallowed_methods)]
pub async fn handle_health(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let pool = DatabasePool::from_config(&config)?;

    let timeout = Duration::from_secs(config.database.connect_timeout_secs);
    let report = HealthCheck::default().with_timeout(timeout).run(&pool).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let icon = match report.status {
            HealthStatus::Healthy => "✅",
            HealthStatus::Degraded => "⚠️ ",
            HealthStatus::Warning => "🟠",
            HealthStatus::Critical => "❌",
        };
        println!("📊 dblink Health");
        println!("   Status:      {icon} {:?}", report.status);
        println!("   Endpoint:    {} ({})", report.endpoint, report.backend);
        if let Some(version) = &report.connectivity.server_version {
            println!("   Server:      {version}");
        }
        if let Some(latency) = report.connectivity.latency_ms {
            println!("   Latency:     {latency:.1}ms");
        }
        println!(
            "   Pool:        {}/{} in use ({} idle)",
            report.pool.in_use, report.pool.max_size, report.pool.idle_connections
        );
        for issue in &report.issues {
            println!("   Issue:       {}", issue.description);
            println!("                → {}", issue.recommendation);
        }
    }

    if report.is_healthy() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Database is not healthy: {:?}", report.status))
    }
}
