//! Database health checks
//!
//! This module provides:
//! - a one-shot connectivity probe through a [`DatabasePool`]
//! - pool occupancy analysis
//! - a serialisable [`HealthReport`] with issues and recommendations

use crate::pool::{DatabasePool, PoolStatistics};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Overall health status (ordered from best to worst)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Minor issues detected but functional
    Degraded,
    /// Major issues, some functionality affected
    Warning,
    /// Database unusable
    Critical,
}

/// Connectivity probe results
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectivityMetrics {
    /// Whether a connection could be checked out and pinged
    pub can_connect: bool,

    /// Round-trip time of the probe in milliseconds
    pub latency_ms: Option<f64>,

    /// Database server version
    pub server_version: Option<String>,

    /// Error reported by the probe
    pub error: Option<String>,
}

/// Health issues detected during a check
#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    /// Type of issue
    pub issue_type: HealthIssueType,

    /// Severity level
    pub severity: HealthSeverity,

    /// Human-readable description
    pub description: String,

    /// Recommended action to resolve
    pub recommendation: String,
}

/// Types of health issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssueType {
    /// The pool is close to its maximum size
    PoolExhaustion,
    /// The probe could not connect
    ConnectionFailure,
    /// The probe was slow
    HighLatency,
}

/// Health issue severity levels (ordered from lowest to highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSeverity {
    /// Informational
    Low,
    /// Performance is affected
    Medium,
    /// Functionality is at risk
    High,
    /// Database unusable
    Critical,
}

/// Thresholds for determining health status
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Pool utilization % that triggers warnings
    pub pool_utilization_warning: f32,

    /// Pool utilization % that triggers critical status
    pub pool_utilization_critical: f32,

    /// Probe latency (ms) that triggers warnings
    pub latency_warning_ms: f64,

    /// Probe latency (ms) that triggers critical status
    pub latency_critical_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            pool_utilization_warning: 70.0,
            pool_utilization_critical: 90.0,
            latency_warning_ms: 100.0,
            latency_critical_ms: 500.0,
        }
    }
}

/// Result of one health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Server flavour
    pub backend: String,
    /// `host:port` that was probed
    pub endpoint: String,
    /// Probe results
    pub connectivity: ConnectivityMetrics,
    /// Pool occupancy after the probe
    pub pool: PoolStatistics,
    /// Problems found
    pub issues: Vec<HealthIssue>,
    /// When the check finished
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Whether the database is usable
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Runs health checks against a pool
#[derive(Debug, Clone, Default)]
pub struct HealthCheck {
    thresholds: HealthThresholds,
    timeout: Option<Duration>,
}

impl HealthCheck {
    /// Create a health check with custom thresholds
    #[must_use]
    pub const fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            timeout: None,
        }
    }

    /// Bound the connectivity probe
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Probe the pool and analyse the result
    pub async fn run(&self, pool: &DatabasePool) -> HealthReport {
        let connectivity = self.check_connectivity(pool).await;
        let pool_stats = pool.statistics();
        let (status, issues) = Self::analyze(&pool_stats, &connectivity, &self.thresholds);

        match status {
            HealthStatus::Healthy => debug!("Health check passed"),
            HealthStatus::Degraded => warn!("Health check shows degraded performance"),
            HealthStatus::Warning => warn!(
                "Health check shows warning status: {} issues",
                issues.len()
            ),
            HealthStatus::Critical => error!(
                "Health check shows critical status: {} issues",
                issues.len()
            ),
        }

        HealthReport {
            status,
            backend: pool.backend().to_string(),
            endpoint: pool.endpoint(),
            connectivity,
            pool: pool_stats,
            issues,
            checked_at: Utc::now(),
        }
    }

    async fn check_connectivity(&self, pool: &DatabasePool) -> ConnectivityMetrics {
        let start_time = Instant::now();

        let probe = async {
            let mut conn = pool.get().await?;
            conn.ping().await?;
            conn.server_version().await
        };
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, probe)
                .await
                .unwrap_or_else(|_| {
                    Err(crate::errors::ConnectionError::Timeout {
                        endpoint: pool.endpoint(),
                        timeout,
                    }
                    .into())
                }),
            None => probe.await,
        };
        let latency_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(version) => ConnectivityMetrics {
                can_connect: true,
                latency_ms: Some(latency_ms),
                server_version: Some(version),
                error: None,
            },
            Err(e) => {
                e.log();
                ConnectivityMetrics {
                    can_connect: false,
                    latency_ms: None,
                    server_version: None,
                    error: Some(e.user_message()),
                }
            }
        }
    }

    /// Analyze metrics and determine overall health status
    #[must_use]
    pub fn analyze(
        pool_stats: &PoolStatistics,
        connectivity: &ConnectivityMetrics,
        thresholds: &HealthThresholds,
    ) -> (HealthStatus, Vec<HealthIssue>) {
        let mut issues = Vec::new();

        if !connectivity.can_connect {
            issues.push(HealthIssue {
                issue_type: HealthIssueType::ConnectionFailure,
                severity: HealthSeverity::Critical,
                description: connectivity
                    .error
                    .clone()
                    .unwrap_or_else(|| "Cannot connect to database".to_string()),
                recommendation: "Check database server status, network connectivity and credentials"
                    .to_string(),
            });
        } else if let Some(latency) = connectivity.latency_ms {
            if latency > thresholds.latency_critical_ms {
                issues.push(HealthIssue {
                    issue_type: HealthIssueType::HighLatency,
                    severity: HealthSeverity::High,
                    description: format!("High connection latency: {latency:.1}ms"),
                    recommendation: "Check network performance and database load".to_string(),
                });
            } else if latency > thresholds.latency_warning_ms {
                issues.push(HealthIssue {
                    issue_type: HealthIssueType::HighLatency,
                    severity: HealthSeverity::Medium,
                    description: format!("Elevated connection latency: {latency:.1}ms"),
                    recommendation: "Monitor network and database performance".to_string(),
                });
            }
        }

        if pool_stats.utilization_percent > thresholds.pool_utilization_critical {
            issues.push(HealthIssue {
                issue_type: HealthIssueType::PoolExhaustion,
                severity: HealthSeverity::High,
                description: format!(
                    "Critical pool utilization: {:.1}%",
                    pool_stats.utilization_percent
                ),
                recommendation: "Increase pool.max_size or release connections sooner"
                    .to_string(),
            });
        } else if pool_stats.utilization_percent > thresholds.pool_utilization_warning {
            issues.push(HealthIssue {
                issue_type: HealthIssueType::PoolExhaustion,
                severity: HealthSeverity::Medium,
                description: format!(
                    "High pool utilization: {:.1}%",
                    pool_stats.utilization_percent
                ),
                recommendation: "Consider increasing pool.max_size".to_string(),
            });
        }

        let status = match issues.iter().map(|issue| issue.severity).max() {
            Some(HealthSeverity::Critical) => HealthStatus::Critical,
            Some(HealthSeverity::High) => HealthStatus::Warning,
            Some(HealthSeverity::Medium) => HealthStatus::Degraded,
            Some(HealthSeverity::Low) | None => HealthStatus::Healthy,
        };

        (status, issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_thresholds_default() {
        let thresholds = HealthThresholds::default();
        assert_eq!(thresholds.pool_utilization_warning, 70.0);
        assert_eq!(thresholds.pool_utilization_critical, 90.0);
    }

    #[test]
    fn test_analyze_metrics_healthy() {
        let pool_stats = PoolStatistics::new(4, 3, 10);
        let connectivity = ConnectivityMetrics {
            can_connect: true,
            latency_ms: Some(25.0),
            ..Default::default()
        };

        let (status, issues) =
            HealthCheck::analyze(&pool_stats, &connectivity, &HealthThresholds::default());

        assert_eq!(status, HealthStatus::Healthy);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_analyze_metrics_critical() {
        let pool_stats = PoolStatistics::new(10, 0, 10);
        let connectivity = ConnectivityMetrics {
            can_connect: false,
            error: Some("refused".to_string()),
            ..Default::default()
        };

        let (status, issues) =
            HealthCheck::analyze(&pool_stats, &connectivity, &HealthThresholds::default());

        assert_eq!(status, HealthStatus::Critical);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].description, "refused");
    }
}
