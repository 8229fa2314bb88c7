use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Maintenance,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Health report for one exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeHealth {
    pub status: HealthStatus,
    pub avg_response_time_ms: f64,
    pub uptime_percent: f64,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

impl ExchangeHealth {
    /// Report used when the health check itself failed or timed out.
    pub fn unhealthy(consecutive_failures: u32) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            avg_response_time_ms: 0.0,
            uptime_percent: 0.0,
            consecutive_failures,
            last_check: Utc::now(),
        }
    }
}
