use std::time::Duration;

use chatgate_core::RetryPolicy;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,
    /// Webhook delivery worker pool size (default: `4`).
    pub webhook_workers: usize,
    /// Per-attempt webhook HTTP timeout in seconds (default: `10`).
    pub webhook_timeout_secs: u64,
    /// Webhook retry backoff schedule.
    pub webhook_retry_policy: RetryPolicy,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                    |
    /// |-------------------------------|----------------------------|
    /// | `HOST`                        | `0.0.0.0`                  |
    /// | `PORT`                        | `3000`                     |
    /// | `CORS_ORIGINS`                | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`                       |
    /// | `WEBHOOK_WORKERS`             | `4`                        |
    /// | `WEBHOOK_TIMEOUT_SECS`        | `10`                       |
    /// | `WEBHOOK_RETRY_SCHEDULE_SECS` | `60,300,1500,7200,36000`   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let webhook_workers: usize = std::env::var("WEBHOOK_WORKERS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("WEBHOOK_WORKERS must be a valid usize");

        let webhook_timeout_secs: u64 = std::env::var("WEBHOOK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("WEBHOOK_TIMEOUT_SECS must be a valid u64");

        let webhook_retry_policy = match std::env::var("WEBHOOK_RETRY_SCHEDULE_SECS") {
            Ok(raw) => RetryPolicy::new(
                parse_retry_schedule(&raw)
                    .expect("WEBHOOK_RETRY_SCHEDULE_SECS must be comma-separated seconds"),
            ),
            Err(_) => RetryPolicy::default(),
        };

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt,
            webhook_workers,
            webhook_timeout_secs,
            webhook_retry_policy,
        }
    }
}

/// Parse a comma-separated list of whole seconds into backoff delays.
///
/// Empty entries (`60,,300`) are rejected, not skipped.
fn parse_retry_schedule(raw: &str) -> Result<Vec<Duration>, std::num::ParseIntError> {
    raw.split(',')
        .map(|s| s.trim().parse::<u64>().map(Duration::from_secs))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_shaped_schedule() {
        let schedule = parse_retry_schedule("60,300,1500,7200,36000").unwrap();
        assert_eq!(
            schedule,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(1_500),
                Duration::from_secs(7_200),
                Duration::from_secs(36_000),
            ]
        );
        assert_eq!(RetryPolicy::new(schedule).max_attempts(), 5);
    }

    #[test]
    fn tolerates_whitespace_around_entries() {
        let schedule = parse_retry_schedule(" 5, 10 ,15 ").unwrap();
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[1], Duration::from_secs(10));
    }

    #[test]
    fn rejects_malformed_schedules() {
        assert!(parse_retry_schedule("60,,300").is_err());
        assert!(parse_retry_schedule("60,fast").is_err());
        assert!(parse_retry_schedule("").is_err());
    }
}
