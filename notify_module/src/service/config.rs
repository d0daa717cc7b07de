use std::env;
use std::str::FromStr;
use std::time::Duration;

use cron::Schedule;

use crate::jobs::{RECALL_BATCH_LIMIT, RECALL_DORMANT_DAYS};

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 1024 * 1024;

/// Every hour on the hour.
const DEFAULT_AFTERCARE_CRON: &str = "0 0 * * * *";
/// Daily at 09:00.
const DEFAULT_RECALL_CRON: &str = "0 0 9 * * *";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub channel_api_base_url: String,
    pub inbound_body_max_bytes: usize,
    pub job_poll_interval: Duration,
    pub aftercare_cron: Schedule,
    pub recall_cron: Schedule,
    pub recall_dormant_days: i64,
    pub recall_batch_limit: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("NOTIFY_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("NOTIFY_SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);

        let database_url = env::var("DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or("DATABASE_URL is not set")?;

        let channel_api_base_url = env::var("CHANNEL_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.line.me/v2/bot".to_string());

        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        let job_poll_interval = env::var("JOB_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(5));

        let aftercare_cron = parse_cron("AFTERCARE_CRON", DEFAULT_AFTERCARE_CRON)?;
        let recall_cron = parse_cron("RECALL_CRON", DEFAULT_RECALL_CRON)?;

        let recall_dormant_days = env::var("RECALL_DORMANT_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(RECALL_DORMANT_DAYS);

        let recall_batch_limit = env::var("RECALL_BATCH_LIMIT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(RECALL_BATCH_LIMIT)
            .min(RECALL_BATCH_LIMIT);

        Ok(Self {
            host,
            port,
            database_url,
            channel_api_base_url,
            inbound_body_max_bytes,
            job_poll_interval,
            aftercare_cron,
            recall_cron,
            recall_dormant_days,
            recall_batch_limit,
        })
    }
}

fn parse_cron(key: &str, default: &str) -> Result<Schedule, BoxError> {
    let expression = env::var(key).unwrap_or_else(|_| default.to_string());
    Schedule::from_str(&expression)
        .map_err(|err| format!("invalid cron expression in {}: {}", key, err).into())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for key in [
            "NOTIFY_SERVICE_HOST",
            "NOTIFY_SERVICE_PORT",
            "DATABASE_URL",
            "CHANNEL_API_BASE_URL",
            "INBOUND_BODY_MAX_BYTES",
            "JOB_POLL_INTERVAL_SECS",
            "AFTERCARE_CRON",
            "RECALL_CRON",
            "RECALL_DORMANT_DAYS",
            "RECALL_BATCH_LIMIT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_bare() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/notify");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.channel_api_base_url, "https://api.line.me/v2/bot");
        assert_eq!(config.recall_dormant_days, RECALL_DORMANT_DAYS);
        assert_eq!(config.recall_batch_limit, RECALL_BATCH_LIMIT);
        assert_eq!(config.job_poll_interval, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        clear_env();
        assert!(ServiceConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn invalid_cron_is_a_load_time_error() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/notify");
        env::set_var("RECALL_CRON", "not a cron");

        let err = ServiceConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("RECALL_CRON"));
        env::remove_var("RECALL_CRON");
    }

    #[test]
    #[serial]
    fn batch_limit_is_capped_at_provider_limit() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/notify");
        env::set_var("RECALL_BATCH_LIMIT", "9999");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.recall_batch_limit, RECALL_BATCH_LIMIT);
        env::remove_var("RECALL_BATCH_LIMIT");
    }
}
