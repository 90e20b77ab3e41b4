//! Configuration for water-billing.

use crate::models::DeliveryMethod;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub billing: BillingRunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingRunConfig {
    /// Days after the period end that a bill falls due.
    pub due_days: i64,
    /// Customers rated at once; 1 keeps the run sequential.
    pub concurrency: usize,
    pub delivery_method: DeliveryMethod,
    /// Seconds between scheduled runs; 0 disables the scheduler.
    pub schedule_interval_secs: u64,
}

impl Default for BillingRunConfig {
    fn default() -> Self {
        Self {
            due_days: 30,
            concurrency: 1,
            delivery_method: DeliveryMethod::Both,
            schedule_interval_secs: 0,
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(BillingConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("water-billing"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("billing@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Water Billing"), is_prod)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            billing: BillingRunConfig {
                due_days: parse_env("BILLING_DUE_DAYS", "30", false)?,
                concurrency: parse_env::<usize>("BILLING_CONCURRENCY", "1", false)?.max(1),
                delivery_method: get_env("BILLING_DELIVERY_METHOD", Some("BOTH"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                schedule_interval_secs: parse_env("BILLING_SCHEDULE_INTERVAL_SECS", "0", false)?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "ENVIRONMENT",
        "DATABASE_URL",
        "BILLING_DUE_DAYS",
        "BILLING_CONCURRENCY",
        "BILLING_DELIVERY_METHOD",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn billing_defaults_apply_in_dev() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/water");

        let config = BillingConfig::from_env().expect("dev config should load");
        assert_eq!(config.service_name, "water-billing");
        assert_eq!(config.billing.due_days, 30);
        assert_eq!(config.billing.concurrency, 1);
        assert_eq!(config.billing.delivery_method, DeliveryMethod::Both);
        assert!(!config.smtp.enabled);
        clear();
    }

    #[test]
    #[serial]
    fn database_url_is_required() {
        clear();
        assert!(BillingConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn billing_overrides_are_parsed() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/water");
        env::set_var("BILLING_DUE_DAYS", "21");
        env::set_var("BILLING_CONCURRENCY", "0");
        env::set_var("BILLING_DELIVERY_METHOD", "portal");

        let config = BillingConfig::from_env().expect("config should load");
        assert_eq!(config.billing.due_days, 21);
        assert_eq!(config.billing.concurrency, 1);
        assert_eq!(config.billing.delivery_method, DeliveryMethod::Portal);
        clear();
    }
}
