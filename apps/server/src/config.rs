use anyhow::{anyhow, Context};
use chrono::Weekday;
use std::time::Duration;

use crate::rate_limit::{RateLimit, RateLimits};
use crate::schedule::generator::ScheduleRules;
use crate::schedule::ledger::BookingPolicy;
use crate::schedule::slot::{parse_time, Minute};

const DEFAULT_DATABASE_URL: &str = "sqlite:slotbook.db?mode=rwc";
const DEFAULT_PROVIDER: &str = "DR. NIK SARAFI";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Process configuration, read once from the environment (and `.env`).
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub admin_api_key: Option<String>,
    pub provider: String,
    pub rules: ScheduleRules,
    pub policy: BookingPolicy,
    pub busy_timeout: Duration,
    pub cors_origin: Option<String>,
    pub rate_limits: RateLimits,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let day_start = parse_time(&var_or("DAY_START", "09:00"))
            .map_err(|e| anyhow!("DAY_START: {e}"))?;
        let day_end =
            parse_time(&var_or("DAY_END", "17:00")).map_err(|e| anyhow!("DAY_END: {e}"))?;
        let non_working_days = parse_weekdays(&var_or("NON_WORKING_DAYS", "sat,sun"))?;
        let durations = parse_durations(&var_or("SLOT_DURATIONS", "30,45"))?;
        let rules = ScheduleRules::new(day_start, day_end, non_working_days, durations)?;

        let admin_api_key = std::env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty());
        if admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not set, admin endpoints will reject every request");
        }

        let cors_origin = std::env::var("CORS_ORIGIN").ok().filter(|o| !o.is_empty());
        if cors_origin.is_none() {
            tracing::warn!("CORS_ORIGIN not set, allowing any origin");
        }

        Ok(Self {
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            host: var_or("HOST", "0.0.0.0"),
            port: var_or("PORT", "3000").parse().context("PORT must be a number")?,
            admin_api_key,
            provider: var_or("PROVIDER_ID", DEFAULT_PROVIDER),
            rules,
            policy: BookingPolicy {
                admin_overrides_blocks: parse_bool(&var_or("ADMIN_OVERRIDES_BLOCKS", "false"))
                    .context("ADMIN_OVERRIDES_BLOCKS must be true or false")?,
            },
            busy_timeout: Duration::from_millis(
                var_or("DB_BUSY_TIMEOUT_MS", &DEFAULT_BUSY_TIMEOUT_MS.to_string())
                    .parse()
                    .context("DB_BUSY_TIMEOUT_MS must be a number")?,
            ),
            cors_origin,
            rate_limits: rate_limits_from_env()?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// `RATE_LIMIT_*` variables as `count/seconds`, each falling back to its default.
fn rate_limits_from_env() -> anyhow::Result<RateLimits> {
    let defaults = RateLimits::default();
    Ok(RateLimits {
        public: parse_rate_limit("RATE_LIMIT_PUBLIC", defaults.public)?,
        booking: parse_rate_limit("RATE_LIMIT_BOOKING", defaults.booking)?,
        admin: parse_rate_limit("RATE_LIMIT_ADMIN", defaults.admin)?,
        admin_auth_failures: parse_rate_limit(
            "RATE_LIMIT_ADMIN_AUTH_FAILURES",
            defaults.admin_auth_failures,
        )?,
    })
}

fn parse_rate_limit(name: &str, default: RateLimit) -> anyhow::Result<RateLimit> {
    var_or(name, &default.to_string())
        .parse()
        .map_err(|e| anyhow!("{name}: {e}"))
}

/// Comma-separated weekday names, e.g. `sat,sun`. Empty means every day works.
fn parse_weekdays(raw: &str) -> anyhow::Result<Vec<Weekday>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Weekday>()
                .map_err(|_| anyhow!("NON_WORKING_DAYS: unknown weekday {s:?}"))
        })
        .collect()
}

fn parse_durations(raw: &str) -> anyhow::Result<Vec<Minute>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Minute>()
                .with_context(|| format!("SLOT_DURATIONS: invalid duration {s:?}"))
        })
        .collect()
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("not a boolean: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weekdays() {
        assert_eq!(
            parse_weekdays("sat, Sun").unwrap(),
            vec![Weekday::Sat, Weekday::Sun]
        );
        assert_eq!(parse_weekdays("friday").unwrap(), vec![Weekday::Fri]);
        assert!(parse_weekdays("").unwrap().is_empty());
        assert!(parse_weekdays("sat,funday").is_err());
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_durations("30,45").unwrap(), vec![30, 45]);
        assert_eq!(parse_durations(" 60 ").unwrap(), vec![60]);
        assert!(parse_durations("30,abc").is_err());
        assert!(parse_durations("-15").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_rate_limits_fall_back_to_defaults() {
        let limits = rate_limits_from_env().unwrap();
        assert_eq!(limits.booking, RateLimit::per_secs(5, 300));
        assert_eq!(limits.admin_auth_failures, RateLimit::per_secs(10, 900));
    }

    #[test]
    fn test_parse_rate_limit_reports_variable() {
        std::env::set_var("RATE_LIMIT_TEST_MALFORMED", "sixty");
        let err = parse_rate_limit("RATE_LIMIT_TEST_MALFORMED", RateLimit::per_secs(1, 1))
            .unwrap_err();
        assert!(err.to_string().starts_with("RATE_LIMIT_TEST_MALFORMED:"));
        std::env::remove_var("RATE_LIMIT_TEST_MALFORMED");
    }

    #[test]
    fn test_default_rules_are_valid() {
        let rules = ScheduleRules::new(
            parse_time("09:00").unwrap(),
            parse_time("17:00").unwrap(),
            parse_weekdays("sat,sun").unwrap(),
            parse_durations("30,45").unwrap(),
        )
        .unwrap();
        assert_eq!(rules.base_unit(), 15);
    }
}
