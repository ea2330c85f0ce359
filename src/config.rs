use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono_tz::Tz;

use crate::retry::RetryPolicy;

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub timezone: Tz,
    pub summary_hour: u32,
    pub alert_threshold: f64,
    pub classifier_timeout: Duration,
    pub render_timeout: Duration,
    pub delivery: RetryPolicy,
    pub arabic_script_only: bool,
}

/// Chat platform credentials, needed only by commands that talk to Telegram.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub telegram_token: String,
    pub group_chat_id: i64,
    pub admin_chat_id: i64,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub url: String,
    pub token: Option<String>,
}

fn required<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{name} must be set"),
    }
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{name}={raw:?} is invalid: {err}")),
        _ => Ok(default),
    }
}

/// Boolean switches accept `1/0`, `true/false`, `yes/no` and `on/off`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn flag<F>(lookup: &F, name: &str) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => parse_flag(&raw)
            .with_context(|| format!("{name}={raw:?} is not a boolean flag")),
        None => Ok(false),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")
            .context("DATABASE_URL must point at the SQLite database, e.g. sqlite://mood.db")?;

        let timezone: Tz = parsed(&lookup, "GROUP_MOOD_TIMEZONE", Tz::UTC)?;
        let summary_hour: u32 = parsed(&lookup, "GROUP_MOOD_SUMMARY_HOUR", 0)?;
        if summary_hour > 23 {
            bail!("GROUP_MOOD_SUMMARY_HOUR must be between 0 and 23, got {summary_hour}");
        }
        let alert_threshold: f64 = parsed(&lookup, "GROUP_MOOD_ALERT_THRESHOLD", 0.6)?;
        if !(0.0..=1.0).contains(&alert_threshold) {
            bail!("GROUP_MOOD_ALERT_THRESHOLD must be within [0, 1], got {alert_threshold}");
        }
        let delivery_attempts: u32 = parsed(&lookup, "GROUP_MOOD_DELIVERY_ATTEMPTS", 3)?;
        if delivery_attempts == 0 {
            bail!("GROUP_MOOD_DELIVERY_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url,
            timezone,
            summary_hour,
            alert_threshold,
            classifier_timeout: Duration::from_secs(parsed(
                &lookup,
                "GROUP_MOOD_CLASSIFIER_TIMEOUT_SECS",
                10,
            )?),
            render_timeout: Duration::from_secs(parsed(
                &lookup,
                "GROUP_MOOD_RENDER_TIMEOUT_SECS",
                10,
            )?),
            delivery: RetryPolicy {
                max_attempts: delivery_attempts,
                initial_delay: Duration::from_secs(parsed(
                    &lookup,
                    "GROUP_MOOD_DELIVERY_DELAY_SECS",
                    2,
                )?),
            },
            arabic_script_only: flag(&lookup, "GROUP_MOOD_ARABIC_SCRIPT_ONLY")?,
        })
    }
}

impl ChatConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            telegram_token: required(&lookup, "GROUP_MOOD_TELEGRAM_TOKEN")?,
            group_chat_id: required(&lookup, "GROUP_MOOD_GROUP_CHAT_ID")?
                .trim()
                .parse()
                .context("GROUP_MOOD_GROUP_CHAT_ID must be a numeric chat id")?,
            admin_chat_id: required(&lookup, "GROUP_MOOD_ADMIN_CHAT_ID")?
                .trim()
                .parse()
                .context("GROUP_MOOD_ADMIN_CHAT_ID must be a numeric chat id")?,
        })
    }
}

impl ModelConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: required(&env_lookup, "GROUP_MOOD_MODEL_URL")?,
            token: env_lookup("GROUP_MOOD_MODEL_TOKEN").filter(|token| !token.trim().is_empty()),
        })
    }
}
