use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use pitstay_core::BookingPolicy;

/// Secrets shipped in sample `.env` files.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub policy: BookingPolicy,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    /// Read `PITSTAY_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("PITSTAY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PITSTAY_JWT_SECRET is unset or still a placeholder");
        }

        let db_path: PathBuf = get("PITSTAY_DB_PATH").unwrap_or_else(|| "pitstay.db".into()).into();
        let host = get("PITSTAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&get, "PITSTAY_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let defaults = BookingPolicy::default();
        let window_hours: i64 = parse_or(
            &get,
            "PITSTAY_RESPONSE_WINDOW_HOURS",
            defaults.response_window.num_hours(),
        )?;
        if window_hours <= 0 {
            bail!("PITSTAY_RESPONSE_WINDOW_HOURS must be positive");
        }
        let policy = BookingPolicy {
            response_window: chrono::Duration::hours(window_hours),
            expiry_penalty: parse_or(&get, "PITSTAY_EXPIRY_PENALTY_POINTS", defaults.expiry_penalty)?,
            default_cancel_penalty: parse_or(
                &get,
                "PITSTAY_DEFAULT_CANCEL_PENALTY_POINTS",
                defaults.default_cancel_penalty,
            )?,
        };
        if policy.expiry_penalty < 0 || policy.default_cancel_penalty < 0 {
            bail!("penalty points cannot be negative");
        }

        let sweep_secs: u64 = parse_or(&get, "PITSTAY_SWEEP_INTERVAL_SECS", 300)?;
        if sweep_secs == 0 {
            bail!("PITSTAY_SWEEP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            policy,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}
