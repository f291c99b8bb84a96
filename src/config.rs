use dotenvy::dotenv;
use eyre::{eyre, Result};
use rust_decimal::Decimal;
use std::{env, str::FromStr};
use tracing::{info, warn};

/// Alert qualification rule
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Inclusive lower bound on a token's summed value
    pub min_total: Decimal,
    /// Inclusive lower bound on distinct wallets
    pub min_distinct_wallets: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_total: Decimal::from(50),
            min_distinct_wallets: 3,
        }
    }
}

impl Thresholds {
    pub fn qualifies(&self, total: Decimal, distinct_wallets: usize) -> bool {
        total >= self.min_total && distinct_wallets >= self.min_distinct_wallets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Supabase,
}

impl FromStr for BackendKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "supabase" | "rest" | "postgrest" => Ok(Self::Supabase),
            other => Err(eyre!("unknown backend `{}` (expected sqlite or supabase)", other)),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub db_path: String,
    pub thresholds: Thresholds,
    pub port: u16,
    pub request_timeout_secs: u64,
}

// Keeps the API key out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "***"))
            .field("db_path", &self.db_path)
            .field("thresholds", &self.thresholds)
            .field("port", &self.port)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // Load from .env file

    let cfg = from_lookup(|key| env::var(key).ok())?;
    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

/// Build a config from any key lookup (the process environment in production)
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    // `url` / `key` are the names the old .env files used
    let supabase_url = non_empty("SUPABASE_URL").or_else(|| non_empty("url"));
    let supabase_key = non_empty("SUPABASE_KEY").or_else(|| non_empty("key"));

    let backend = match non_empty("BACKEND") {
        Some(name) => name.parse()?,
        None if supabase_url.is_some() => BackendKind::Supabase,
        None => BackendKind::Sqlite,
    };

    let db_path = non_empty("DATABASE_URL").unwrap_or_else(|| "alerts.db".to_string());

    let defaults = Thresholds::default();
    let thresholds = Thresholds {
        min_total: parse_or("ALERT_MIN_TOTAL", non_empty("ALERT_MIN_TOTAL"), defaults.min_total),
        min_distinct_wallets: parse_or(
            "ALERT_MIN_WALLETS",
            non_empty("ALERT_MIN_WALLETS"),
            defaults.min_distinct_wallets,
        ),
    };

    let port = parse_or("PORT", non_empty("PORT"), 8080);
    let request_timeout_secs = parse_or("REQUEST_TIMEOUT_SECS", non_empty("REQUEST_TIMEOUT_SECS"), 15);

    Ok(Config {
        backend,
        supabase_url,
        supabase_key,
        db_path,
        thresholds,
        port,
        request_timeout_secs,
    })
}

fn parse_or<T: FromStr + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        None => default,
    }
}
