use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

use crate::common::TokenCipher;

/// How the discovery worker takes jobs off the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Reserve queue messages; the queue's backoff drives redelivery.
    Push,
    /// Claim the oldest pending record on a fixed interval.
    Poll,
}

impl FromStr for WorkerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "queue" => Ok(WorkerMode::Push),
            "poll" => Ok(WorkerMode::Poll),
            other => Err(anyhow!("unknown worker mode '{}'", other)),
        }
    }
}

/// Discovery queue and worker settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub default_limit: i32,
    pub concurrency: usize,
    pub mode: WorkerMode,
    pub poll_interval: Duration,
    /// Handles requested from hashtag discovery before `limit` is applied.
    pub candidate_cap: usize,
    /// How long a reserved message or a processing record stays owned
    /// without a heartbeat before another worker may take it over.
    pub lease: Duration,
}

impl DiscoveryConfig {
    /// Heartbeats renew the lease three times per lease period.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(1))
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(60_000),
            default_limit: 20,
            concurrency: 1,
            mode: WorkerMode::Push,
            poll_interval: Duration::from_millis(5_000),
            candidate_cap: 50,
            lease: Duration::from_millis(300_000),
        }
    }
}

/// Browser session and extraction settings.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub rate_limit: Duration,
    pub max_scrolls: usize,
    pub stall_limit: usize,
    pub session_dir: Option<PathBuf>,
    pub interactive: bool,
    pub challenge_timeout: Duration,
    pub navigation_timeout: Duration,
    pub ms_token: Option<String>,
    pub user_agent: Option<String>,
    pub debug_dir: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            browserless_url: "http://localhost:3000".to_string(),
            browserless_token: None,
            rate_limit: Duration::from_millis(2_000),
            max_scrolls: 20,
            stall_limit: 5,
            session_dir: None,
            interactive: false,
            challenge_timeout: Duration::from_millis(120_000),
            navigation_timeout: Duration::from_millis(30_000),
            ms_token: None,
            user_agent: None,
            debug_dir: None,
        }
    }
}

/// OAuth app credentials and API location.
#[derive(Debug, Clone)]
pub struct TikTokConfig {
    pub client_key: String,
    pub client_secret: String,
    pub api_base_url: String,
    pub token_url: String,
    pub refresh_skew: Duration,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub cipher: TokenCipher,
    pub tiktok: TikTokConfig,
    pub discovery: DiscoveryConfig,
    pub scraper: ScraperConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let key = env::var("TOKEN_ENCRYPTION_KEY").context("TOKEN_ENCRYPTION_KEY must be set")?;
        let cipher = TokenCipher::from_hex(&key).context("TOKEN_ENCRYPTION_KEY is invalid")?;

        let discovery_defaults = DiscoveryConfig::default();
        let scraper_defaults = ScraperConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_var("PORT", 8080)?,
            nats_url: optional_var("NATS_URL"),
            cipher,
            tiktok: TikTokConfig {
                client_key: env::var("TIKTOK_CLIENT_KEY").context("TIKTOK_CLIENT_KEY must be set")?,
                client_secret: env::var("TIKTOK_CLIENT_SECRET")
                    .context("TIKTOK_CLIENT_SECRET must be set")?,
                api_base_url: optional_var("TIKTOK_API_BASE_URL")
                    .unwrap_or_else(|| tiktok_client::DEFAULT_BASE_URL.to_string()),
                token_url: optional_var("TIKTOK_TOKEN_URL")
                    .unwrap_or_else(|| tiktok_client::oauth::DEFAULT_TOKEN_URL.to_string()),
                refresh_skew: Duration::from_secs(parse_var("TOKEN_REFRESH_SKEW_SECS", 300)?),
            },
            discovery: DiscoveryConfig {
                max_attempts: parse_var("DISCOVERY_MAX_ATTEMPTS", discovery_defaults.max_attempts)?,
                backoff_base: millis_var("DISCOVERY_BACKOFF_MS", discovery_defaults.backoff_base)?,
                default_limit: parse_var("DISCOVERY_DEFAULT_LIMIT", discovery_defaults.default_limit)?,
                concurrency: parse_var("DISCOVERY_CONCURRENCY", discovery_defaults.concurrency)?.max(1),
                mode: parse_var("DISCOVERY_WORKER_MODE", discovery_defaults.mode)?,
                poll_interval: millis_var(
                    "DISCOVERY_POLL_INTERVAL_MS",
                    discovery_defaults.poll_interval,
                )?,
                candidate_cap: parse_var("DISCOVERY_CANDIDATE_CAP", discovery_defaults.candidate_cap)?,
                lease: millis_var("DISCOVERY_LEASE_MS", discovery_defaults.lease)?,
            },
            scraper: ScraperConfig {
                browserless_url: optional_var("BROWSERLESS_URL")
                    .unwrap_or(scraper_defaults.browserless_url),
                browserless_token: optional_var("BROWSERLESS_TOKEN"),
                rate_limit: millis_var("SCRAPER_RATE_LIMIT_MS", scraper_defaults.rate_limit)?,
                max_scrolls: parse_var("SCRAPER_MAX_SCROLLS", scraper_defaults.max_scrolls)?,
                stall_limit: parse_var("SCRAPER_STALL_LIMIT", scraper_defaults.stall_limit)?,
                session_dir: optional_var("SCRAPER_SESSION_DIR").map(PathBuf::from),
                interactive: parse_var("SCRAPER_INTERACTIVE", scraper_defaults.interactive)?,
                challenge_timeout: millis_var(
                    "SCRAPER_CHALLENGE_TIMEOUT_MS",
                    scraper_defaults.challenge_timeout,
                )?,
                navigation_timeout: millis_var(
                    "SCRAPER_NAV_TIMEOUT_MS",
                    scraper_defaults.navigation_timeout,
                )?,
                ms_token: optional_var("SCRAPER_MS_TOKEN"),
                user_agent: optional_var("SCRAPER_USER_AGENT"),
                debug_dir: optional_var("SCRAPER_DEBUG_DIR").map(PathBuf::from),
            },
        })
    }
}

/// Unset and empty variables are both treated as absent.
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        None => Ok(default),
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration> {
    let ms: u64 = parse_var(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}
