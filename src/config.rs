use anyhow::{Context, Result, anyhow};
use std::{fs, path::Path, time::Duration};

use crate::cursor_cache::CacheConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/newtube-proxy-env";
pub const DEFAULT_PROXY_PORT: u16 = 8080;
pub const DEFAULT_PROXY_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_REGION: &str = "US";
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_CURSOR_CAPACITY: usize = 500;
pub const DEFAULT_CURSOR_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;

/// Raw values as found in the env file or the process environment. Every
/// field is optional; defaults are applied by [`resolve_settings`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub default_region: Option<String>,
    pub page_size: Option<u32>,
    pub cursor_capacity: Option<usize>,
    pub cursor_ttl_secs: Option<u64>,
    pub upstream_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_base: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub default_region: String,
    pub page_size: u32,
    pub cursor_cache: CacheConfig,
    pub upstream_timeout: Duration,
}

impl EnvConfig {
    /// Applies a single `KEY=VALUE` pair. Unknown keys and blank values are
    /// ignored so a partially filled file never clobbers an earlier source.
    fn apply(&mut self, key: &str, value: &str, origin: &str) -> Result<()> {
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            return Ok(());
        }
        match key {
            "YOUTUBE_API_KEY" => self.api_key = Some(value.to_string()),
            "YOUTUBE_API_BASE" => self.api_base = Some(value.trim_end_matches('/').to_string()),
            "PROXY_HOST" => self.proxy_host = Some(value.to_string()),
            "PROXY_PORT" | "PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing {key} from {origin}"))?;
                self.proxy_port = Some(port);
            }
            "DEFAULT_REGION" => self.default_region = Some(value.to_string()),
            "PAGE_SIZE" => {
                self.page_size = Some(parse_positive(key, value, origin)?);
            }
            "CURSOR_CACHE_CAPACITY" => {
                self.cursor_capacity = Some(parse_positive(key, value, origin)?);
            }
            "CURSOR_CACHE_TTL_SECS" => {
                self.cursor_ttl_secs = Some(parse_positive(key, value, origin)?);
            }
            "UPSTREAM_TIMEOUT_SECS" => {
                self.upstream_timeout_secs = Some(parse_positive(key, value, origin)?);
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_positive<T>(key: &str, value: &str, origin: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .parse()
        .with_context(|| format!("Parsing {key} from {origin}"))?;
    if parsed == T::default() {
        return Err(anyhow!("{key} must be greater than zero in {origin}"));
    }
    Ok(parsed)
}

const KNOWN_KEYS: &[&str] = &[
    "YOUTUBE_API_KEY",
    "YOUTUBE_API_BASE",
    "PROXY_HOST",
    "PORT",
    "PROXY_PORT",
    "DEFAULT_REGION",
    "PAGE_SIZE",
    "CURSOR_CACHE_CAPACITY",
    "CURSOR_CACHE_TTL_SECS",
    "UPSTREAM_TIMEOUT_SECS",
];

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let origin = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            cfg.apply(key.trim(), value_raw, &origin)?;
        }
    }
    Ok(Some(cfg))
}

/// Layers process environment values (looked up through `lookup`) on top of
/// the env file at `path`.
pub fn load_settings_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let mut cfg = read_env_config(path)?.unwrap_or_default();
    for key in KNOWN_KEYS {
        if let Some(value) = lookup(key) {
            cfg.apply(key, &value, "environment")?;
        }
    }
    resolve_settings(cfg, path)
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(DEFAULT_CONFIG_PATH)
}

fn resolve_settings(cfg: EnvConfig, path: &Path) -> Result<Settings> {
    let api_key = cfg.api_key.ok_or_else(|| {
        anyhow!(
            "YOUTUBE_API_KEY not set in {} or the environment",
            path.display()
        )
    })?;
    Ok(Settings {
        api_key,
        api_base: cfg.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        proxy_host: cfg
            .proxy_host
            .unwrap_or_else(|| DEFAULT_PROXY_HOST.to_string()),
        proxy_port: cfg.proxy_port.unwrap_or(DEFAULT_PROXY_PORT),
        default_region: cfg
            .default_region
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        page_size: cfg.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        cursor_cache: CacheConfig {
            capacity: cfg.cursor_capacity.unwrap_or(DEFAULT_CURSOR_CAPACITY),
            ttl: Duration::from_secs(cfg.cursor_ttl_secs.unwrap_or(DEFAULT_CURSOR_TTL_SECS)),
        },
        upstream_timeout: Duration::from_secs(
            cfg.upstream_timeout_secs
                .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        ),
    })
}
