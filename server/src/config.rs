use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use platform_obs::ObsConfig;
use products_directory::{CacheConfig, MatchPolicy, Resolver, TieredCache};

const MAX_SESSION_TTL_MINUTES: i64 = 7 * 24 * 60;
pub const SERVICE_NAME: &str = "meeting-registration";

pub fn observability() -> ObsConfig {
    observability_from_lookup(env_lookup)
}

/// Log filter from `RUST_LOG`, span export from `OTLP_ENDPOINT`. Blank values
/// count as unset.
pub fn observability_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ObsConfig {
    let non_blank = |key: &str| {
        lookup(key)
            .map(|val| val.trim().to_string())
            .filter(|val| !val.is_empty())
    };
    let config = ObsConfig::new(SERVICE_NAME).otlp_endpoint(non_blank("OTLP_ENDPOINT"));
    match non_blank("RUST_LOG") {
        Some(filter) => config.env_filter(filter),
        None => config,
    }
}

/// Where the employee directory lives and how ids are matched against it.
#[derive(Clone, Debug)]
pub struct DirectorySettings {
    pub csv: PathBuf,
    pub snapshot: PathBuf,
    pub min_id_len: Option<usize>,
    pub substring_fallback: bool,
    pub revalidate: bool,
}

impl DirectorySettings {
    pub fn load() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            csv: lookup("DIRECTORY_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| "employee.csv".into()),
            snapshot: lookup("DIRECTORY_SNAPSHOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| "cache/employee_cache.json".into()),
            min_id_len: parse_opt(&lookup, "DIRECTORY_MIN_ID_LEN")?,
            substring_fallback: flag(&lookup, "DIRECTORY_SUBSTRING_FALLBACK", true),
            revalidate: flag(&lookup, "DIRECTORY_REVALIDATE", false),
        })
    }

    pub fn resolver(&self) -> Resolver {
        let cache = TieredCache::new(
            CacheConfig::new(&self.csv, &self.snapshot).revalidate_memory(self.revalidate),
        );
        Resolver::new(
            cache,
            MatchPolicy {
                min_id_len: self.min_id_len,
                substring_fallback: self.substring_fallback,
            },
        )
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub directory: DirectorySettings,
    pub manual_min_id_len: usize,
    pub schedule_file: PathBuf,
    pub admin_users_file: PathBuf,
    pub cookie_key: Key,
    pub cookie_secure: bool,
    pub session_ttl_minutes: i64,
    pub cors_allowed_origins: Vec<String>,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub debug_mode: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let directory = DirectorySettings::from_lookup(&lookup)?;

        let cookie_secret =
            lookup("COOKIE_SECRET_BASE64").context("COOKIE_SECRET_BASE64 missing")?;
        let secret_bytes = STANDARD
            .decode(cookie_secret.trim())
            .context("invalid COOKIE_SECRET_BASE64")?;
        if secret_bytes.len() < 32 {
            return Err(anyhow!(
                "COOKIE_SECRET_BASE64 must decode to at least 32 bytes"
            ));
        }
        let cookie_key = Key::derive_from(&secret_bytes);

        let session_ttl_minutes = parse_opt(&lookup, "SESSION_TTL_MINUTES")?.unwrap_or(120);
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&session_ttl_minutes) {
            return Err(anyhow!(
                "SESSION_TTL_MINUTES must be between 1 and {MAX_SESSION_TTL_MINUTES}"
            ));
        }

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            directory,
            manual_min_id_len: parse_opt(&lookup, "MANUAL_MIN_ID_LEN")?.unwrap_or(6),
            schedule_file: lookup("SCHEDULE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| "schedule.json".into()),
            admin_users_file: lookup("ADMIN_USERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| "admin/users.json".into()),
            cookie_key,
            cookie_secure: flag(&lookup, "COOKIE_SECURE", false),
            session_ttl_minutes,
            cors_allowed_origins,
            webhook_url: lookup("GOOGLE_SCRIPT_URL")
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            webhook_timeout: Duration::from_secs(parse_opt(&lookup, "APP_TIMEOUT")?.unwrap_or(5)),
            debug_mode: flag(&lookup, "DEBUG_MODE", false),
        })
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("directory", &self.directory)
            .field("manual_min_id_len", &self.manual_min_id_len)
            .field("schedule_file", &self.schedule_file)
            .field("admin_users_file", &self.admin_users_file)
            .field("cookie_secure", &self.cookie_secure)
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .field("webhook_url", &self.webhook_url)
            .field("debug_mode", &self.debug_mode)
            .finish_non_exhaustive()
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {key}")),
        _ => Ok(None),
    }
}
