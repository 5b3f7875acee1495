use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::{retry::RetryPolicy, screen::ScreenDefaults};

pub const DEFAULT_SETTINGS_FILE: &str = "recon.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub site_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Stands in for the user's stored default company.
    pub default_company: Option<String>,
    pub default_currency: Option<String>,
    pub request_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            site_url: "http://127.0.0.1:8000".into(),
            api_key: None,
            api_secret: None,
            default_company: None,
            default_currency: None,
            request_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    site_url: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    default_company: Option<String>,
    default_currency: Option<String>,
    request_timeout_secs: Option<u64>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

impl ClientSettings {
    pub fn screen_defaults(&self) -> ScreenDefaults {
        ScreenDefaults {
            company: self.default_company.clone(),
            currency: self.default_currency.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: true,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(v) = file.site_url {
            self.site_url = v;
        }
        if let Some(v) = file.api_key {
            self.api_key = Some(v);
        }
        if let Some(v) = file.api_secret {
            self.api_secret = Some(v);
        }
        if let Some(v) = file.default_company {
            self.default_company = Some(v);
        }
        if let Some(v) = file.default_currency {
            self.default_currency = Some(v);
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.retry_max_attempts {
            self.retry_max_attempts = v;
        }
        if let Some(v) = file.retry_base_delay_ms {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = file.retry_max_delay_ms {
            self.retry_max_delay_ms = v;
        }
    }

    /// Later names win: `FRAPPE_*` first, then `APP__*`.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let string = |names: &[&str]| names.iter().rev().find_map(|name| env(name));

        if let Some(v) = string(&["FRAPPE_SITE_URL", "APP__SITE_URL"]) {
            self.site_url = v;
        }
        if let Some(v) = string(&["FRAPPE_API_KEY", "APP__API_KEY"]) {
            self.api_key = Some(v);
        }
        if let Some(v) = string(&["FRAPPE_API_SECRET", "APP__API_SECRET"]) {
            self.api_secret = Some(v);
        }
        if let Some(v) = string(&["APP__DEFAULT_COMPANY"]) {
            self.default_company = Some(v);
        }
        if let Some(v) = string(&["APP__DEFAULT_CURRENCY"]) {
            self.default_currency = Some(v);
        }
        if let Some(v) = string(&["APP__REQUEST_TIMEOUT_SECS"]).and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = v;
        }
        if let Some(v) = string(&["APP__RETRY_MAX_ATTEMPTS"]).and_then(|v| v.parse().ok()) {
            self.retry_max_attempts = v;
        }
        if let Some(v) = string(&["APP__RETRY_BASE_DELAY_MS"]).and_then(|v| v.parse().ok()) {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = string(&["APP__RETRY_MAX_DELAY_MS"]).and_then(|v| v.parse().ok()) {
            self.retry_max_delay_ms = v;
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_settings_file(path: &Path) -> anyhow::Result<SettingsFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("invalid settings file '{}'", path.display()))
}

/// Defaults, then a TOML file, then environment overrides.
///
/// An explicit `path` (or `RECON_CONFIG`) must exist and parse; the implicit `recon.toml` in
/// the working directory is optional and a broken one is only logged.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    load_settings_with(path, read_env)
}

fn load_settings_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let explicit = path
        .map(Path::to_path_buf)
        .or_else(|| env("RECON_CONFIG").map(PathBuf::from));
    match explicit {
        Some(path) => settings.apply_file(parse_settings_file(&path)?),
        None => {
            let implicit = Path::new(DEFAULT_SETTINGS_FILE);
            if implicit.exists() {
                match parse_settings_file(implicit) {
                    Ok(file) => settings.apply_file(file),
                    Err(err) => warn!("ignoring {DEFAULT_SETTINGS_FILE}: {err:#}"),
                }
            }
        }
    }

    settings.apply_env(env);
    Ok(settings)
}
