use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::artwork::{DEFAULT_RETRIES, IMAGE_TIMEOUT};
use crate::coordinator::{Credentials, GlobalSettings, DEFAULT_PLACEHOLDER, DEFAULT_REFRESH_INTERVAL};

const MAX_IMAGE_RETRIES: u32 = 10;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration. Every field is optional so files and CLI
/// flags can be layered; `Effective` holds the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub bridge: Option<BridgeConfig>,
    pub images: Option<ImageConfig>,
    pub settings: Option<SettingsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    pub url: Option<String>,           // e.g. "http://127.0.0.1:8491"
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ImageConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub placeholder: Option<String>,   // image key shown after a failed fetch
}

/// Initial global settings, until the host sends its own.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SettingsConfig {
    pub refresh_interval_secs: Option<f64>,
    pub credentials: Option<String>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "dialbridge", about = "Shares one bridge poll between every visible widget", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// shorthand for --log-level debug
    #[arg(long, action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long, value_hint = ValueHint::Url)]
    pub bridge_url: Option<String>,
    #[arg(long)]
    pub refresh_interval_secs: Option<f64>,
    #[arg(long)]
    pub image_retries: Option<u32>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Effective {
    pub log_level: String,
    pub bridge_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub image_timeout: Duration,
    pub image_retries: u32,
    pub placeholder: String,
    pub global: GlobalSettings,
}

impl Config {
    /// Layer this config over the built-in defaults.
    pub fn effective(&self) -> Effective {
        let bridge = self.bridge.clone().unwrap_or_default();
        let images = self.images.clone().unwrap_or_default();
        let settings = self.settings.clone().unwrap_or_default();

        let refresh_interval = settings
            .refresh_interval_secs
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);

        Effective {
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            bridge_url: bridge.url.unwrap_or_else(|| "http://127.0.0.1:8491".to_string()),
            request_timeout: Duration::from_millis(bridge.request_timeout_ms.unwrap_or(3000)),
            connect_timeout: Duration::from_millis(bridge.connect_timeout_ms.unwrap_or(500)),
            image_timeout: images.timeout_ms.map(Duration::from_millis).unwrap_or(IMAGE_TIMEOUT),
            image_retries: images.retries.unwrap_or(DEFAULT_RETRIES),
            placeholder: images.placeholder.unwrap_or_else(|| DEFAULT_PLACEHOLDER.to_string()),
            global: GlobalSettings {
                refresh_interval,
                credentials: settings.credentials.filter(|c| !c.trim().is_empty()).map(Credentials::new),
            },
        }
    }
}

/// Public entry point: read YAML, merge CLI, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Pretty YAML of the merged config, secrets masked.
pub fn dump(cfg: &Config) -> Result<String, ConfigError> {
    let mut masked = cfg.clone();
    if let Some(settings) = masked.settings.as_mut() {
        if settings.credentials.is_some() {
            settings.credentials = Some("<redacted>".to_string());
        }
    }
    Ok(serde_yaml::to_string(&masked)?)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/dialbridge/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/dialbridge/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/dialbridge.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["dialbridge.yaml", "config.yaml", "config/dialbridge.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    match (&mut dst.bridge, src.bridge) {
        (None, Some(c)) => dst.bridge = Some(c),
        (Some(d), Some(s)) => {
            if s.url.is_some()                { d.url = s.url; }
            if s.request_timeout_ms.is_some() { d.request_timeout_ms = s.request_timeout_ms; }
            if s.connect_timeout_ms.is_some() { d.connect_timeout_ms = s.connect_timeout_ms; }
        }
        _ => {}
    }
    match (&mut dst.images, src.images) {
        (None, Some(c)) => dst.images = Some(c),
        (Some(d), Some(s)) => {
            if s.timeout_ms.is_some()  { d.timeout_ms = s.timeout_ms; }
            if s.retries.is_some()     { d.retries = s.retries; }
            if s.placeholder.is_some() { d.placeholder = s.placeholder; }
        }
        _ => {}
    }
    match (&mut dst.settings, src.settings) {
        (None, Some(c)) => dst.settings = Some(c),
        (Some(d), Some(s)) => {
            if s.refresh_interval_secs.is_some() { d.refresh_interval_secs = s.refresh_interval_secs; }
            if s.credentials.is_some()           { d.credentials = s.credentials; }
        }
        _ => {}
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.debug               { cfg.log_level = Some("debug".to_string()); }
    if cli.bridge_url.is_some() {
        cfg.bridge.get_or_insert_with(BridgeConfig::default).url = cli.bridge_url.clone();
    }
    if cli.image_retries.is_some() {
        cfg.images.get_or_insert_with(ImageConfig::default).retries = cli.image_retries;
    }
    if cli.refresh_interval_secs.is_some() {
        cfg.settings.get_or_insert_with(SettingsConfig::default).refresh_interval_secs = cli.refresh_interval_secs;
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(bridge) = cfg.bridge.as_ref() {
        if let Some(url) = bridge.url.as_deref() {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| ConfigError::Validation(format!("bridge url '{}': {}", url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Validation("bridge url must be http or https".into()));
            }
        }
        if bridge.request_timeout_ms == Some(0) || bridge.connect_timeout_ms == Some(0) {
            return Err(ConfigError::Validation("bridge timeouts must be > 0".into()));
        }
    }
    if let Some(images) = cfg.images.as_ref() {
        if images.timeout_ms == Some(0) {
            return Err(ConfigError::Validation("images timeout_ms must be > 0".into()));
        }
        if images.retries.is_some_and(|r| r > MAX_IMAGE_RETRIES) {
            return Err(ConfigError::Validation(format!("images retries must be <= {}", MAX_IMAGE_RETRIES)));
        }
    }
    if let Some(secs) = cfg.settings.as_ref().and_then(|s| s.refresh_interval_secs) {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(ConfigError::Validation("settings refresh_interval_secs must be > 0".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Config {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn defaults_when_empty() {
        let eff = Config::default().effective();
        assert_eq!(eff.bridge_url, "http://127.0.0.1:8491");
        assert_eq!(eff.request_timeout, Duration::from_secs(3));
        assert_eq!(eff.image_timeout, IMAGE_TIMEOUT);
        assert_eq!(eff.image_retries, DEFAULT_RETRIES);
        assert_eq!(eff.placeholder, "unavailable");
        assert_eq!(eff.global, GlobalSettings::default());
    }

    #[test]
    fn file_then_cli_layering() {
        let mut cfg = Config::default();
        merge(&mut cfg, yaml("log_level: warn\nbridge:\n  url: http://10.0.0.2:8491\n  connect_timeout_ms: 250\n"));
        merge(&mut cfg, yaml("bridge:\n  request_timeout_ms: 1000\nsettings:\n  credentials: secret\n"));

        let cli = Cli {
            debug: true,
            refresh_interval_secs: Some(2.0),
            image_retries: Some(1),
            ..Default::default()
        };
        apply_cli_overrides(&mut cfg, &cli);
        validate(&cfg).unwrap();

        let eff = cfg.effective();
        assert_eq!(eff.log_level, "debug");
        assert_eq!(eff.bridge_url, "http://10.0.0.2:8491");
        assert_eq!(eff.connect_timeout, Duration::from_millis(250));
        assert_eq!(eff.request_timeout, Duration::from_millis(1000));
        assert_eq!(eff.image_retries, 1);
        assert_eq!(eff.global.refresh_interval, Duration::from_secs(2));
        assert_eq!(eff.global.credentials.as_ref().map(Credentials::expose), Some("secret"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        for bad in [
            "bridge:\n  url: ftp://example.com\n",
            "bridge:\n  url: not a url\n",
            "bridge:\n  request_timeout_ms: 0\n",
            "images:\n  retries: 11\n",
            "settings:\n  refresh_interval_secs: 0\n",
            "settings:\n  refresh_interval_secs: -3\n",
        ] {
            assert!(matches!(validate(&yaml(bad)), Err(ConfigError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let cli = Cli { config: Some(PathBuf::from("/nonexistent/dialbridge.yaml")), ..Default::default() };
        assert!(matches!(load(&cli), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn dump_masks_credentials() {
        let cfg = yaml("settings:\n  credentials: hunter2\n");
        let out = dump(&cfg).unwrap();
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }
}
