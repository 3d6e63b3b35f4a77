// src/config.rs

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::certspotter::DEFAULT_BASE_URL;
use crate::export::FileRoute;

/// Highest accepted request rate against the certspotter API, in Hz
pub const MAX_RATE_LIMIT: f64 = 20.0;

const DOMAIN_NAME_PATTERN: &str = r"^([a-z0-9]+(-[a-z0-9]+)*\.)+[a-z]{2,}$";

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_exclude_precerts")]
    pub exclude_precerts: bool,
    #[serde(default)]
    pub retry_after_padding_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_polling_interval() -> u64 { 3600 }
fn default_rate_limit() -> f64 { 1.25 }
fn default_exclude_precerts() -> bool { true }
fn default_base_url() -> String { DEFAULT_BASE_URL.to_string() }

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval(),
            rate_limit: default_rate_limit(),
            token: None,
            exclude_precerts: default_exclude_precerts(),
            retry_after_padding_secs: 0,
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub domain: String,
    #[serde(default)]
    pub include_subdomains: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_re: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address of the `/metrics` HTTP endpoint
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
    /// Optional textfile collector output, written in addition to the endpoint
    #[serde(default)]
    pub export_path: Option<PathBuf>,
    #[serde(default = "default_export_interval")]
    pub export_interval_secs: u64,
    #[serde(default = "default_domain_labels")]
    pub domain_labels: bool,
}

fn default_metrics_listen() -> String { "0.0.0.0:9800".to_string() }
fn default_export_interval() -> u64 { 60 }
fn default_domain_labels() -> bool { true }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
            export_path: None,
            export_interval_secs: default_export_interval(),
            domain_labels: default_domain_labels(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub files: Vec<FileConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges, domain names and match patterns
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.global.polling_interval_secs == 0 {
            anyhow::bail!("polling_interval_secs must be greater than 0");
        }
        if self.global.rate_limit.is_nan() || self.global.rate_limit <= 0.0 {
            anyhow::bail!(
                "rate_limit {}Hz must be greater than 0Hz",
                self.global.rate_limit
            );
        }
        if self.global.rate_limit > MAX_RATE_LIMIT {
            anyhow::bail!(
                "rate_limit {}Hz must not exceed {}Hz",
                self.global.rate_limit,
                MAX_RATE_LIMIT
            );
        }
        if self.metrics.export_interval_secs == 0 {
            anyhow::bail!("metrics export_interval_secs must be greater than 0");
        }
        self.metrics_listen_addr()?;

        if self.domains.is_empty() {
            anyhow::bail!("at least one [[domains]] entry must be configured");
        }

        let domain_re = Regex::new(DOMAIN_NAME_PATTERN)?;
        for domain in &self.domains {
            if !domain_re.is_match(&domain.domain) {
                anyhow::bail!("domain {:?} must be a valid domain", domain.domain);
            }
        }

        self.file_routes()?;

        Ok(())
    }

    /// Parsed `[metrics] listen` address
    pub fn metrics_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.metrics
            .listen
            .parse()
            .with_context(|| format!("metrics listen {:?} must be an ip:port address", self.metrics.listen))
    }

    /// Compile the configured files into routes
    pub fn file_routes(&self) -> anyhow::Result<Vec<FileRoute>> {
        self.files
            .iter()
            .map(|file| {
                FileRoute::new(&file.file, file.labels.clone(), &file.match_re)
                    .with_context(|| format!("Invalid match_re for file {:?}", file.file))
            })
            .collect()
    }
}
