//! TOML config file loading, validation, and database seeding for
//! plantations.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use time::macros::format_description;
use time::UtcOffset;

use crate::db::Db;
use crate::feeds::FeedSettings;
use crate::light::LdrPolicy;
use crate::reading::SourceKind;

const DEFAULT_DEVICE_URL: &str = "ws://127.0.0.1:9001/ws";
const DEFAULT_SYNTHETIC_INTERVAL_SEC: u64 = 5;
const DEFAULT_DEVICE_UTC_OFFSET: &str = "+00:00";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_device_url")]
    pub device_url: String,
    #[serde(default = "default_synthetic_interval")]
    pub synthetic_interval_sec: u64,
    #[serde(default)]
    pub ldr_policy: LdrPolicy,
    /// Offset of the device clock, "+HH:MM" / "-HH:MM".
    #[serde(default = "default_device_utc_offset")]
    pub device_utc_offset: String,
    #[serde(default)]
    pub plantations: Vec<PlantationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantationEntry {
    pub id: String,
    pub name: String,
    #[serde(default = "default_source")]
    pub source: SourceKind,
}

fn default_device_url() -> String {
    DEFAULT_DEVICE_URL.to_string()
}

fn default_synthetic_interval() -> u64 {
    DEFAULT_SYNTHETIC_INTERVAL_SEC
}

fn default_device_utc_offset() -> String {
    DEFAULT_DEVICE_UTC_OFFSET.to_string()
}

fn parse_utc_offset(s: &str) -> Option<UtcOffset> {
    let fmt = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(s.trim(), &fmt).ok()
}

fn default_source() -> SourceKind {
    SourceKind::Live
}

impl Default for Config {
    /// A single live plantation on the default device.
    fn default() -> Self {
        Self {
            device_url: default_device_url(),
            synthetic_interval_sec: DEFAULT_SYNTHETIC_INTERVAL_SEC,
            ldr_policy: LdrPolicy::default(),
            device_utc_offset: default_device_utc_offset(),
            plantations: vec![PlantationEntry {
                id: "1".into(),
                name: "Plantation A1".into(),
                source: SourceKind::Live,
            }],
        }
    }
}

impl Config {
    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            device_url: self.device_url.clone(),
            synthetic_interval: Duration::from_secs(self.synthetic_interval_sec),
            ldr_policy: self.ldr_policy,
            // validated on load
            device_offset: parse_utc_offset(&self.device_utc_offset).unwrap_or(UtcOffset::UTC),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_feeds(&mut errors);
        self.validate_plantations(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_feeds(&self, errors: &mut Vec<String>) {
        if !(self.device_url.starts_with("ws://") || self.device_url.starts_with("wss://")) {
            errors.push(format!(
                "device_url '{}' must start with ws:// or wss://",
                self.device_url
            ));
        }
        if self.synthetic_interval_sec == 0 {
            errors.push("synthetic_interval_sec must be positive, got 0".to_string());
        }
        if parse_utc_offset(&self.device_utc_offset).is_none() {
            errors.push(format!(
                "device_utc_offset '{}' must look like +HH:MM or -HH:MM",
                self.device_utc_offset
            ));
        }
    }

    fn validate_plantations(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.plantations.iter().enumerate() {
            let ctx = || {
                if p.id.is_empty() {
                    format!("plantations[{i}]")
                } else {
                    format!("plantation '{}'", p.id)
                }
            };

            if p.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&p.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// built-in default.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::warn!(%path, "config file not found, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert all configured plantations into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for p in &config.plantations {
        db.upsert_plantation(&p.id, &p.name, p.source)
            .await
            .with_context(|| format!("failed to upsert plantation '{}'", p.id))?;
    }

    tracing::info!(plantations = config.plantations.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
