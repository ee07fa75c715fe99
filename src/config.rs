//! Engine configuration.
//!
//! Configuration is read once, at construction. Nothing here is re-read per
//! call: toggling contextual scoring or changing `alpha` means building a new
//! engine.

use std::path::PathBuf;

use crate::{Error, Result};

/// Where (and whether) snapshots are written.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct PersistenceConfig {
    /// Enable [`crate::LinUcbEngine::persist`] / [`crate::LinUcbEngine::load`].
    pub enabled: bool,
    /// Directory holding one snapshot file per feature dimension.
    pub dir: PathBuf,
}

/// Immutable configuration for a [`crate::LinUcbEngine`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Feature vector dimension (must be >= 1).
    pub dim: usize,
    /// Exploration strength (alpha, must be finite and > 0).
    pub alpha: f64,
    /// When `false`, `select` returns the first candidate and `update` is a no-op.
    pub enabled: bool,
    /// Force a full re-inversion every `recompute_interval` updates of an arm.
    ///
    /// `0` disables the periodic schedule.
    pub recompute_interval: u64,
    /// Force a full re-inversion when `||A|| * ||A^{-1}||` exceeds this.
    ///
    /// Values `<= 0` (or non-finite) disable the check.
    pub condition_threshold: f64,
    /// Seed for softmax sampling (`select_softmax`); argmax selection never uses it.
    pub seed: u64,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dim: 8,
            alpha: 1.0,
            enabled: true,
            recompute_interval: 0,
            condition_threshold: 0.0,
            seed: 0,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Config with dimension `dim` and defaults elsewhere.
    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn recompute_every(mut self, interval: u64) -> Self {
        self.recompute_interval = interval;
        self
    }

    pub fn condition_threshold(mut self, threshold: f64) -> Self {
        self.condition_threshold = threshold;
        self
    }

    pub fn persist_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence = PersistenceConfig {
            enabled: true,
            dir: dir.into(),
        };
        self
    }

    /// The condition-number threshold, if the safeguard is enabled.
    pub fn condition_guard(&self) -> Option<f64> {
        (self.condition_threshold.is_finite() && self.condition_threshold > 0.0)
            .then_some(self.condition_threshold)
    }

    /// The periodic recompute interval, if enabled.
    pub fn recompute_schedule(&self) -> Option<u64> {
        (self.recompute_interval > 0).then_some(self.recompute_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidConfig("dim must be >= 1".into()));
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "alpha must be finite and > 0 (got {})",
                self.alpha
            )));
        }
        if self.persistence.enabled && self.persistence.dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "persistence is enabled but no directory is set".into(),
            ));
        }
        Ok(())
    }

    /// Build a config from `LINMUX_*` process environment variables.
    ///
    /// Unset variables keep their [`Default`] values.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(|k| std::env::var(k).ok())
    }

    /// Like [`EngineConfig::from_env`], but with an explicit variable lookup.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `LINMUX_DIM` | `dim` |
    /// | `LINMUX_ALPHA` | `alpha` |
    /// | `LINMUX_ENABLED` | `enabled` |
    /// | `LINMUX_RECOMPUTE_INTERVAL` | `recompute_interval` |
    /// | `LINMUX_CONDITION_THRESHOLD` | `condition_threshold` |
    /// | `LINMUX_SEED` | `seed` |
    /// | `LINMUX_PERSIST` | `persistence.enabled` |
    /// | `LINMUX_PERSIST_DIR` | `persistence.dir` |
    pub fn from_env_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("LINMUX_DIM") {
            cfg.dim = parse_num("LINMUX_DIM", &v)?;
        }
        if let Some(v) = lookup("LINMUX_ALPHA") {
            cfg.alpha = parse_num("LINMUX_ALPHA", &v)?;
        }
        if let Some(v) = lookup("LINMUX_ENABLED") {
            cfg.enabled = parse_flag("LINMUX_ENABLED", &v)?;
        }
        if let Some(v) = lookup("LINMUX_RECOMPUTE_INTERVAL") {
            cfg.recompute_interval = parse_num("LINMUX_RECOMPUTE_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("LINMUX_CONDITION_THRESHOLD") {
            cfg.condition_threshold = parse_num("LINMUX_CONDITION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("LINMUX_SEED") {
            cfg.seed = parse_num("LINMUX_SEED", &v)?;
        }
        if let Some(v) = lookup("LINMUX_PERSIST") {
            cfg.persistence.enabled = parse_flag("LINMUX_PERSIST", &v)?;
        }
        if let Some(v) = lookup("LINMUX_PERSIST_DIR") {
            cfg.persistence.dir = PathBuf::from(v);
        }
        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::InvalidConfig(format!("{key}: cannot parse {raw:?}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "{key}: expected a boolean, got {raw:?}"
        ))),
    }
}
