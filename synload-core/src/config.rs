//! Client profile configuration
//!
//! A profile is a TOML file with a `[generator]` table describing the synthetic
//! service-time demand, a `[tracker]` table for the rolling percentile, and an
//! optional master `seed`:
//!
//! ```toml
//! seed = 42
//!
//! [generator]
//! service_distribution = "exponential"
//! service_us = 250.0
//! read_timeout = "500ms"
//!
//! [tracker]
//! percentile = 0.99
//! window = "100ms"
//! output = "/tmp/p99"
//! ```
//!
//! Any field can be overridden with `--set` style `key.path=value` strings.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use synload_common::{Distribution, ExponentialDistribution, FixedDistribution, LognormalDistribution};

/// Shape of the synthetic service-time demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceDistributionKind {
    #[default]
    Fixed,
    Exponential,
    Lognormal,
}

/// Request generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub service_distribution: ServiceDistributionKind,
    /// Mean requested service time in microseconds
    pub service_us: f64,
    /// Give up on responses older than this (None = wait forever)
    #[serde(default, with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
}

impl GeneratorConfig {
    pub fn new(service_distribution: ServiceDistributionKind, service_us: f64) -> Self {
        Self { service_distribution, service_us, read_timeout: None }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.service_us.is_finite() {
            bail!("service_us must be finite");
        }
        match self.service_distribution {
            ServiceDistributionKind::Fixed if self.service_us < 0.0 => {
                bail!("service_us must be >= 0 for a fixed distribution")
            }
            ServiceDistributionKind::Exponential | ServiceDistributionKind::Lognormal
                if self.service_us <= 0.0 =>
            {
                bail!("service_us must be > 0 for a {:?} distribution", self.service_distribution)
            }
            _ => {}
        }
        if self.read_timeout == Some(Duration::ZERO) {
            bail!("read_timeout must be > 0 when set");
        }
        Ok(())
    }

    /// Build the service-time distribution described by this config
    pub fn build_distribution(&self) -> Result<Box<dyn Distribution>> {
        let mean = self.service_us;
        let dist: Box<dyn Distribution> = match self.service_distribution {
            ServiceDistributionKind::Fixed => Box::new(FixedDistribution::new(mean)?),
            ServiceDistributionKind::Exponential => {
                Box::new(ExponentialDistribution::from_mean(mean)?)
            }
            ServiceDistributionKind::Lognormal => Box::new(LognormalDistribution::from_mean(mean)?),
        };
        Ok(dist)
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::new(ServiceDistributionKind::Fixed, 0.0)
    }
}

/// Rolling percentile settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Percentile in `[0, 1]`
    pub percentile: f64,
    /// Trailing window; also the flush interval
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
    /// Maximum samples retained inside one window
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// File that receives the latest percentile
    pub output: PathBuf,
}

fn default_window() -> Duration {
    Duration::from_millis(100)
}

fn default_capacity() -> usize {
    200_000
}

impl TrackerConfig {
    pub fn new(percentile: f64, output: impl Into<PathBuf>) -> Self {
        Self {
            percentile,
            window: default_window(),
            capacity: default_capacity(),
            output: output.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.percentile) {
            bail!("percentile must be in [0, 1], got {}", self.percentile);
        }
        if self.window.as_millis() == 0 {
            bail!("window must be at least 1ms");
        }
        if self.capacity == 0 {
            bail!("capacity must be > 0");
        }
        if self.output.as_os_str().is_empty() {
            bail!("output path cannot be empty");
        }
        Ok(())
    }
}

/// Top-level client profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    /// Master seed for reproducible runs (None = use entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub tracker: Option<TrackerConfig>,
}

impl ClientProfile {
    /// Load profile from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_overrides(path, &[])
    }

    /// Load profile from TOML file with `key.path=value` overrides applied
    pub fn from_file_with_overrides<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        for override_str in overrides {
            let (key, val) = parse_key_value(override_str)
                .with_context(|| format!("Invalid override format: {}", override_str))?;
            set_toml_path(&mut value, &key, &val)
                .with_context(|| format!("Failed to apply override: {}", override_str))?;
        }

        let profile: ClientProfile =
            value.try_into().with_context(|| "Failed to deserialize configuration")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let profile: ClientProfile = toml::from_str(content).context("Failed to parse profile")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        self.generator.validate().context("Invalid [generator] section")?;
        if let Some(tracker) = &self.tracker {
            tracker.validate().context("Invalid [tracker] section")?;
        }
        Ok(())
    }
}

fn parse_key_value(override_str: &str) -> Result<(String, String)> {
    match override_str.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid override format '{}'. Expected 'key=value'", override_str),
    }
}

/// Set a value in TOML using dot-notation path, creating tables as needed
fn set_toml_path(root: &mut toml::Value, path: &str, value_str: &str) -> Result<()> {
    let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        bail!("Empty path");
    };

    let mut current = root;
    for key in parents {
        let toml::Value::Table(table) = current else {
            bail!("Cannot navigate through non-table value at key '{}'", key);
        };
        current = table
            .entry(key.to_string())
            .or_insert_with(|| toml::Value::Table(Default::default()));
    }

    let toml::Value::Table(table) = current else {
        bail!("Cannot set key '{}' on non-table value", last);
    };
    table.insert(last.to_string(), parse_value(value_str));
    Ok(())
}

/// Parse a string value with type inference; anything else is a string
fn parse_value(value_str: &str) -> toml::Value {
    let trimmed = value_str.trim();

    if let Ok(b) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(trimmed.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PROFILE: &str = r#"
seed = 42

[generator]
service_distribution = "lognormal"
service_us = 1000.0
read_timeout = "250ms"

[tracker]
percentile = 0.99
output = "/tmp/p99.txt"
"#;

    #[test]
    fn test_parse_profile() {
        let profile = ClientProfile::from_toml_str(PROFILE).unwrap();
        assert_eq!(profile.seed, Some(42));
        assert_eq!(profile.generator.service_distribution, ServiceDistributionKind::Lognormal);
        assert_eq!(profile.generator.service_us, 1000.0);
        assert_eq!(profile.generator.read_timeout, Some(Duration::from_millis(250)));

        let tracker = profile.tracker.unwrap();
        assert_eq!(tracker.percentile, 0.99);
        assert_eq!(tracker.window, Duration::from_millis(100));
        assert_eq!(tracker.capacity, 200_000);
        assert_eq!(tracker.output, PathBuf::from("/tmp/p99.txt"));
    }

    #[test]
    fn test_generator_defaults() {
        let profile = ClientProfile::from_toml_str("[generator]\nservice_us = 10.0\n").unwrap();
        assert_eq!(profile.seed, None);
        assert_eq!(profile.generator.service_distribution, ServiceDistributionKind::Fixed);
        assert_eq!(profile.generator.read_timeout, None);
        assert!(profile.tracker.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let bad_mean = "[generator]\nservice_distribution = \"exponential\"\nservice_us = 0.0\n";
        assert!(ClientProfile::from_toml_str(bad_mean).is_err());

        let bad_percentile = "[generator]\nservice_us = 1.0\n[tracker]\npercentile = 1.5\noutput = \"x\"\n";
        assert!(ClientProfile::from_toml_str(bad_percentile).is_err());

        let unknown_kind = "[generator]\nservice_distribution = \"pareto\"\nservice_us = 1.0\n";
        assert!(ClientProfile::from_toml_str(unknown_kind).is_err());
    }

    #[test]
    fn test_build_distribution_names() {
        for (kind, name) in [
            (ServiceDistributionKind::Fixed, "Fixed"),
            (ServiceDistributionKind::Exponential, "Exponential"),
            (ServiceDistributionKind::Lognormal, "Lognormal"),
        ] {
            let dist = GeneratorConfig::new(kind, 100.0).build_distribution().unwrap();
            assert_eq!(dist.name(), name);
        }
    }

    #[test]
    fn test_from_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PROFILE.as_bytes()).unwrap();

        let overrides = vec![
            "generator.service_distribution=fixed".to_string(),
            "generator.service_us=500".to_string(),
            "tracker.window=1s".to_string(),
            "seed=7".to_string(),
        ];
        let profile = ClientProfile::from_file_with_overrides(file.path(), &overrides).unwrap();
        assert_eq!(profile.seed, Some(7));
        assert_eq!(profile.generator.service_distribution, ServiceDistributionKind::Fixed);
        assert_eq!(profile.generator.service_us, 500.0);
        assert_eq!(profile.tracker.unwrap().window, Duration::from_secs(1));
    }

    #[test]
    fn test_from_file_missing() {
        let err = ClientProfile::from_file("/nonexistent/profile.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_bad_override_format() {
        assert!(parse_key_value("no_equals_sign").is_err());
        assert!(parse_key_value("=5").is_err());
        assert_eq!(parse_key_value("a.b= 3").unwrap(), ("a.b".to_string(), " 3".to_string()));
    }
}
