// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocator configuration loaded from TOML, the environment, or built
//! programmatically.
//!
//! Configuration is read once, when a [`DeviceLimitRegistry`] is built; it is
//! never hot-reloaded.
//!
//! # TOML Format
//! ```toml
//! fraction_of_memory_to_use = 0.92
//! initial_reserve_mb = 0
//! growth_reserve_mb = 0
//! memory_limit_mb = 4096
//! enable_usage_log = true
//! usage_log_in_mb = true
//! selected_devices = [0, 1]
//! ```
//!
//! # Environment
//! [`AllocatorConfig::with_env_overrides`] reads `GPUMEM_<FIELD>` for each
//! field, e.g. `GPUMEM_MEMORY_LIMIT_MB=4096` or `GPUMEM_SELECTED_DEVICES=0,1`.
//!
//! [`DeviceLimitRegistry`]: crate::DeviceLimitRegistry

use crate::units::mb_to_bytes;
use crate::AllocError;
use std::path::Path;
use std::str::FromStr;

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "GPUMEM_";

/// Configuration for recorded allocation and reservation sizing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Fraction of available-to-allocate memory a higher-level allocator
    /// reserves when no fixed size is configured. Must be in `(0.0, 1.0]`.
    pub fraction_of_memory_to_use: f64,
    /// Fixed initial reservation in MiB (`0` = use the fraction).
    pub initial_reserve_mb: u64,
    /// Fixed growth reservation in MiB (`0` = use the fraction).
    pub growth_reserve_mb: u64,
    /// Per-device soft limit in MiB (`0` = unlimited, nothing is recorded).
    pub memory_limit_mb: u64,
    /// Log peak reserved/allocated memory per device at teardown.
    pub enable_usage_log: bool,
    /// Report the usage line in MiB (`true`) or bytes (`false`).
    pub usage_log_in_mb: bool,
    /// Devices this process uses. Empty means every visible device.
    pub selected_devices: Vec<i32>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            fraction_of_memory_to_use: 0.92,
            initial_reserve_mb: 0,
            growth_reserve_mb: 0,
            memory_limit_mb: 0,
            enable_usage_log: false,
            usage_log_in_mb: true,
            selected_devices: Vec::new(),
        }
    }
}

impl AllocatorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, AllocError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AllocError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, AllocError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| AllocError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, AllocError> {
        toml::to_string_pretty(self)
            .map_err(|e| AllocError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), AllocError> {
        let f = self.fraction_of_memory_to_use;
        if !f.is_finite() || f <= 0.0 || f > 1.0 {
            return Err(AllocError::Config(format!(
                "fraction_of_memory_to_use must be in (0.0, 1.0], got {f}"
            )));
        }
        if let Some(bad) = self.selected_devices.iter().find(|&&id| id < 0) {
            return Err(AllocError::Config(format!(
                "selected_devices contains negative device id {bad}"
            )));
        }
        Ok(())
    }

    /// The soft limit in bytes (`0` = unlimited).
    pub fn limit_bytes(&self) -> u64 {
        mb_to_bytes(self.memory_limit_mb)
    }

    /// Applies `GPUMEM_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, AllocError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary `GPUMEM_*` lookup, then validates.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AllocError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()));

        if let Some(v) = get("fraction_of_memory_to_use") {
            self.fraction_of_memory_to_use = parse_value("fraction_of_memory_to_use", &v)?;
        }
        if let Some(v) = get("initial_reserve_mb") {
            self.initial_reserve_mb = parse_value("initial_reserve_mb", &v)?;
        }
        if let Some(v) = get("growth_reserve_mb") {
            self.growth_reserve_mb = parse_value("growth_reserve_mb", &v)?;
        }
        if let Some(v) = get("memory_limit_mb") {
            self.memory_limit_mb = parse_value("memory_limit_mb", &v)?;
        }
        if let Some(v) = get("enable_usage_log") {
            self.enable_usage_log = parse_flag("enable_usage_log", &v)?;
        }
        if let Some(v) = get("usage_log_in_mb") {
            self.usage_log_in_mb = parse_flag("usage_log_in_mb", &v)?;
        }
        if let Some(v) = get("selected_devices") {
            self.selected_devices = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value("selected_devices", s))
                .collect::<Result<_, _>>()?;
        }

        self.validate()?;
        Ok(self)
    }
}

fn parse_value<T: FromStr>(field: &str, raw: &str) -> Result<T, AllocError> {
    raw.trim()
        .parse()
        .map_err(|_| AllocError::Config(format!("invalid value '{raw}' for {field}")))
}

fn parse_flag(field: &str, raw: &str) -> Result<bool, AllocError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AllocError::Config(format!(
            "invalid boolean '{raw}' for {field}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default() {
        let c = AllocatorConfig::default();
        assert_eq!(c.memory_limit_mb, 0);
        assert_eq!(c.limit_bytes(), 0);
        assert!(c.usage_log_in_mb);
        assert!(!c.enable_usage_log);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
fraction_of_memory_to_use = 0.5
memory_limit_mb = 100
enable_usage_log = true
selected_devices = [1]
"#;
        let c = AllocatorConfig::from_toml(toml).unwrap();
        assert_eq!(c.fraction_of_memory_to_use, 0.5);
        assert_eq!(c.limit_bytes(), 100 << 20);
        assert!(c.enable_usage_log);
        assert_eq!(c.selected_devices, vec![1]);
        // Unspecified fields keep their defaults.
        assert_eq!(c.initial_reserve_mb, 0);
        assert!(c.usage_log_in_mb);
    }

    #[test]
    fn test_from_toml_rejects_bad_fraction() {
        let err = AllocatorConfig::from_toml("fraction_of_memory_to_use = 1.5").unwrap_err();
        assert!(matches!(err, AllocError::Config(_)));
        assert!(AllocatorConfig::from_toml("fraction_of_memory_to_use = 0.0").is_err());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = AllocatorConfig {
            memory_limit_mb: 2048,
            selected_devices: vec![0, 2],
            ..Default::default()
        };
        let back = AllocatorConfig::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join("gpumem_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("allocator.toml");
        std::fs::write(&path, "memory_limit_mb = 64\n").unwrap();
        let c = AllocatorConfig::from_file(&path).unwrap();
        assert_eq!(c.memory_limit_mb, 64);
        let _ = std::fs::remove_file(&path);

        assert!(AllocatorConfig::from_file(&dir.join("missing.toml")).is_err());
    }

    #[test]
    fn test_overrides() {
        let c = AllocatorConfig::default()
            .with_overrides(lookup(&[
                ("GPUMEM_MEMORY_LIMIT_MB", "512"),
                ("GPUMEM_ENABLE_USAGE_LOG", "yes"),
                ("GPUMEM_USAGE_LOG_IN_MB", "0"),
                ("GPUMEM_INITIAL_RESERVE_MB", "64"),
                ("GPUMEM_SELECTED_DEVICES", "0, 3"),
            ]))
            .unwrap();
        assert_eq!(c.memory_limit_mb, 512);
        assert!(c.enable_usage_log);
        assert!(!c.usage_log_in_mb);
        assert_eq!(c.initial_reserve_mb, 64);
        assert_eq!(c.selected_devices, vec![0, 3]);
    }

    #[test]
    fn test_overrides_invalid() {
        let bad_number = AllocatorConfig::default()
            .with_overrides(lookup(&[("GPUMEM_MEMORY_LIMIT_MB", "lots")]));
        assert!(matches!(bad_number, Err(AllocError::Config(_))));

        let bad_flag = AllocatorConfig::default()
            .with_overrides(lookup(&[("GPUMEM_ENABLE_USAGE_LOG", "maybe")]));
        assert!(bad_flag.is_err());

        let bad_device = AllocatorConfig::default()
            .with_overrides(lookup(&[("GPUMEM_SELECTED_DEVICES", "-1")]));
        assert!(bad_device.is_err());
    }

    #[test]
    fn test_no_overrides_is_identity() {
        let c = AllocatorConfig::default().with_overrides(|_| None).unwrap();
        assert_eq!(c, AllocatorConfig::default());
    }
}
