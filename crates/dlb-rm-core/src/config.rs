//! Device configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::MAX_NUM_VFS;

/// Port count cap applied on steppings before B0.
pub const DEFAULT_PORT_CAP: u32 = 127;

/// Hardware stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Revision {
    /// A0 stepping.
    A0,
    /// A1 stepping.
    A1,
    /// A2 stepping.
    A2,
    /// A3 stepping.
    A3,
    /// B0 stepping.
    #[default]
    B0,
}

/// Tunables for one device instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware stepping.
    pub revision: Revision,

    /// Number of virtual functions enabled (0..=16).
    pub num_vfs: u32,

    /// Upper bound on ports attached to domains at once. Unset means the
    /// stepping default.
    pub port_cap: Option<u32>,

    /// Poll attempts while waiting for a CQ to report zero inflights.
    pub cq_drain_retries: u32,

    /// Poll attempts while draining a queue.
    pub queue_drain_retries: u32,

    /// Pause between deferred-worker passes, in microseconds.
    pub worker_backoff_us: u64,

    /// Mailbox reply window, in milliseconds.
    pub mbox_timeout_ms: u64,

    /// Time a tenant waits for the primary during a device reset, in seconds.
    pub reset_timeout_s: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            revision: Revision::default(),
            num_vfs: 0,
            port_cap: None,
            cq_drain_retries: 409_600,
            queue_drain_retries: 65_536,
            worker_backoff_us: 100,
            mbox_timeout_ms: 1000,
            reset_timeout_s: 5,
        }
    }
}

impl DeviceConfig {
    /// Port cap in effect: the configured value, else 127 before B0.
    #[must_use]
    pub fn effective_port_cap(&self) -> Option<u32> {
        self.port_cap.or(if self.revision < Revision::B0 {
            Some(DEFAULT_PORT_CAP)
        } else {
            None
        })
    }

    /// Check the values against device limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an out-of-range value.
    pub fn validate(&self) -> Result<()> {
        if self.num_vfs as usize > MAX_NUM_VFS {
            return Err(Error::Config(format!(
                "num_vfs {} exceeds {MAX_NUM_VFS}",
                self.num_vfs
            )));
        }
        if self.cq_drain_retries == 0 || self.queue_drain_retries == 0 {
            return Err(Error::Config("drain retry counts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid configuration.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// Load configuration from standard locations, falling back to defaults.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed.
pub fn load_config() -> Result<DeviceConfig> {
    let config_paths = ["/etc/dlb-rm.toml", "/usr/lib/dlb-rm/dlb-rm.toml"];

    for path_str in &config_paths {
        let path = Path::new(path_str);
        if path.is_file() {
            tracing::debug!(path = path_str, "loading device config");
            return DeviceConfig::load(path);
        }
    }

    Ok(DeviceConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.revision, Revision::B0);
        assert_eq!(config.cq_drain_retries, 409_600);
        assert_eq!(config.queue_drain_retries, 65_536);
        assert_eq!(config.mbox_timeout_ms, 1000);
        assert_eq!(config.effective_port_cap(), None);
    }

    #[test]
    fn test_early_revision_port_cap() {
        let config = DeviceConfig {
            revision: Revision::A2,
            ..DeviceConfig::default()
        };
        assert_eq!(config.effective_port_cap(), Some(DEFAULT_PORT_CAP));

        let config = DeviceConfig {
            revision: Revision::A2,
            port_cap: Some(16),
            ..DeviceConfig::default()
        };
        assert_eq!(config.effective_port_cap(), Some(16));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            revision = "A1"
            num_vfs = 4
            cq_drain_retries = 10
        "#;

        let config = DeviceConfig::from_toml(toml).unwrap();
        assert_eq!(config.revision, Revision::A1);
        assert_eq!(config.num_vfs, 4);
        assert_eq!(config.cq_drain_retries, 10);
        assert_eq!(config.queue_drain_retries, 65_536); // Default
    }

    #[test]
    fn test_parse_empty_is_default() {
        let config = DeviceConfig::from_toml("").unwrap();
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn test_too_many_vfs_rejected() {
        let err = DeviceConfig::from_toml("num_vfs = 17").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_revision_rejected() {
        assert!(DeviceConfig::from_toml(r#"revision = "C0""#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = DeviceConfig::load("/nonexistent/dlb-rm.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
