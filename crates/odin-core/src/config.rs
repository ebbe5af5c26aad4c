//! Tool configuration.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dispatcher::DEFAULT_QUERY_TIMEOUT;

const MIB: u64 = 1024 * 1024;

/// Paths to the transport tools and the timing knobs of the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Debug-bridge binary.
    pub adb_path: String,
    /// Bootloader-protocol binary.
    pub fastboot_path: String,
    /// Download-mode transport binary.
    pub odin_path: String,
    /// Device monitor polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Timeout for listing and other query commands, in seconds.
    pub query_timeout_secs: u64,
    /// Timeout for reboot commands, in seconds.
    pub reboot_timeout_secs: u64,
    /// Timeout for a sideload transfer, in seconds.
    pub sideload_timeout_secs: u64,
    /// Minimum timeout of one partition write, in seconds.
    pub step_timeout_floor_secs: u64,
    /// Extra allowance per MiB of image, in milliseconds.
    pub step_timeout_per_mib_ms: u64,
    /// Cap on one partition write, in seconds.
    pub step_timeout_max_secs: u64,
    /// Reboot the device after a completed flash.
    pub reboot_after_flash: bool,
    /// Enumerate USB for download-mode devices when no tool reports one.
    pub usb_probe: bool,
    /// Additional output fragments that mark a partition write as failed.
    pub extra_error_patterns: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            fastboot_path: "fastboot".to_string(),
            odin_path: "odin4".to_string(),
            poll_interval_ms: 5000,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
            reboot_timeout_secs: 15,
            sideload_timeout_secs: 30 * 60,
            step_timeout_floor_secs: 60,
            step_timeout_per_mib_ms: 2000,
            step_timeout_max_secs: 2 * 60 * 60,
            reboot_after_flash: true,
            usb_probe: true,
            extra_error_patterns: Vec::new(),
        }
    }
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs.max(1))
    }

    pub fn sideload_timeout(&self) -> Duration {
        Duration::from_secs(self.sideload_timeout_secs.max(1))
    }

    /// Timeout for writing an image of `size` bytes: floor plus a per-MiB allowance, capped.
    pub fn step_timeout(&self, size: u64) -> Duration {
        let mib = size.div_ceil(MIB);
        let floor = Duration::from_secs(self.step_timeout_floor_secs);
        let transfer = Duration::from_millis(mib.saturating_mul(self.step_timeout_per_mib_ms));
        let max = Duration::from_secs(self.step_timeout_max_secs).max(floor);
        floor.saturating_add(transfer).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_timeout_scales_with_size() {
        let config = ToolConfig::default();
        assert_eq!(config.step_timeout(0), Duration::from_secs(60));
        assert_eq!(config.step_timeout(MIB), Duration::from_secs(62));
        assert_eq!(config.step_timeout(100 * MIB), Duration::from_secs(260));
    }

    #[test]
    fn test_step_timeout_is_capped() {
        let config = ToolConfig::default();
        let huge = 100 * 1024 * MIB;
        assert_eq!(config.step_timeout(huge), Duration::from_secs(2 * 60 * 60));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ToolConfig = toml::from_str("odin_path = \"/opt/odin4\"\n").unwrap();
        assert_eq!(config.odin_path, "/opt/odin4");
        assert_eq!(config.adb_path, "adb");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odin.toml");

        let config = ToolConfig {
            reboot_after_flash: false,
            extra_error_patterns: vec!["secure check fail".into()],
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        assert_eq!(ToolConfig::load_from_file(&path).unwrap(), config);
    }
}
