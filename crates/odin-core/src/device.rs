//! Device snapshot types and listing parsers.

use std::fmt;

use chrono::{DateTime, Utc};

/// Personality the attached device currently exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// Debug bridge (system, recovery or sideload).
    Adb,
    /// Bootloader protocol.
    Fastboot,
    /// Vendor download mode.
    DownloadMode,
    /// Nothing attached.
    None,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Adb => write!(f, "ADB"),
            ConnectionMode::Fastboot => write!(f, "Fastboot"),
            ConnectionMode::DownloadMode => write!(f, "Download Mode"),
            ConnectionMode::None => write!(f, "None"),
        }
    }
}

/// The one logical device on the port. Replaced wholesale on every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Transport identifier (serial or USB path). Empty when disconnected.
    pub id: String,
    pub mode: ConnectionMode,
    /// When the device was last observed by a probe.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub fn connected(id: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            id: id.into(),
            mode,
            last_seen: Some(Utc::now()),
        }
    }

    /// Absent device, remembering when one was last seen.
    pub fn disconnected(last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            id: String::new(),
            mode: ConnectionMode::None,
            last_seen,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.mode != ConnectionMode::None
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::disconnected(None)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_connected() {
            write!(f, "Device: {} ({})", self.id, self.mode)
        } else {
            write!(f, "Device Not Connected")
        }
    }
}

/// adb states that mean the device cannot take commands.
const UNUSABLE_STATES: &[&str] = &["offline", "no", "unknown"];

/// Extract the device id from a tool's device listing.
///
/// Only the first data row counts. Header lines (`List of devices attached`)
/// and adb daemon chatter (`* daemon started successfully`) are skipped.
pub fn parse_listing(stdout: &str) -> Option<String> {
    let row = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_header(line))?;

    let mut tokens = row.split_whitespace();
    let id = tokens.next()?;
    if let Some(state) = tokens.next()
        && UNUSABLE_STATES.contains(&state)
    {
        return None;
    }
    Some(id.to_string())
}

fn is_header(line: &str) -> bool {
    line.starts_with("List of devices") || line.starts_with('*') || line.starts_with("adb server")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_adb_listing() {
        let out = "List of devices attached\nR58M123ABC\tdevice\n\n";
        assert_eq!(parse_listing(out).as_deref(), Some("R58M123ABC"));
    }

    #[test]
    fn test_parse_adb_listing_with_daemon_chatter() {
        let out = "* daemon not running; starting now at tcp:5037\n\
                   * daemon started successfully\n\
                   List of devices attached\n\
                   R58M123ABC\trecovery\n";
        assert_eq!(parse_listing(out).as_deref(), Some("R58M123ABC"));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert_eq!(parse_listing("List of devices attached\n\n"), None);
        assert_eq!(parse_listing(""), None);
    }

    #[test]
    fn test_parse_fastboot_listing() {
        assert_eq!(
            parse_listing("R58M123ABC\tfastboot\n").as_deref(),
            Some("R58M123ABC")
        );
    }

    #[test]
    fn test_parse_download_mode_listing() {
        assert_eq!(
            parse_listing("/dev/bus/usb/001/012\n").as_deref(),
            Some("/dev/bus/usb/001/012")
        );
    }

    #[test]
    fn test_offline_device_is_absent() {
        assert_eq!(
            parse_listing("List of devices attached\nR58M123ABC\toffline\n"),
            None
        );
    }

    #[test]
    fn test_device_display() {
        let dev = Device::connected("R58M", ConnectionMode::Adb);
        assert_eq!(dev.to_string(), "Device: R58M (ADB)");
        assert_eq!(Device::default().to_string(), "Device Not Connected");
    }
}
