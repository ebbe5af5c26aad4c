//! Argument lists for the transport tools.

use std::fmt;
use std::path::Path;

use crate::config::ToolConfig;
use crate::device::ConnectionMode;
use crate::dispatcher::CommandSpec;
use crate::partition::PartitionName;

/// Prefix of ids produced by USB enumeration rather than by a tool listing.
pub const USB_ID_PREFIX: &str = "usb:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootTarget {
    Bootloader,
    Recovery,
}

impl fmt::Display for RebootTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootTarget::Bootloader => write!(f, "bootloader"),
            RebootTarget::Recovery => write!(f, "recovery"),
        }
    }
}

/// `<tool> devices` (or `odin4 -l`) for the tool serving `mode`.
pub fn list_devices(config: &ToolConfig, mode: ConnectionMode) -> Option<CommandSpec> {
    match mode {
        ConnectionMode::Adb => Some(CommandSpec::new(&config.adb_path, ["devices"])),
        ConnectionMode::Fastboot => Some(CommandSpec::new(&config.fastboot_path, ["devices"])),
        ConnectionMode::DownloadMode => Some(CommandSpec::new(&config.odin_path, ["-l"])),
        ConnectionMode::None => None,
    }
}

/// Reboot through the debug bridge or the bootloader protocol.
pub fn reboot(
    config: &ToolConfig,
    mode: ConnectionMode,
    device_id: &str,
    target: RebootTarget,
) -> Option<CommandSpec> {
    let program = match mode {
        ConnectionMode::Adb => &config.adb_path,
        ConnectionMode::Fastboot => &config.fastboot_path,
        _ => return None,
    };
    let target = target.to_string();
    Some(CommandSpec::new(
        program,
        ["-s", device_id, "reboot", target.as_str()],
    ))
}

/// Push one image through the download-mode tool.
pub fn write_partition(
    config: &ToolConfig,
    partition: PartitionName,
    image: &Path,
    device_id: &str,
) -> CommandSpec {
    let mut args = vec![
        partition.odin_flag().to_string(),
        image.to_string_lossy().into_owned(),
    ];
    push_device_arg(&mut args, device_id);
    CommandSpec::new(&config.odin_path, args)
}

/// Leave download mode and boot normally.
pub fn reboot_download_mode(config: &ToolConfig, device_id: &str) -> CommandSpec {
    let mut args = vec!["--reboot".to_string()];
    push_device_arg(&mut args, device_id);
    CommandSpec::new(&config.odin_path, args)
}

pub fn sideload(config: &ToolConfig, device_id: &str, package: &Path) -> CommandSpec {
    let package = package.to_string_lossy();
    CommandSpec::new(
        &config.adb_path,
        ["-s", device_id, "sideload", &*package],
    )
}

fn push_device_arg(args: &mut Vec<String>, device_id: &str) {
    // USB-enumerated ids are not paths the tool understands; let it pick the device.
    if !device_id.is_empty() && !device_id.starts_with(USB_ID_PREFIX) {
        args.push("-d".to_string());
        args.push(device_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_partition_args() {
        let config = ToolConfig::default();
        let cmd = write_partition(
            &config,
            PartitionName::HomeCsc,
            Path::new("/fw/HOME_CSC.tar.md5"),
            "/dev/bus/usb/001/012",
        );
        assert_eq!(cmd.program, "odin4");
        assert_eq!(
            cmd.args,
            vec!["-u", "/fw/HOME_CSC.tar.md5", "-d", "/dev/bus/usb/001/012"]
        );
    }

    #[test]
    fn test_usb_ids_are_not_passed() {
        let config = ToolConfig::default();
        let cmd = reboot_download_mode(&config, "usb:04E8:685D");
        assert_eq!(cmd.args, vec!["--reboot"]);
    }

    #[test]
    fn test_path_with_spaces_stays_one_argument() {
        let config = ToolConfig::default();
        let cmd = sideload(&config, "R58M", Path::new("/tmp/my update.zip"));
        assert_eq!(cmd.args, vec!["-s", "R58M", "sideload", "/tmp/my update.zip"]);
    }

    #[test]
    fn test_reboot_by_mode() {
        let config = ToolConfig::default();
        let cmd = reboot(&config, ConnectionMode::Fastboot, "R58M", RebootTarget::Recovery).unwrap();
        assert_eq!(cmd.to_string(), "fastboot -s R58M reboot recovery");
        assert!(reboot(&config, ConnectionMode::DownloadMode, "x", RebootTarget::Recovery).is_none());
    }

    #[test]
    fn test_list_devices() {
        let config = ToolConfig::default();
        assert_eq!(
            list_devices(&config, ConnectionMode::DownloadMode)
                .unwrap()
                .to_string(),
            "odin4 -l"
        );
        assert!(list_devices(&config, ConnectionMode::None).is_none());
    }
}
