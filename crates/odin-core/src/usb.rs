//! USB enumeration probe for download mode (nusb).
//!
//! Download-mode devices are invisible to adb/fastboot. When the
//! download-mode tool is absent or reports nothing, a raw VID/PID
//! match still tells the operator a device is waiting.

use nusb::{MaybeFuture, list_devices};
use tracing::debug;

use crate::commands::USB_ID_PREFIX;
use crate::device::ConnectionMode;
use crate::monitor::DeviceProbe;

pub const SAMSUNG_VENDOR_ID: u16 = 0x04E8;

/// Product ids the vendor uses for download mode.
pub const DOWNLOAD_MODE_PIDS: &[u16] = &[0x685D, 0x68C3];

pub fn is_download_mode(vid: u16, pid: u16) -> bool {
    vid == SAMSUNG_VENDOR_ID && DOWNLOAD_MODE_PIDS.contains(&pid)
}

/// Id reported for an enumerated device, e.g. `usb:04E8:685D`.
pub fn usb_id(vid: u16, pid: u16, serial: Option<&str>) -> String {
    match serial {
        Some(serial) if !serial.is_empty() => format!("{USB_ID_PREFIX}{vid:04X}:{pid:04X}:{serial}"),
        _ => format!("{USB_ID_PREFIX}{vid:04X}:{pid:04X}"),
    }
}

#[derive(Debug, Default)]
pub struct UsbProbe;

impl UsbProbe {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProbe for UsbProbe {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::DownloadMode
    }

    fn probe(&self) -> Option<String> {
        let devices = match list_devices().wait() {
            Ok(devices) => devices,
            Err(e) => {
                debug!(error = %e, "USB enumeration failed");
                return None;
            }
        };

        for info in devices {
            if is_download_mode(info.vendor_id(), info.product_id()) {
                let id = usb_id(info.vendor_id(), info.product_id(), info.serial_number());
                debug!(id = %id, "Found download-mode device on USB");
                return Some(id);
            }
        }
        None
    }
}
