//! Device monitor: background presence/mode detection.
//!
//! A single [`DeviceMonitor`] owns the write side of the device snapshot.
//! Everyone else holds a [`DeviceSnapshot`] and reads whole [`Device`] values.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::commands;
use crate::config::ToolConfig;
use crate::device::{ConnectionMode, Device, parse_listing};
use crate::dispatcher::{CommandDispatcher, CommandSpec};
use crate::events::{OdinEvent, OdinObserver};
use crate::usb::UsbProbe;

/// Monitor state machine: `Unknown -> {Disconnected, Connected(mode)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No poll has completed yet.
    Unknown,
    Disconnected,
    Connected(ConnectionMode),
}

impl MonitorState {
    fn of(device: &Device) -> Self {
        if device.is_connected() {
            MonitorState::Connected(device.mode)
        } else {
            MonitorState::Disconnected
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Unknown => write!(f, "Unknown"),
            MonitorState::Disconnected => write!(f, "Disconnected"),
            MonitorState::Connected(mode) => write!(f, "Connected ({})", mode),
        }
    }
}

/// One way of asking "is a device attached, and in which mode?".
pub trait DeviceProbe: Send {
    /// Mode reported when this probe finds a device.
    fn mode(&self) -> ConnectionMode;

    /// Id of the attached device, if any. Failures mean "nothing found".
    fn probe(&self) -> Option<String>;
}

/// Probe backed by a transport tool's device listing.
pub struct ToolProbe {
    dispatcher: Arc<dyn CommandDispatcher>,
    command: CommandSpec,
    mode: ConnectionMode,
    timeout: Duration,
}

impl ToolProbe {
    pub fn new(
        dispatcher: Arc<dyn CommandDispatcher>,
        config: &ToolConfig,
        mode: ConnectionMode,
    ) -> Option<Self> {
        let command = commands::list_devices(config, mode)?;
        Some(Self {
            dispatcher,
            command,
            mode,
            timeout: config.query_timeout(),
        })
    }
}

impl DeviceProbe for ToolProbe {
    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn probe(&self) -> Option<String> {
        match self.dispatcher.execute(&self.command, self.timeout) {
            Ok(output) => parse_listing(&output.stdout),
            Err(e) => {
                debug!(command = %self.command, error = %e, "Probe failed");
                None
            }
        }
    }
}

/// Read side of the device snapshot. Cheap to clone.
#[derive(Clone)]
pub struct DeviceSnapshot {
    inner: Arc<RwLock<Device>>,
}

impl DeviceSnapshot {
    /// The latest published device, read in one piece.
    pub fn current(&self) -> Device {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Write side of the device snapshot. Not cloneable: exactly one writer exists.
pub struct SnapshotWriter {
    inner: Arc<RwLock<Device>>,
}

impl SnapshotWriter {
    pub fn publish(&self, device: Device) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = device;
    }

    pub fn reader(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Create a snapshot cell starting out disconnected.
pub fn snapshot_channel() -> (SnapshotWriter, DeviceSnapshot) {
    let writer = SnapshotWriter {
        inner: Arc::new(RwLock::new(Device::default())),
    };
    let reader = writer.reader();
    (writer, reader)
}

pub struct DeviceMonitor {
    /// Tried in order; the first hit wins.
    probes: Vec<Box<dyn DeviceProbe>>,
    writer: SnapshotWriter,
    current: Device,
    state: MonitorState,
    observer: Arc<dyn OdinObserver>,
    interval: Duration,
}

impl DeviceMonitor {
    pub fn new(
        probes: Vec<Box<dyn DeviceProbe>>,
        observer: Arc<dyn OdinObserver>,
        interval: Duration,
    ) -> Self {
        let (writer, _) = snapshot_channel();
        Self {
            probes,
            writer,
            current: Device::default(),
            state: MonitorState::Unknown,
            observer,
            interval,
        }
    }

    /// adb listing first, then fastboot, then the download-mode tool, then USB.
    pub fn from_config(
        dispatcher: Arc<dyn CommandDispatcher>,
        config: &ToolConfig,
        observer: Arc<dyn OdinObserver>,
    ) -> Self {
        let mut probes: Vec<Box<dyn DeviceProbe>> = Vec::new();
        for mode in [
            ConnectionMode::Adb,
            ConnectionMode::Fastboot,
            ConnectionMode::DownloadMode,
        ] {
            if let Some(probe) = ToolProbe::new(Arc::clone(&dispatcher), config, mode) {
                probes.push(Box::new(probe));
            }
        }
        if config.usb_probe {
            probes.push(Box::new(UsbProbe::new()));
        }
        Self::new(probes, observer, config.poll_interval())
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.writer.reader()
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run every probe once, publish the result and emit an event if it changed.
    #[instrument(skip(self), level = "debug")]
    pub fn poll_once(&mut self) -> Device {
        let found = self
            .probes
            .iter()
            .find_map(|p| p.probe().map(|id| (id, p.mode())));

        let device = match found {
            Some((id, mode)) => Device::connected(id, mode),
            None => Device::disconnected(self.current.last_seen),
        };
        let next = MonitorState::of(&device);
        let changed = next != self.state || device.id != self.current.id;

        self.writer.publish(device.clone());
        self.current = device.clone();

        if changed {
            info!(from = %self.state, to = %next, id = %device.id, "Device transition");
            self.observer.on_event(&OdinEvent::DeviceStateChanged {
                from: self.state,
                to: next,
                device: device.clone(),
            });
            self.state = next;
        }

        device
    }

    /// Move the monitor onto its own thread. Polls immediately, then every interval.
    pub fn spawn(mut self) -> MonitorHandle {
        let snapshot = self.snapshot();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;

        let thread = thread::spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "Device monitor started");
            loop {
                self.poll_once();
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Device monitor stopped");
        });

        MonitorHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
            snapshot,
        }
    }
}

/// Handle to a running monitor. Stops and joins the thread on drop.
pub struct MonitorHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    snapshot: DeviceSnapshot,
}

impl MonitorHandle {
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Graceful stop; waits for an in-flight poll to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
