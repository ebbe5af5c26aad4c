//! Odin-Core: device-session core for Samsung-style flashing.
//!
//! Drives the external transport tools (`adb`, `fastboot`, and the
//! download-mode tool `odin4`) to detect a device and flash partition
//! images in a fixed order.
//!
//! # Architecture
//!
//! - **Dispatcher**: runs a tool with a structured argument list and a timeout (process, mock)
//! - **Monitor**: background poller publishing a single-writer device snapshot
//! - **Partition**: the BL/AP/CP/CSC/HOME_CSC selection registry
//! - **Session**: flash orchestrator and session state machine
//! - **Ops**: reboot, sideload and raw device listing outside a session
//! - **Events**: observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use odin_core::{
//!     CancelToken, DeviceMonitor, FlashOrchestrator, PartitionName, PartitionRegistry,
//!     ProcessDispatcher, ToolConfig, TracingObserver,
//! };
//!
//! let config = ToolConfig::default();
//! let dispatcher = Arc::new(ProcessDispatcher::new());
//! let observer = Arc::new(TracingObserver);
//!
//! let mut monitor = DeviceMonitor::from_config(dispatcher.clone(), &config, observer.clone());
//! monitor.poll_once();
//! let monitor = monitor.spawn();
//!
//! let registry = PartitionRegistry::new();
//! registry.select(PartitionName::Ap, "AP_G991B.tar.md5").unwrap();
//!
//! let orchestrator = FlashOrchestrator::new(dispatcher, monitor.snapshot(), observer, config);
//! let session = orchestrator.run(&registry, &CancelToken::new()).unwrap();
//! println!("{}", session.state());
//! ```

pub mod collaborator;
pub mod commands;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod monitor;
pub mod ops;
pub mod partition;
pub mod session;
pub mod usb;

// Re-exports for convenience
pub use collaborator::{Collaborator, ScriptedCollaborator};
pub use commands::RebootTarget;
pub use config::ToolConfig;
pub use device::{ConnectionMode, Device};
pub use dispatcher::{
    CommandDispatcher, CommandOutput, CommandSpec, DispatchError, MockDispatcher, MockResponse,
    ProcessDispatcher,
};
pub use error::{ErrorKind, OdinError};
pub use events::{ChannelObserver, LogLevel, NullObserver, OdinEvent, OdinObserver, TracingObserver};
pub use monitor::{DeviceMonitor, DeviceSnapshot, MonitorHandle, MonitorState};
pub use ops::DeviceOps;
pub use partition::{PartitionName, PartitionRegistry, PartitionSlot, RegistryError, SlotStatus};
pub use session::{CancelToken, FlashOrchestrator, FlashSession, RebootOutcome, SessionState};
pub use usb::UsbProbe;
