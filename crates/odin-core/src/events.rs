//! Event system for UI decoupling.
//!
//! The shell subscribes to device transitions and session progress
//! without the core knowing how they are rendered.

use std::sync::mpsc;

use crate::device::Device;
use crate::error::ErrorKind;
use crate::monitor::MonitorState;
use crate::session::{FlashSession, SessionState};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the monitor, the orchestrator and ad-hoc operations.
#[derive(Debug, Clone)]
pub enum OdinEvent {
    /// Monitor observed a different device state.
    DeviceStateChanged {
        from: MonitorState,
        to: MonitorState,
        device: Device,
    },
    /// Session changed state or recorded a step.
    SessionStateChanged { session: FlashSession },
    /// A reboot or sideload finished. `error` is `None` on success.
    OperationFinished {
        operation: String,
        error: Option<ErrorKind>,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OdinObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OdinEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OdinObserver for NullObserver {
    fn on_event(&self, _event: &OdinEvent) {}
}

/// Forwards events into a channel the shell drains at its own pace.
pub struct ChannelObserver {
    sender: mpsc::Sender<OdinEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<OdinEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl OdinObserver for ChannelObserver {
    fn on_event(&self, event: &OdinEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OdinObserver for TracingObserver {
    fn on_event(&self, event: &OdinEvent) {
        match event {
            OdinEvent::DeviceStateChanged { from, to, device } => {
                if device.is_connected() {
                    tracing::info!(from = %from, to = %to, id = %device.id, "Device state changed");
                } else {
                    tracing::warn!(from = %from, to = %to, "Device state changed");
                }
            }
            OdinEvent::SessionStateChanged { session } => match session.state() {
                SessionState::Failed { step, reason } => {
                    tracing::error!(
                        step = step,
                        partition = ?session.partition_at(step),
                        reason = %reason,
                        "Flash session failed"
                    );
                }
                state => {
                    tracing::info!(
                        state = %state,
                        completed_steps = session.results().len(),
                        total_steps = session.steps().len(),
                        "Flash session"
                    );
                }
            },
            OdinEvent::OperationFinished { operation, error } => match error {
                None => tracing::info!(operation = %operation, "Operation complete"),
                Some(kind) => tracing::error!(operation = %operation, error = %kind, "Operation failed"),
            },
            OdinEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards() {
        let (observer, receiver) = ChannelObserver::new();
        observer.on_event(&OdinEvent::Log {
            level: LogLevel::Info,
            message: "hello".into(),
        });

        match receiver.try_recv().unwrap() {
            OdinEvent::Log { message, .. } => assert_eq!(message, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, receiver) = ChannelObserver::new();
        drop(receiver);
        observer.on_event(&OdinEvent::Log {
            level: LogLevel::Warn,
            message: "nobody home".into(),
        });
    }
}
