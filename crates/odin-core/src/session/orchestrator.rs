//! Flash orchestrator - drives one session through the dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{info, instrument, warn};

use super::state::{FlashSession, FlashStep, RebootOutcome, SessionState, StepOutcome, StepResult};
use crate::collaborator::Collaborator;
use crate::commands;
use crate::config::ToolConfig;
use crate::device::{ConnectionMode, Device};
use crate::dispatcher::{CommandDispatcher, CommandOutput};
use crate::error::{ErrorKind, OdinError};
use crate::events::{LogLevel, OdinEvent, OdinObserver};
use crate::monitor::DeviceSnapshot;
use crate::partition::{PartitionRegistry, RegistryLease, validate_image};

/// odin4's own failure marker. Broader terms go in `extra_error_patterns`.
const WRITE_ERROR_PATTERNS: &[&str] = &["fail!"];

/// Cooperative cancellation, honoured between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Clears the busy flag when the session ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs flash sessions. Share one instance per process; it allows a single active session.
pub struct FlashOrchestrator {
    dispatcher: Arc<dyn CommandDispatcher>,
    device: DeviceSnapshot,
    observer: Arc<dyn OdinObserver>,
    config: ToolConfig,
    active: AtomicBool,
}

impl FlashOrchestrator {
    pub fn new(
        dispatcher: Arc<dyn CommandDispatcher>,
        device: DeviceSnapshot,
        observer: Arc<dyn OdinObserver>,
        config: ToolConfig,
    ) -> Self {
        Self {
            dispatcher,
            device,
            observer,
            config,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Preconditions that can be checked without touching the device.
    pub fn check_ready(&self, registry: &PartitionRegistry) -> Result<Device, OdinError> {
        if self.is_active() {
            return Err(OdinError::SessionBusy);
        }
        let device = self.device.current();
        if device.mode != ConnectionMode::DownloadMode {
            return Err(OdinError::DeviceNotConnected(format!(
                "flashing requires download mode, monitor reports {}",
                device.mode
            )));
        }
        if registry.selected().is_empty() {
            return Err(OdinError::ValidationError(
                "no partition has an image selected".into(),
            ));
        }
        Ok(device)
    }

    /// Ask the collaborator before flashing. `Ok(None)` when the user declines.
    pub fn run_confirmed(
        &self,
        registry: &PartitionRegistry,
        collaborator: &dyn Collaborator,
        cancel: &CancelToken,
    ) -> Result<Option<FlashSession>, OdinError> {
        let device = self.check_ready(registry)?;
        let partitions: Vec<String> = registry
            .selected()
            .iter()
            .map(|s| s.name.to_string())
            .collect();
        let prompt = format!(
            "Flash {} to {}? Interrupting the transfer can leave the device unbootable.",
            partitions.join(", "),
            device.id
        );
        if !collaborator.confirm_action(&prompt) {
            self.observer.on_event(&OdinEvent::Log {
                level: LogLevel::Info,
                message: "Flash cancelled by user".into(),
            });
            return Ok(None);
        }
        self.run(registry, cancel).map(Some)
    }

    /// Run one session to a terminal state.
    ///
    /// Precondition failures are returned as errors before any session exists.
    /// Once the session has started, failures are reported through its state.
    #[instrument(skip_all)]
    pub fn run(
        &self,
        registry: &PartitionRegistry,
        cancel: &CancelToken,
    ) -> Result<FlashSession, OdinError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected flash request: session already active");
            return Err(OdinError::SessionBusy);
        }
        let _active = ActiveGuard(&self.active);

        let device = self.device.current();
        if device.mode != ConnectionMode::DownloadMode {
            return Err(OdinError::DeviceNotConnected(format!(
                "flashing requires download mode, monitor reports {}",
                device.mode
            )));
        }

        let lease = registry.lease()?;
        let steps: Vec<FlashStep> = lease.selected().iter().map(FlashStep::from).collect();
        if steps.is_empty() {
            return Err(OdinError::ValidationError(
                "no partition has an image selected".into(),
            ));
        }

        let mut session = FlashSession::new(device.id.clone(), steps);
        info!(
            device = %device.id,
            steps = session.steps().len(),
            "Starting flash session"
        );
        self.emit(&session);

        self.transition(&mut session, SessionState::Preparing);
        if let Some((step, reason)) = self.prepare(&session, &lease) {
            self.transition(&mut session, SessionState::Failed { step, reason });
            return Ok(session);
        }

        for index in 0..session.steps().len() {
            if cancel.is_cancelled() {
                info!(completed_steps = index, "Cancellation requested, aborting");
                self.transition(&mut session, SessionState::Aborted);
                return Ok(session);
            }

            self.transition(&mut session, SessionState::Flashing { step: index });
            let result = self.flash_step(&device.id, &session.steps()[index]);
            let failure = match &result.outcome {
                StepOutcome::Succeeded => None,
                StepOutcome::Failed { reason, .. } => Some(*reason),
            };
            session.record(result);
            self.emit(&session);

            if let Some(reason) = failure {
                self.transition(&mut session, SessionState::Failed { step: index, reason });
                return Ok(session);
            }
        }

        self.transition(&mut session, SessionState::Completed);
        lease.clear_all();

        let reboot = if self.config.reboot_after_flash {
            self.reboot_device(&device.id)
        } else {
            RebootOutcome::Skipped
        };
        session.set_reboot(reboot);
        self.emit(&session);

        Ok(session)
    }

    /// Revalidate every file and re-confirm the device. Returns the failing step, if any.
    fn prepare(&self, session: &FlashSession, lease: &RegistryLease<'_>) -> Option<(usize, ErrorKind)> {
        for (index, step) in session.steps().iter().enumerate() {
            if let Err(e) = validate_image(&step.path) {
                warn!(partition = %step.partition, error = %e, "Selected image no longer valid");
                lease.mark_invalid(step.partition);
                return Some((index, ErrorKind::ValidationError));
            }
        }

        let device = self.device.current();
        if device.mode != ConnectionMode::DownloadMode || device.id != session.device_id() {
            warn!(expected = %session.device_id(), found = %device, "Device changed before flashing");
            return Some((0, ErrorKind::DeviceNotConnected));
        }
        None
    }

    fn flash_step(&self, device_id: &str, step: &FlashStep) -> StepResult {
        let started = Instant::now();

        let current = self.device.current();
        let outcome = if current.mode != ConnectionMode::DownloadMode || current.id != device_id {
            StepOutcome::Failed {
                reason: ErrorKind::TransportDisconnected,
                detail: format!("download-mode device {device_id} no longer reported, monitor sees {current}"),
            }
        } else {
            let command = commands::write_partition(&self.config, step.partition, &step.path, device_id);
            let timeout = self.config.step_timeout(step.size);
            info!(
                partition = %step.partition,
                size = step.size,
                timeout_secs = timeout.as_secs(),
                "Writing partition"
            );

            match self
                .dispatcher
                .execute(&command, timeout)
                .map_err(OdinError::from)
                .and_then(|output| self.check_write_output(&output))
            {
                Ok(()) => StepOutcome::Succeeded,
                Err(e) => StepOutcome::Failed {
                    reason: e.kind(),
                    detail: e.to_string(),
                },
            }
        };

        let result = StepResult {
            partition: step.partition,
            duration: started.elapsed(),
            outcome,
        };
        match &result.outcome {
            StepOutcome::Succeeded => {
                info!(partition = %step.partition, elapsed_ms = result.duration.as_millis() as u64, "Partition written")
            }
            StepOutcome::Failed { reason, detail } => {
                warn!(partition = %step.partition, reason = %reason, detail = %detail, "Partition write failed")
            }
        }
        result
    }

    fn check_write_output(&self, output: &CommandOutput) -> Result<(), OdinError> {
        let reported = WRITE_ERROR_PATTERNS
            .iter()
            .copied()
            .chain(self.config.extra_error_patterns.iter().map(String::as_str))
            .any(|p| output.mentions(p));
        if reported {
            return Err(OdinError::CommandFailed(format!(
                "transport reported an error: {}",
                output.stderr_tail()
            )));
        }
        Ok(())
    }

    fn reboot_device(&self, device_id: &str) -> RebootOutcome {
        let command = commands::reboot_download_mode(&self.config, device_id);
        match self.dispatcher.execute(&command, self.config.reboot_timeout()) {
            Ok(_) => {
                info!("Device rebooting");
                RebootOutcome::Succeeded
            }
            Err(e) => {
                warn!(error = %e, "Post-flash reboot failed");
                RebootOutcome::Failed {
                    reason: e.kind(),
                    detail: e.to_string(),
                }
            }
        }
    }

    fn transition(&self, session: &mut FlashSession, state: SessionState) {
        session.set_state(state);
        self.emit(session);
    }

    fn emit(&self, session: &FlashSession) {
        self.observer.on_event(&OdinEvent::SessionStateChanged {
            session: session.clone(),
        });
    }
}
