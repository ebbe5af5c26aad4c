//! Ad-hoc device operations outside a flash session.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::collaborator::Collaborator;
use crate::commands::{self, RebootTarget};
use crate::config::ToolConfig;
use crate::device::ConnectionMode;
use crate::dispatcher::{CommandDispatcher, CommandSpec};
use crate::error::OdinError;
use crate::events::{LogLevel, OdinEvent, OdinObserver};
use crate::monitor::DeviceSnapshot;
use crate::partition::check_file;

pub struct DeviceOps {
    dispatcher: Arc<dyn CommandDispatcher>,
    device: DeviceSnapshot,
    observer: Arc<dyn OdinObserver>,
    config: ToolConfig,
}

impl DeviceOps {
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
        }
    }

    /// Raw `adb devices` listing.
    pub fn check_device(&self) -> Result<String, OdinError> {
        let command = CommandSpec::new(&self.config.adb_path, ["devices"]);
        let result = self
            .dispatcher
            .execute(&command, self.config.query_timeout())
            .map(|output| output.stdout)
            .map_err(OdinError::from);
        self.finish("check device", &result);
        result
    }

    /// Reboot into the bootloader or recovery via whichever tool sees the device.
    #[instrument(skip(self))]
    pub fn reboot(&self, target: RebootTarget) -> Result<(), OdinError> {
        let device = self.device.current();
        let operation = format!("reboot {target}");

        let result = match commands::reboot(&self.config, device.mode, &device.id, target) {
            Some(command) => self
                .dispatcher
                .execute(&command, self.config.reboot_timeout())
                .map(|_| info!(id = %device.id, target = %target, "Reboot issued"))
                .map_err(OdinError::from),
            None => Err(OdinError::DeviceNotConnected(format!(
                "reboot needs a device in ADB or Fastboot mode, monitor reports {}",
                device.mode
            ))),
        };
        self.finish(&operation, &result);
        result
    }

    /// Sideload an OTA package. `Ok(false)` when the user declines.
    #[instrument(skip_all, fields(package = %package.display()))]
    pub fn sideload(&self, package: &Path, collaborator: &dyn Collaborator) -> Result<bool, OdinError> {
        let device = self.device.current();
        if device.mode != ConnectionMode::Adb {
            let err = OdinError::DeviceNotConnected(format!(
                "sideload needs a device in ADB mode, monitor reports {}",
                device.mode
            ));
            self.finish("sideload", &Err::<(), _>(err.clone()));
            return Err(err);
        }

        let size = match check_file(package) {
            Ok(size) => size,
            Err(e) => {
                let err = OdinError::from(e);
                self.finish("sideload", &Err::<(), _>(err.clone()));
                return Err(err);
            }
        };

        let prompt = format!(
            "Sideload {} ({} bytes) to {}?",
            package.display(),
            size,
            device.id
        );
        if !collaborator.confirm_action(&prompt) {
            self.observer.on_event(&OdinEvent::Log {
                level: LogLevel::Info,
                message: "Sideload cancelled by user".into(),
            });
            return Ok(false);
        }

        let command = commands::sideload(&self.config, &device.id, package);
        let result = self
            .dispatcher
            .execute(&command, self.config.sideload_timeout())
            .map(|_| ())
            .map_err(OdinError::from);
        self.finish("sideload", &result);
        result.map(|()| true)
    }

    fn finish<T>(&self, operation: &str, result: &Result<T, OdinError>) {
        if let Err(e) = result {
            warn!(operation, error = %e, "Device operation failed");
        }
        self.observer.on_event(&OdinEvent::OperationFinished {
            operation: operation.to_string(),
            error: result.as_ref().err().map(OdinError::kind),
        });
    }
}
