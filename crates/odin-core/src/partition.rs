//! Partition registry: which image goes to which slot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collaborator::Collaborator;
use crate::error::ErrorKind;

/// Extensions the download-mode tool accepts.
const IMAGE_EXTENSIONS: &[&str] = &[".tar", ".md5", ".img", ".bin", ".lz4"];

/// Named firmware region addressed independently during flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionName {
    /// Bootloader.
    Bl,
    /// Application processor (system images).
    Ap,
    /// Modem.
    Cp,
    /// Consumer software customization (wipes data).
    Csc,
    /// CSC variant that keeps user data.
    HomeCsc,
}

impl PartitionName {
    /// Canonical flashing order: boot chain and modem before application partitions.
    pub const FLASH_ORDER: [PartitionName; 5] = [
        PartitionName::Bl,
        PartitionName::Ap,
        PartitionName::Cp,
        PartitionName::Csc,
        PartitionName::HomeCsc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionName::Bl => "BL",
            PartitionName::Ap => "AP",
            PartitionName::Cp => "CP",
            PartitionName::Csc => "CSC",
            PartitionName::HomeCsc => "HOME_CSC",
        }
    }

    /// Option the download-mode tool uses for this slot.
    pub fn odin_flag(&self) -> &'static str {
        match self {
            PartitionName::Bl => "-b",
            PartitionName::Ap => "-a",
            PartitionName::Cp => "-c",
            PartitionName::Csc => "-s",
            PartitionName::HomeCsc => "-u",
        }
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BL" => Ok(PartitionName::Bl),
            "AP" => Ok(PartitionName::Ap),
            "CP" => Ok(PartitionName::Cp),
            "CSC" => Ok(PartitionName::Csc),
            "HOME_CSC" | "HOME-CSC" => Ok(PartitionName::HomeCsc),
            _ => Err(RegistryError::UnknownPartition(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Unset,
    Selected,
    /// A selected file failed revalidation.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    pub name: PartitionName,
    pub path: Option<PathBuf>,
    /// File size in bytes at selection time.
    pub size: u64,
    pub status: SlotStatus,
}

impl PartitionSlot {
    fn unset(name: PartitionName) -> Self {
        Self {
            name,
            path: None,
            size: 0,
            status: SlotStatus::Unset,
        }
    }

    /// Button-style label for the shell.
    pub fn label(&self) -> String {
        match (&self.status, &self.path) {
            (SlotStatus::Selected, Some(path)) => {
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                format!("{}: {}", self.name, file)
            }
            (SlotStatus::Invalid, _) => format!("{}: invalid selection", self.name),
            _ => format!("Select {} File", self.name),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("File is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("Unsupported image extension: {}", .0.display())]
    UnsupportedExtension(PathBuf),

    #[error("Cannot read {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("Selections are locked by an active flash session")]
    Locked,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Locked => ErrorKind::SessionBusy,
            _ => ErrorKind::ValidationError,
        }
    }
}

/// Check that `path` is an existing, non-empty regular file. Returns its size.
pub fn check_file(path: &Path) -> Result<u64, RegistryError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RegistryError::NotFound(path.to_path_buf()),
        _ => RegistryError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
    })?;

    if !meta.is_file() {
        return Err(RegistryError::NotAFile(path.to_path_buf()));
    }
    if meta.len() == 0 {
        return Err(RegistryError::Empty(path.to_path_buf()));
    }
    Ok(meta.len())
}

/// [`check_file`] plus the image extension check.
pub fn validate_image(path: &Path) -> Result<u64, RegistryError> {
    let size = check_file(path)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        return Err(RegistryError::UnsupportedExtension(path.to_path_buf()));
    }
    Ok(size)
}

struct RegistryInner {
    slots: BTreeMap<PartitionName, PartitionSlot>,
    locked: bool,
}

/// Current partition → image mapping.
///
/// Shared between the shell (selection) and the orchestrator (flashing).
/// While a [`RegistryLease`] is alive, selections are frozen.
pub struct PartitionRegistry {
    inner: Mutex<RegistryInner>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        let slots = PartitionName::FLASH_ORDER
            .iter()
            .map(|&name| (name, PartitionSlot::unset(name)))
            .collect();
        Self {
            inner: Mutex::new(RegistryInner {
                slots,
                locked: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign `path` to `name`. On rejection the slot keeps its previous state.
    pub fn select(&self, name: PartitionName, path: impl AsRef<Path>) -> Result<(), RegistryError> {
        let path = path.as_ref();
        let mut inner = self.lock();
        if inner.locked {
            return Err(RegistryError::Locked);
        }

        let size = validate_image(path).inspect_err(|e| {
            warn!(partition = %name, error = %e, "Rejected selection");
        })?;

        info!(partition = %name, path = %path.display(), size, "Selected image");
        inner.slots.insert(
            name,
            PartitionSlot {
                name,
                path: Some(path.to_path_buf()),
                size,
                status: SlotStatus::Selected,
            },
        );
        Ok(())
    }

    /// Ask the collaborator for a file and select it. `Ok(false)` when the user declined.
    pub fn select_from(
        &self,
        name: PartitionName,
        collaborator: &dyn Collaborator,
    ) -> Result<bool, RegistryError> {
        match collaborator.request_partition_file(name) {
            Some(path) => self.select(name, path).map(|()| true),
            None => {
                debug!(partition = %name, "No file provided");
                Ok(false)
            }
        }
    }

    pub fn clear(&self, name: PartitionName) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if inner.locked {
            return Err(RegistryError::Locked);
        }
        inner.slots.insert(name, PartitionSlot::unset(name));
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if inner.locked {
            return Err(RegistryError::Locked);
        }
        clear_slots(&mut inner);
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<PartitionName, PartitionSlot> {
        self.lock().slots.clone()
    }

    /// Selected slots in flashing order.
    pub fn selected(&self) -> Vec<PartitionSlot> {
        selected_slots(&self.lock())
    }

    pub fn is_locked(&self) -> bool {
        self.lock().locked
    }

    /// Freeze selections for the lifetime of a flash session.
    pub fn lease(&self) -> Result<RegistryLease<'_>, RegistryError> {
        let mut inner = self.lock();
        if inner.locked {
            return Err(RegistryError::Locked);
        }
        inner.locked = true;
        Ok(RegistryLease { registry: self })
    }
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn clear_slots(inner: &mut RegistryInner) {
    for (name, slot) in inner.slots.iter_mut() {
        *slot = PartitionSlot::unset(*name);
    }
}

fn selected_slots(inner: &RegistryInner) -> Vec<PartitionSlot> {
    // BTreeMap order follows the enum, which is the flashing order
    inner
        .slots
        .values()
        .filter(|s| s.status == SlotStatus::Selected)
        .cloned()
        .collect()
}

/// Exclusive hold on the registry taken by the orchestrator. Unlocks on drop.
pub struct RegistryLease<'a> {
    registry: &'a PartitionRegistry,
}

impl RegistryLease<'_> {
    pub fn selected(&self) -> Vec<PartitionSlot> {
        selected_slots(&self.registry.lock())
    }

    /// Flag a slot whose file no longer validates.
    pub fn mark_invalid(&self, name: PartitionName) {
        if let Some(slot) = self.registry.lock().slots.get_mut(&name) {
            slot.status = SlotStatus::Invalid;
        }
    }

    /// Consume the selections once they have been flashed.
    pub fn clear_all(&self) {
        clear_slots(&mut self.registry.lock());
    }
}

impl Drop for RegistryLease<'_> {
    fn drop(&mut self) {
        self.registry.lock().locked = false;
    }
}
