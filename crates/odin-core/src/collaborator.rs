//! Questions the core asks the shell.
//!
//! The core never opens dialogs; it pulls file paths and confirmations
//! through this trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::partition::PartitionName;

pub trait Collaborator: Send + Sync {
    /// Ask the user for the image to use for `partition`. `None` means cancelled.
    fn request_partition_file(&self, partition: PartitionName) -> Option<PathBuf>;

    /// Ask the user to approve a destructive action.
    fn confirm_action(&self, prompt: &str) -> bool;
}

/// Collaborator answering from a fixed script. Used by tests and non-interactive runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCollaborator {
    files: HashMap<PartitionName, PathBuf>,
    confirm: bool,
}

impl ScriptedCollaborator {
    pub fn new(confirm: bool) -> Self {
        Self {
            files: HashMap::new(),
            confirm,
        }
    }

    pub fn with_file(mut self, partition: PartitionName, path: impl AsRef<Path>) -> Self {
        self.files.insert(partition, path.as_ref().to_path_buf());
        self
    }
}

impl Collaborator for ScriptedCollaborator {
    fn request_partition_file(&self, partition: PartitionName) -> Option<PathBuf> {
        self.files.get(&partition).cloned()
    }

    fn confirm_action(&self, _prompt: &str) -> bool {
        self.confirm
    }
}
