//! Terminal collaborator: answers core questions on stdin.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use odin_core::{Collaborator, PartitionName};

pub struct TerminalCollaborator {
    /// Approve every confirmation without asking (`--yes`).
    assume_yes: bool,
}

impl TerminalCollaborator {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    fn ask(&self, question: &str) -> Option<String> {
        eprint!("{question} ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Collaborator for TerminalCollaborator {
    fn request_partition_file(&self, partition: PartitionName) -> Option<PathBuf> {
        let answer = self.ask(&format!("Image for {partition} (blank to skip):"))?;
        if answer.is_empty() {
            None
        } else {
            Some(PathBuf::from(answer))
        }
    }

    fn confirm_action(&self, prompt: &str) -> bool {
        if self.assume_yes {
            eprintln!("{prompt} [auto-confirmed]");
            return true;
        }
        matches!(
            self.ask(&format!("{prompt} [y/N]")).as_deref(),
            Some("y" | "Y" | "yes" | "YES")
        )
    }
}
