use super::ImportKind;
use crate::normalization::FieldError;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-item problems. None of these abort a run.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportFailure {
    #[error("line {line}: skipped ({reason})")]
    RowSkipped { line: usize, reason: String },

    #[error("line {line}: validation failed: {}", .errors.iter().join("; "))]
    ValidationFailed { line: usize, errors: Vec<FieldError> },

    #[error("line {line}: could not save '{name}': {reason}")]
    PersistFailed {
        line: usize,
        name: String,
        reason: String,
    },

    #[error("line {line}: image {url} for '{owner}' failed: {reason}")]
    AssetFetchFailed {
        line: usize,
        owner: String,
        url: String,
        reason: String,
    },

    #[error("line {line}: amenity '{token}' for '{owner}' unresolved: {reason}")]
    RelationResolutionFailed {
        line: usize,
        owner: String,
        token: String,
        reason: String,
    },
}

/// Summary of one import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub run_id: Uuid,
    pub kind: ImportKind,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub assets_stored: usize,
    pub assets_failed: usize,
    /// Image sources already stored for the owner by an earlier run.
    pub assets_reused: usize,
    pub relations_linked: usize,
    pub elapsed_ms: u64,
    pub failures: Vec<ImportFailure>,
}

impl ImportOutcome {
    pub fn new(kind: ImportKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            imported: 0,
            skipped: 0,
            failed: 0,
            assets_stored: 0,
            assets_failed: 0,
            assets_reused: 0,
            relations_linked: 0,
            elapsed_ms: 0,
            failures: Vec::new(),
        }
    }

    /// Logs the failure and bumps the counter that matches its variant.
    pub fn record(&mut self, failure: ImportFailure) {
        match &failure {
            ImportFailure::RowSkipped { .. } => self.skipped += 1,
            ImportFailure::ValidationFailed { .. } | ImportFailure::PersistFailed { .. } => {
                self.failed += 1
            }
            ImportFailure::AssetFetchFailed { .. } => self.assets_failed += 1,
            ImportFailure::RelationResolutionFailed { .. } => {}
        }
        warn!(target = "import", run_id = %self.run_id, kind = %self.kind, "{failure}");
        self.failures.push(failure);
    }

    pub fn log_summary(&self) {
        info!(
            target = "import",
            run_id = %self.run_id,
            kind = %self.kind,
            imported = self.imported,
            skipped = self.skipped,
            failed = self.failed,
            assets_stored = self.assets_stored,
            assets_failed = self.assets_failed,
            assets_reused = self.assets_reused,
            relations_linked = self.relations_linked,
            elapsed_ms = self.elapsed_ms,
            "import finished"
        );
    }

    /// Console rendering used by the CLI.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("run {} ({})", self.run_id, self.kind),
            format!(
                "imported: {}  skipped: {}  failed: {}",
                self.imported, self.skipped, self.failed
            ),
            format!(
                "images stored: {}  images failed: {}  images reused: {}  amenity links: {}",
                self.assets_stored, self.assets_failed, self.assets_reused, self.relations_linked
            ),
        ];
        lines.extend(self.failures.iter().map(|f| format!("  - {f}")));
        lines
    }
}
