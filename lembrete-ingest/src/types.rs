use std::path::Path;

use lembrete_core::TaskDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    /// `tasks.json` written by the original desktop app.
    LegacyJson,
    /// `description,due,leads,priority,category,notes`
    Csv,
}

impl ImportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(ImportFormat::LegacyJson),
            "csv" => Some(ImportFormat::Csv),
            _ => None,
        }
    }
}

/// A source row that could not become a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based record number (JSON array index + 1, CSV line).
    pub row: u64,
    pub reason: String,
}

/// Normalized parser output, ready for `ReminderEngine::import_tasks`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportBatch {
    pub drafts: Vec<TaskDraft>,
    pub skipped: Vec<SkippedRow>,
}

impl ImportBatch {
    pub(crate) fn skip(&mut self, row: u64, reason: impl Into<String>) {
        self.skipped.push(SkippedRow {
            row,
            reason: reason.into(),
        });
    }
}
