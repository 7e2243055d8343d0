//! lembrete-ingest: bulk task import from the legacy desktop task file and CSV.

pub mod types;
pub mod parsers;

use std::path::Path;

use anyhow::{bail, Context, Result};

pub use parsers::csv_tasks::parse_task_csv;
pub use parsers::legacy_json::parse_legacy_json;
pub use types::{ImportBatch, ImportFormat, SkippedRow};

/// Read `path` and parse it according to its extension (`.json` or `.csv`).
pub fn parse_import_file(path: impl AsRef<Path>) -> Result<ImportBatch> {
    let path = path.as_ref();
    let format = ImportFormat::from_path(path)
        .with_context(|| format!("cannot tell import format of {}", path.display()))?;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    match format {
        ImportFormat::LegacyJson => parse_legacy_json(&text),
        ImportFormat::Csv => parse_task_csv(&text),
    }
    .with_context(|| format!("parsing {}", path.display()))
}

/// Fail when nothing in the batch was usable.
pub fn require_drafts(batch: &ImportBatch) -> Result<()> {
    if batch.drafts.is_empty() {
        bail!("no importable tasks ({} rows skipped)", batch.skipped.len());
    }
    Ok(())
}
