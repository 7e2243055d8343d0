//! Legacy desktop `tasks.json` parser.
//!
//! The file is a JSON array of records like:
//!   {"id": 3, "task": "Pagar aluguel", "datetime": "2025-05-01 09:00:00",
//!    "reminder_5min": true, "reminder_10min": false, "status": "Pendente",
//!    "created_at": "2025-04-28 20:11:03"}
//!
//! Older files lack `reminder_30min` / `reminder_1h`; both default to false.
//! Completed records ("Concluída") are history and are not imported.

use anyhow::{Context, Result};
use serde::Deserialize;

use lembrete_core::time::parse_due;
use lembrete_core::{LeadTime, TaskDraft};

use crate::types::ImportBatch;

#[derive(Debug, Deserialize)]
struct LegacyTask {
    #[serde(default)]
    task: String,
    #[serde(default)]
    datetime: String,
    #[serde(default)]
    reminder_5min: bool,
    #[serde(default)]
    reminder_10min: bool,
    #[serde(default)]
    reminder_30min: bool,
    #[serde(default)]
    reminder_1h: bool,
    #[serde(default)]
    status: Option<String>,
    /// Kept when it parses; otherwise the import time stands in.
    #[serde(default)]
    created_at: Option<String>,
}

impl LegacyTask {
    fn leads(&self) -> impl Iterator<Item = LeadTime> {
        [
            (self.reminder_5min, LeadTime::FiveMinutes),
            (self.reminder_10min, LeadTime::TenMinutes),
            (self.reminder_30min, LeadTime::ThirtyMinutes),
            (self.reminder_1h, LeadTime::OneHour),
        ]
        .into_iter()
        .filter_map(|(on, lead)| on.then_some(lead))
    }

    fn is_completed(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::trim),
            Some("Concluída" | "Concluida" | "completed")
        )
    }
}

pub fn parse_legacy_json(text: &str) -> Result<ImportBatch> {
    let records: Vec<LegacyTask> =
        serde_json::from_str(text).context("expected a JSON array of task records")?;

    let mut batch = ImportBatch::default();

    for (idx, rec) in records.into_iter().enumerate() {
        let row = idx as u64 + 1;

        if rec.is_completed() {
            batch.skip(row, "already completed");
            continue;
        }

        let due_at = match parse_due(&rec.datetime) {
            Ok(d) => d,
            Err(e) => {
                batch.skip(row, e.to_string());
                continue;
            }
        };

        let mut draft = TaskDraft::new(rec.task.trim(), due_at).with_leads(rec.leads());
        if let Some(created_at) = rec.created_at.as_deref().and_then(|s| parse_due(s).ok()) {
            draft = draft.with_created_at(created_at);
        }
        if let Err(e) = draft.validate() {
            batch.skip(row, e.to_string());
            continue;
        }
        batch.drafts.push(draft);
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_legacy_records() {
        let text = r#"[
            {"id": 1, "task": "Pagar aluguel", "datetime": "2025-05-01 09:00:00",
             "reminder_5min": true, "reminder_10min": false,
             "status": "Pendente", "created_at": "2025-04-28 20:11:03"},
            {"id": 2, "task": "Dentista", "datetime": "2025-05-02 14:30:00",
             "reminder_5min": false, "reminder_10min": true, "reminder_30min": true,
             "reminder_1h": true, "status": "Atrasada"},
            {"id": 3, "task": "Feito", "datetime": "2025-04-01 08:00:00",
             "status": "Concluída", "completed_at": "2025-04-01 08:00:00"}
        ]"#;

        let batch = parse_legacy_json(text).unwrap();
        assert_eq!(batch.drafts.len(), 2);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].row, 3);

        let rent = &batch.drafts[0];
        assert_eq!(rent.description, "Pagar aluguel");
        assert_eq!(
            rent.due_at,
            NaiveDate::from_ymd_opt(2025, 5, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
        );
        assert_eq!(rent.leads.iter().copied().collect::<Vec<_>>(), vec![LeadTime::FiveMinutes]);
        assert_eq!(
            rent.created_at,
            Some(
                NaiveDate::from_ymd_opt(2025, 4, 28)
                    .unwrap()
                    .and_hms_opt(20, 11, 3)
                    .unwrap()
            )
        );

        assert_eq!(batch.drafts[1].leads.len(), 3);
        assert_eq!(batch.drafts[1].created_at, None);
    }

    #[test]
    fn test_bad_rows_are_skipped_not_fatal() {
        let text = r#"[
            {"task": "", "datetime": "2025-05-01 09:00:00"},
            {"task": "no date", "datetime": "amanhã"},
            {"task": "ok", "datetime": "2025-05-01 09:00:00"}
        ]"#;
        let batch = parse_legacy_json(text).unwrap();
        assert_eq!(batch.drafts.len(), 1);
        let rows: Vec<u64> = batch.skipped.iter().map(|s| s.row).collect();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn test_unreadable_created_at_is_dropped() {
        let text = r#"[
            {"task": "ok", "datetime": "2025-05-01 09:00:00", "created_at": "ontem"}
        ]"#;
        let batch = parse_legacy_json(text).unwrap();
        assert_eq!(batch.drafts.len(), 1);
        assert!(batch.skipped.is_empty());
        assert_eq!(batch.drafts[0].created_at, None);
    }

    #[test]
    fn test_not_an_array_is_an_error() {
        assert!(parse_legacy_json(r#"{"task": "x"}"#).is_err());
    }
}
