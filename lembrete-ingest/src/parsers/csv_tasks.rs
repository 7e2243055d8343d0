//! Task CSV parser.
//!
//! Expected header (column order free, extra columns ignored):
//!   description,due,leads,priority,category,notes
//!
//! `leads` is a loose list: "5m;1h", "10 min, 1 d" and "30m 1h" all work.
//! Blank priority/category fall back to the defaults.

use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use regex::Regex;

use lembrete_core::time::parse_due;
use lembrete_core::{Category, LeadTime, Priority, TaskDraft};

use crate::types::ImportBatch;

struct Columns {
    description: usize,
    due: usize,
    leads: Option<usize>,
    priority: Option<usize>,
    category: Option<usize>,
    notes: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };

        let Some(description) = find("description") else {
            bail!("missing 'description' column");
        };
        let Some(due) = find("due") else {
            bail!("missing 'due' column");
        };

        Ok(Self {
            description,
            due,
            leads: find("leads"),
            priority: find("priority"),
            category: find("category"),
            notes: find("notes"),
        })
    }
}

fn field(record: &csv::StringRecord, idx: Option<usize>) -> &str {
    idx.and_then(|i| record.get(i)).unwrap_or("").trim()
}

fn parse_or_default<T: FromStr + Default>(raw: &str) -> std::result::Result<T, T::Err> {
    if raw.is_empty() {
        Ok(T::default())
    } else {
        raw.parse()
    }
}

/// Tokenize a free-form lead list into catalog entries.
fn parse_lead_list(token_re: &Regex, raw: &str) -> Result<BTreeSet<LeadTime>> {
    let mut leads = BTreeSet::new();
    for caps in token_re.captures_iter(raw) {
        let token = format!("{}{}", &caps["amount"], &caps["unit"]);
        leads.insert(token.parse::<LeadTime>()?);
    }

    let leftover = token_re.replace_all(raw, "");
    if leftover.chars().any(|c| c.is_alphanumeric()) {
        bail!("unrecognized lead list '{raw}'");
    }
    Ok(leads)
}

fn draft_from_record(record: &csv::StringRecord, cols: &Columns, token_re: &Regex) -> Result<TaskDraft> {
    let due_at = parse_due(field(record, Some(cols.due)))?;
    let leads = parse_lead_list(token_re, field(record, cols.leads))?;
    let priority: Priority = parse_or_default(field(record, cols.priority))?;
    let category: Category = parse_or_default(field(record, cols.category))?;

    let draft = TaskDraft::new(field(record, Some(cols.description)), due_at)
        .with_leads(leads)
        .with_priority(priority)
        .with_category(category)
        .with_notes(field(record, cols.notes));
    draft.validate()?;
    Ok(draft)
}

pub fn parse_task_csv(text: &str) -> Result<ImportBatch> {
    let token_re = Regex::new(r"(?i)(?P<amount>\d+)\s*(?P<unit>[a-z]+)")?;

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = rdr.headers().context("reading CSV header")?.clone();
    let cols = Columns::from_headers(&headers)?;

    let mut batch = ImportBatch::default();

    for result in rdr.records() {
        let record = result.context("reading CSV record")?;
        let row = record.position().map(|p| p.line()).unwrap_or(0);

        let description = field(&record, Some(cols.description));
        if description.is_empty() && record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        match draft_from_record(&record, &cols, &token_re) {
            Ok(d) => batch.drafts.push(d),
            Err(e) => batch.skip(row, format!("{e:#}")),
        }
    }

    Ok(batch)
}
