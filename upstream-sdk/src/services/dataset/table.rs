//! Cached dataset records and their tabular view

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Which tier last supplied the cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Remote,
    Local,
    None,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Remote => write!(f, "remote"),
            Provenance::Local => write!(f, "local"),
            Provenance::None => write!(f, "none"),
        }
    }
}

/// An immutable snapshot of the dataset
///
/// The cache never mutates a snapshot; a refresh builds a new one and swaps
/// the shared reference, so payload, provenance and timestamp always agree.
#[derive(Debug)]
pub struct CachedDataset {
    payload: String,
    provenance: Provenance,
    refreshed_at: DateTime<Utc>,
    table: OnceCell<Table>,
}

impl CachedDataset {
    pub fn new(payload: String, provenance: Provenance, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            provenance,
            refreshed_at,
            table: OnceCell::new(),
        }
    }

    /// The dataset text exactly as the source returned it
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Parsed view of the payload, built on first use
    pub fn table(&self) -> &Table {
        self.table.get_or_init(|| Table::parse(&self.payload))
    }
}

/// Comma-separated text with a header row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Parse comma-separated text
    ///
    /// Double-quoted fields may contain commas, line breaks and `""`
    /// escapes. Blank lines are skipped and a leading byte-order mark is
    /// dropped. Never fails: text without a header yields an empty table.
    pub fn parse(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = parse_records(text).into_iter();

        let columns = records.next().unwrap_or_default();
        let rows = records.collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows, header excluded
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ordered values of one column; short rows contribute empty strings
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }
}

fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => finish_record(&mut records, &mut record, &mut field),
            _ => field.push(c),
        }
    }
    finish_record(&mut records, &mut record, &mut field);

    records
}

fn finish_record(records: &mut Vec<Vec<String>>, record: &mut Vec<String>, field: &mut String) {
    record.push(std::mem::take(field));
    let record = std::mem::take(record);
    let blank = record.len() == 1 && record[0].trim().is_empty();
    if !blank {
        records.push(record);
    }
}
