use crate::error::IngestError;
use crate::types::AgendaRow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_DATE_COLUMN: &str = "MEETING DATE";
pub const DEFAULT_SECTION_COLUMN: &str = "AGENDA SECTION";
pub const DEFAULT_ITEM_COLUMN: &str = "AGENDA ITEM";
pub const DEFAULT_NOTES_COLUMN: &str = "NOTES";
pub const DEFAULT_INCLUDE_COLUMN: &str = "Include in Summary for Mayor";

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Header names of the columns the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: String,
    pub section: String,
    pub item: String,
    pub notes: String,
    pub include: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            date: DEFAULT_DATE_COLUMN.to_string(),
            section: DEFAULT_SECTION_COLUMN.to_string(),
            item: DEFAULT_ITEM_COLUMN.to_string(),
            notes: DEFAULT_NOTES_COLUMN.to_string(),
            include: DEFAULT_INCLUDE_COLUMN.to_string(),
        }
    }
}

impl ColumnMap {
    fn required(&self) -> [&str; 5] {
        [
            self.date.as_str(),
            self.section.as_str(),
            self.item.as_str(),
            self.notes.as_str(),
            self.include.as_str(),
        ]
    }
}

pub fn read_agenda_file(path: &Path, columns: &ColumnMap) -> Result<Vec<AgendaRow>, IngestError> {
    let file = File::open(path)?;
    read_agenda(file, columns)
}

/// Read agenda rows from CSV.
///
/// Only rows whose meeting date starts with a digit are agenda items; spreadsheet
/// exports carry banner and spacer rows that are skipped here.
pub fn read_agenda<R: Read>(reader: R, columns: &ColumnMap) -> Result<Vec<AgendaRow>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches(BYTE_ORDER_MARK).to_string())
        .collect();

    let missing: Vec<String> = columns
        .required()
        .iter()
        .filter(|name| !headers.iter().any(|header| header == *name))
        .map(|name| format!("'{name}'"))
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let position = |name: &str| headers.iter().position(|header| header == name);
    let date_idx = position(&columns.date);
    let section_idx = position(&columns.section);
    let item_idx = position(&columns.item);
    let notes_idx = position(&columns.notes);
    let include_idx = position(&columns.include);
    let mapped = [date_idx, section_idx, item_idx, notes_idx, include_idx];

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in csv_reader.records() {
        let record = record?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).and_then(normalize_cell);

        let Some(date) = cell(date_idx) else {
            skipped += 1;
            continue;
        };
        if !date.starts_with(|ch: char| ch.is_ascii_digit()) {
            skipped += 1;
            continue;
        }

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !mapped.contains(&Some(*idx)))
            .filter_map(|(idx, header)| {
                record
                    .get(idx)
                    .and_then(normalize_cell)
                    .map(|value| (header.clone(), value))
            })
            .collect::<BTreeMap<_, _>>();

        rows.push(AgendaRow {
            date,
            section: cell(section_idx),
            title: cell(item_idx),
            notes: cell(notes_idx),
            include: cell(include_idx).is_some_and(|flag| flag.eq_ignore_ascii_case("y")),
            extra,
        });
    }

    debug!(rows = rows.len(), skipped, "agenda file read");
    if rows.is_empty() {
        return Err(IngestError::NoRows);
    }
    Ok(rows)
}

/// Rows flagged for inclusion in the summary.
pub fn select_included(rows: Vec<AgendaRow>) -> Vec<AgendaRow> {
    rows.into_iter().filter(|row| row.include).collect()
}

/// Rows whose meeting date is one of `dates`. An empty list keeps everything.
pub fn select_dates(rows: Vec<AgendaRow>, dates: &[String]) -> Vec<AgendaRow> {
    if dates.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| dates.iter().any(|date| date.trim() == row.date))
        .collect()
}

fn normalize_cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}
