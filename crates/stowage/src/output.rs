//! Output formatting: table, JSON, YAML, plain.
//!
//! Records have no fixed schema, so tables are built column-by-column from
//! the union of field names in first-seen order.

use std::io::{self, Write};
use std::sync::Arc;

use serde_json::{Map, Value};
use tabled::{builder::Builder, settings::Style};

use stowage_core::{Field, Record};

use crate::cli::OutputFormat;

/// Longest cell printed in table mode before truncation.
const MAX_CELL: usize = 48;

// ── Render dispatchers ───────────────────────────────────────────────

/// Render store records. Plain mode prints one key per line.
pub fn render_records(format: &OutputFormat, records: &[Arc<Record>]) -> String {
    match format {
        OutputFormat::Table => {
            let columns = union_columns(records.iter().map(|r| r.data.keys()));
            let mut builder = Builder::default();
            let mut header = vec!["#".to_owned(), "key".to_owned()];
            header.extend(columns.iter().cloned());
            builder.push_record(header);
            for record in records {
                let mut row = vec![record.index.to_string(), record.key.clone()];
                row.extend(
                    columns
                        .iter()
                        .map(|c| record.data.get(c).map(field_cell).unwrap_or_default()),
                );
                builder.push_record(row);
            }
            render_table(builder)
        }
        OutputFormat::Json => render_json(records, false),
        OutputFormat::JsonCompact => render_json(records, true),
        OutputFormat::Yaml => render_yaml(records),
        OutputFormat::Plain => records
            .iter()
            .map(|r| r.key.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render joined rows. Plain mode prints the join field per line.
pub fn render_rows(format: &OutputFormat, rows: &[Map<String, Value>], id_field: &str) -> String {
    match format {
        OutputFormat::Table => {
            let columns = union_columns(rows.iter().map(Map::keys));
            let mut builder = Builder::default();
            builder.push_record(columns.clone());
            for row in rows {
                builder.push_record(
                    columns
                        .iter()
                        .map(|c| row.get(c).map(value_cell).unwrap_or_default()),
                );
            }
            render_table(builder)
        }
        OutputFormat::Json => render_json(rows, false),
        OutputFormat::JsonCompact => render_json(rows, true),
        OutputFormat::Yaml => render_yaml(rows),
        OutputFormat::Plain => rows
            .iter()
            .map(|r| r.get(id_field).map(value_cell).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Cells ────────────────────────────────────────────────────────────

fn union_columns<'a, I, K>(rows: I) -> Vec<String>
where
    I: Iterator<Item = K>,
    K: Iterator<Item = &'a String>,
{
    let mut seen: Vec<String> = Vec::new();
    for keys in rows {
        for key in keys {
            if !seen.contains(key) {
                seen.push(key.clone());
            }
        }
    }
    seen
}

fn field_cell(field: &Field) -> String {
    match field {
        Field::Value(v) => value_cell(v),
        Field::Store(store) => format!("[{} records]", store.total()),
    }
}

fn value_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(text)
}

fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_CELL {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_CELL - 1).collect();
    cut.push('…');
    cut
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table(builder: Builder) -> String {
    builder.build().with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.expect("serialization should not fail")
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).expect("serialization should not fail")
}
