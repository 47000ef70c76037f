use std::{collections::HashSet, io::Write};

use anyhow::Result;
use serde_json::Value;

use crate::cli::commands::output::ExportFormat;

/// Write a set of result items in the requested format.
pub fn write_items<W: Write>(mut writer: W, format: ExportFormat, items: &[Value]) -> Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, items)?;
            writeln!(writer)?;
        }
        ExportFormat::Csv => write_csv(writer, items)?,
    }
    Ok(())
}

/// CSV export: one row per item, one column per flattened field. Nested
/// objects contribute dotted column names (`policy.title`); arrays and any
/// deeper structure serialize as JSON strings so no data is dropped.
fn write_csv<W: Write>(writer: W, items: &[Value]) -> Result<()> {
    let rows: Vec<Vec<(String, String)>> = items.iter().map(flatten_item).collect();

    // Column order: first-seen across all rows, so the leading item's shape
    // dominates and late-appearing optional fields land at the end.
    let mut columns: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for row in &rows {
        for (key, _) in row {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(&columns)?;
    for row in &rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(key, _)| key == col)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn flatten_item(item: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into("", item, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten_into(&key, nested, out);
            }
        }
        Value::Null => out.push((prefix.to_string(), String::new())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
