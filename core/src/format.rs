//! Rendering of [`CommandResult`]s as table, JSON, CSV or MySQL-style
//! vertical output.

use std::fmt;
use std::str::FromStr;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use remsh_protocol::CommandResult;

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Command completed successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
    Vertical,
}

#[derive(Debug, Error)]
#[error("unknown output format: '{0}' (expected table, json, csv or vertical)")]
pub struct UnknownFormat(String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "vertical" => Ok(OutputFormat::Vertical),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Vertical => "vertical",
        };
        f.write_str(name)
    }
}

/// Stateless result renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, result: &CommandResult, format: OutputFormat) -> String {
        if !result.success {
            let error = result.error.as_deref().unwrap_or("unknown error");
            return format!("Error: {error}\n");
        }

        let Some(data) = &result.data else {
            let message = result
                .message
                .as_deref()
                .unwrap_or(DEFAULT_SUCCESS_MESSAGE);
            return format!("{message}\n");
        };

        match format {
            OutputFormat::Table => format_table(data),
            OutputFormat::Json => format_json(data),
            OutputFormat::Csv => format_csv(data),
            OutputFormat::Vertical => format_vertical(data, result),
        }
    }
}

/// Scalar stringification shared by all formats: null is empty, booleans are
/// `true`/`false`, strings are verbatim, containers are compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Rows as `(columns, cells)`; `None` when the data has no tabular shape.
fn tabular(data: &Value) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    match data {
        Value::Array(items) => {
            let first = items.first()?;
            match first {
                Value::Object(first_row) => {
                    let columns: Vec<String> = first_row.keys().cloned().collect();
                    let rows = items
                        .iter()
                        .map(|item| {
                            let empty = Map::new();
                            let object = item.as_object().unwrap_or(&empty);
                            columns
                                .iter()
                                .map(|column| {
                                    object.get(column).map(value_text).unwrap_or_default()
                                })
                                .collect()
                        })
                        .collect();
                    Some((columns, rows))
                }
                _ => {
                    let rows = items.iter().map(|item| vec![value_text(item)]).collect();
                    Some((vec!["value".to_string()], rows))
                }
            }
        }
        Value::Object(object) => {
            let rows = object
                .iter()
                .map(|(key, value)| vec![key.clone(), value_text(value)])
                .collect();
            Some((vec!["Key".to_string(), "Value".to_string()], rows))
        }
        _ => None,
    }
}

fn format_table(data: &Value) -> String {
    if matches!(data, Value::Array(items) if items.is_empty()) {
        return "Empty set\n".to_string();
    }
    let Some((columns, rows)) = tabular(data) else {
        return format!("{}\n", value_text(data));
    };

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            rows.iter()
                .map(|row| row.get(i).map_or(0, String::len))
                .max()
                .unwrap_or(0)
                .max(column.len())
        })
        .collect();

    let separator = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };
    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for (i, &width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            line.push_str(&format!(" {cell:<width$} "));
            line.push('|');
        }
        line
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    out.push_str(&render_row(&columns));
    out.push('\n');
    out.push_str(&separator);
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str(&separator);
    out.push('\n');
    out
}

fn format_json(data: &Value) -> String {
    match serde_json::to_string_pretty(data) {
        Ok(text) => format!("{text}\n"),
        Err(_) => format!("{data}\n"),
    }
}

fn csv_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn format_csv(data: &Value) -> String {
    let Some((columns, rows)) = tabular(data) else {
        return format!("{}\n", csv_cell(&value_text(data)));
    };
    let mut out = String::new();
    let render = |cells: &[String]| {
        cells
            .iter()
            .map(|cell| csv_cell(cell))
            .collect::<Vec<_>>()
            .join(",")
    };
    out.push_str(&render(&columns));
    out.push('\n');
    for row in &rows {
        out.push_str(&render(row));
        out.push('\n');
    }
    out
}

const VERTICAL_STARS: &str = "***************************";

fn format_vertical(data: &Value, result: &CommandResult) -> String {
    let rows: Vec<&Map<String, Value>> = match data {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(object) => vec![object],
        other => return format!("{}\n", value_text(other)),
    };

    let mut out = String::new();
    for (index, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "{VERTICAL_STARS} {}. row {VERTICAL_STARS}\n",
            index + 1
        ));
        let width = row.keys().map(String::len).max().unwrap_or(0);
        for (key, value) in row.iter() {
            out.push_str(&format!("{key:>width$}: {}\n", value_text(value)));
        }
    }

    if let Some(duration) = result.metadata.get("duration_ms").and_then(Value::as_f64) {
        let noun = if rows.len() == 1 { "row" } else { "rows" };
        out.push_str(&format!(
            "{} {noun} in set ({:.2} sec)\n",
            rows.len(),
            duration / 1000.0
        ));
    }
    out
}
