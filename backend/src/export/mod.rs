//! Serialize the current dataset for download.

use serde_json::Value;
use std::str::FromStr;

use crate::error::{DatasetError, DatasetResult};
use crate::models::{column_names, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(DatasetError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn export(rows: &[Row], format: ExportFormat) -> DatasetResult<String> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Json => to_json_pretty(rows),
    }
}

/// CSV with the sorted union of field names as header. Missing cells and
/// nulls are written empty.
pub fn to_csv(rows: &[Row]) -> DatasetResult<String> {
    let columns = column_names(rows);
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(&columns)?;
    for row in rows {
        writer.write_record(columns.iter().map(|name| cell(row.get(name))))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DatasetError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn to_json_pretty(rows: &[Row]) -> DatasetResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_csv_uses_column_union() {
        let data = rows(json!([
            {"b": 1, "a": "x, y"},
            {"c": true, "a": null}
        ]));
        let csv = to_csv(&data).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "a,b,c");
        assert_eq!(lines[1], "\"x, y\",1,");
        assert_eq!(lines[2], ",,true");
    }

    #[test]
    fn test_json_round_trips_rows() {
        let data = rows(json!([{"h": 177.8}]));
        let text = to_json_pretty(&data).unwrap();
        let back: Vec<Row> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::Json.content_type(), "application/json");
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
