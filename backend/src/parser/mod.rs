//! Dataset loading with encoding and delimiter auto-detection.
//!
//! Two input shapes are accepted:
//! - CSV: encoding sniffed with `chardet`, delimiter picked from the header
//!   line, cells typed by [`infer_scalar`].
//! - JSON: an array of flat objects, kept as-is (field order included).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::path::Path;

use crate::error::{DatasetError, DatasetResult};
use crate::models::{is_scalar, Dataset, Row};

/// Input format of a dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl DataFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" | "tsv" | "txt" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            other => Err(DatasetError::UnsupportedFormat(if other.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", other)
            })),
        }
    }
}

/// Rows plus what was detected while reading them.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub rows: Dataset,
    pub format: DataFormat,
    /// Detected encoding (CSV only)
    pub encoding: Option<String>,
    /// Detected delimiter (CSV only)
    pub delimiter: Option<char>,
    /// Header line in file order (CSV only)
    pub headers: Vec<String>,
}

// =============================================================================
// Detection
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes with the given encoding, lossy for anything unrecognized.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Pick the separator occurring most often in the header line.
///
/// Ties go to the earlier candidate; a header with none of them is read as
/// comma-separated.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best = (',', 0);
    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best.1 {
            best = (sep, count);
        }
    }
    best.0
}

/// Plain decimal numbers: optional minus, no leading zeros, optional
/// fraction and exponent. Rejects `inf`, `NaN`, `+5` and `1_000`.
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").expect("Invalid NUMBER pattern")
});

/// Type one CSV cell.
///
/// Empty → null, `true`/`false` → boolean, plain decimal numbers → number.
/// Anything else, including zero-padded codes such as `"007"`, stays a
/// string.
pub fn infer_scalar(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if !NUMBER.is_match(text) {
        return Value::String(text.to_string());
    }

    if let Ok(int) = text.parse::<i64>() {
        return Value::Number(int.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

// =============================================================================
// CSV
// =============================================================================

/// Parse CSV text with an explicit delimiter.
///
/// Short rows are padded with nulls, extra cells are ignored and blank lines
/// skipped.
pub fn parse_csv_str(content: &str, delimiter: char) -> DatasetResult<(Vec<String>, Dataset)> {
    if content.trim().is_empty() {
        return Err(DatasetError::Empty);
    }
    let delimiter = u8::try_from(delimiter).map_err(|_| DatasetError::Parse {
        line: 1,
        message: format!("delimiter '{}' is not a single byte", delimiter),
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(DatasetError::NoHeaders);
    }
    if let Some(blank) = headers.iter().position(|h| h.is_empty()) {
        return Err(DatasetError::Parse {
            line: 1,
            message: format!("column {} has an empty header", blank + 1),
        });
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let mut row = Row::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            row.insert(header.clone(), record.get(i).map_or(Value::Null, infer_scalar));
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok((headers, rows))
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_csv_bytes(bytes: &[u8]) -> DatasetResult<LoadedDataset> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    let (headers, rows) = parse_csv_str(&content, delimiter)?;

    Ok(LoadedDataset {
        rows,
        format: DataFormat::Csv,
        encoding: Some(encoding),
        delimiter: Some(delimiter),
        headers,
    })
}

// =============================================================================
// JSON
// =============================================================================

/// Parse a JSON array of flat objects.
pub fn parse_json_rows(content: &str) -> DatasetResult<Dataset> {
    let value: Value = serde_json::from_str(content)?;
    let Value::Array(items) = value else {
        return Err(DatasetError::NotRows("top-level value is not an array".into()));
    };
    if items.is_empty() {
        return Err(DatasetError::Empty);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => check_flat(index, row),
            other => Err(DatasetError::NotRows(format!(
                "item {} is {}, expected an object",
                index,
                kind_name(&other)
            ))),
        })
        .collect()
}

fn check_flat(index: usize, row: Map<String, Value>) -> DatasetResult<Row> {
    if let Some((name, _)) = row.iter().find(|(_, v)| !is_scalar(v)) {
        return Err(DatasetError::NotRows(format!(
            "item {} field '{}' is nested; rows hold scalar values only",
            index, name
        )));
    }
    Ok(row)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Files
// =============================================================================

/// Load a dataset file, choosing the parser from its extension.
pub fn load_file(path: impl AsRef<Path>) -> DatasetResult<LoadedDataset> {
    let path = path.as_ref();
    let format = DataFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Err(DatasetError::Empty);
    }

    match format {
        DataFormat::Csv => parse_csv_bytes(&bytes),
        DataFormat::Json => {
            let content = decode_content(&bytes, "utf-8");
            Ok(LoadedDataset {
                rows: parse_json_rows(&content)?,
                format,
                encoding: None,
                delimiter: None,
                headers: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_simple_csv() {
        let (headers, rows) = parse_csv_str("name;age\nAlice;30\nBob;25", ';').unwrap();

        assert_eq!(headers, vec!["name", "age"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Alice");
        assert_eq!(rows[0]["age"], 30);
        assert_eq!(rows[1]["age"], 25);
    }

    #[test]
    fn test_quoted_values() {
        let (_, rows) = parse_csv_str("name,value\n\"Smith, J\",\"Hello World\"", ',').unwrap();
        assert_eq!(rows[0]["name"], "Smith, J");
        assert_eq!(rows[0]["value"], "Hello World");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let (_, rows) = parse_csv_str("a;b\n1;2\n\n3;4\n", ';').unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_missing_and_extra_cells() {
        let (_, rows) = parse_csv_str("a;b;c\n1;;3\n4\n5;6;7;8", ';').unwrap();

        assert_eq!(rows[0]["b"], Value::Null);
        assert_eq!(rows[1]["c"], Value::Null);
        assert_eq!(rows[2].len(), 3);
    }

    #[test]
    fn test_infer_scalar() {
        assert_eq!(infer_scalar(""), Value::Null);
        assert_eq!(infer_scalar(" 42 "), json!(42));
        assert_eq!(infer_scalar("-3"), json!(-3));
        assert_eq!(infer_scalar("70.5"), json!(70.5));
        assert_eq!(infer_scalar("0.25"), json!(0.25));
        assert_eq!(infer_scalar("TRUE"), json!(true));
        assert_eq!(infer_scalar("007"), json!("007"));
        assert_eq!(infer_scalar("NaN"), json!("NaN"));
        assert_eq!(infer_scalar("+5"), json!("+5"));
        assert_eq!(infer_scalar("1e3"), json!(1000.0));
        assert_eq!(infer_scalar("1990-04-02"), json!("1990-04-02"));
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_csv_str("", ';'), Err(DatasetError::Empty)));
        assert!(matches!(parse_csv_str("a;b\n", ';'), Err(DatasetError::Empty)));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_auto_parse() {
        let result = parse_csv_bytes("name;age\nAlice;30\nBob;25".as_bytes()).unwrap();

        assert_eq!(result.delimiter, Some(';'));
        assert_eq!(result.encoding.as_deref(), Some("utf-8"));
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        assert_eq!(decode_content(bytes, "iso-8859-1"), "Société");
    }

    #[test]
    fn test_bom_is_stripped() {
        assert_eq!(decode_content(b"\xEF\xBB\xBFa,b", "utf-8"), "a,b");
    }

    #[test]
    fn test_json_rows_keep_field_order() {
        let rows = parse_json_rows(r#"[{"z": 1, "a": null, "m": "x"}]"#).unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_json_rejects_non_rows() {
        assert!(matches!(parse_json_rows("{}"), Err(DatasetError::NotRows(_))));
        assert!(matches!(parse_json_rows("[1]"), Err(DatasetError::NotRows(_))));
        assert!(matches!(
            parse_json_rows(r#"[{"a": [1]}]"#),
            Err(DatasetError::NotRows(_))
        ));
        assert!(matches!(parse_json_rows("[]"), Err(DatasetError::Empty)));
    }

    #[test]
    fn test_load_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("people.csv");
        std::fs::File::create(&csv_path)
            .unwrap()
            .write_all(b"id,height_in\n1,70\n")
            .unwrap();
        let loaded = load_file(&csv_path).unwrap();
        assert_eq!(loaded.format, DataFormat::Csv);
        assert_eq!(loaded.rows[0]["height_in"], 70);

        let json_path = dir.path().join("people.json");
        std::fs::write(&json_path, r#"[{"id": 1}]"#).unwrap();
        assert_eq!(load_file(&json_path).unwrap().format, DataFormat::Json);

        let other = dir.path().join("people.xlsx");
        std::fs::write(&other, "x").unwrap();
        assert!(matches!(
            load_file(&other),
            Err(DatasetError::UnsupportedFormat(_))
        ));
    }
}
