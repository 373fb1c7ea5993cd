//! CSV upload parsing
//!
//! Frontends usually ship parsed rows, but the job payload (and the
//! `import` CLI subcommand) may carry raw CSV text instead; encoding
//! negotiation happened upstream, this only sees decoded UTF-8.

use crate::types::{CellValue, ImportError, RawRow};

/// Parse CSV text into the header row plus raw rows.
///
/// Numeric-looking cells are kept as numbers so coordinate columns
/// survive without a second parse. A structurally malformed row (wrong
/// field count) fails the whole parse — no partial import is attempted
/// from a file we cannot read completely.
pub fn parse_csv(content: &str) -> Result<(Vec<String>, Vec<RawRow>), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::Parse(format!("unreadable header row: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::Parse("empty header row".into()));
    }

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| ImportError::Parse(format!("row {}: {}", index + 2, e)))?;

        let mut row = RawRow::new(index + 1);
        for (column, value) in headers.iter().zip(record.iter()) {
            row.cells.insert(column.clone(), sniff_cell(value));
        }
        rows.push(row);
    }

    Ok((headers, rows))
}

fn sniff_cell(value: &str) -> CellValue {
    if value.is_empty() {
        return CellValue::Null;
    }
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_csv() {
        let (headers, rows) = parse_csv(
            "Branch,Route,Client Code,Lat\nRiyadh Central,RT-01,C-104,24.713\n",
        )
        .unwrap();
        assert_eq!(headers, vec!["Branch", "Route", "Client Code", "Lat"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_number, 1);
        assert_eq!(rows[0].get("Branch"), Some(&CellValue::Text("Riyadh Central".into())));
        assert_eq!(rows[0].get("Lat"), Some(&CellValue::Number(24.713)));
    }

    #[test]
    fn test_empty_cells_are_null() {
        let (_, rows) = parse_csv("A,B\nx,\n").unwrap();
        assert_eq!(rows[0].get("B"), Some(&CellValue::Null));
    }

    #[test]
    fn test_row_numbers_are_one_based_and_sequential() {
        let (_, rows) = parse_csv("A\nx\ny\nz\n").unwrap();
        let numbers: Vec<usize> = rows.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_field_count_is_parse_error() {
        let result = parse_csv("A,B,C\n1,2\n");
        match result {
            Err(ImportError::Parse(message)) => assert!(message.contains("row 2")),
            other => panic!("expected parse error, got {:?}", other.map(|(h, _)| h)),
        }
    }

    #[test]
    fn test_quoted_cells_with_commas() {
        let (_, rows) = parse_csv("Name,Address\nAl Noor,\"King Fahd Rd, Olaya\"\n").unwrap();
        assert_eq!(
            rows[0].get("Address"),
            Some(&CellValue::Text("King Fahd Rd, Olaya".into()))
        );
    }
}
