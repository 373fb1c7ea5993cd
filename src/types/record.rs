//! Raw upload rows and the intermediate record they are reshaped into

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One cell of an uploaded file, as decoded by the frontend.
///
/// Untagged: serializes as a bare string, number or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Null,
}

impl CellValue {
    /// Trimmed string content. Empty string is treated as null.
    pub fn as_trimmed_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            }
            _ => None,
        }
    }

    /// Owned trimmed string, numbers formatted as text. Empty ≡ null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Text(_) => self.as_trimmed_str().map(|s| s.to_string()),
            CellValue::Number(n) if n.is_finite() => Some(format_number(*n)),
            _ => None,
        }
    }

    /// Numeric content; text cells are parsed. Non-finite values are
    /// rejected so NaN never leaks into a record.
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Null => None,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn to_i32(&self) -> Option<i32> {
        self.to_f64().map(|v| v.round() as i32)
    }
}

/// Format a numeric cell the way the upload showed it: integral values
/// without a trailing `.0`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One row of the uploaded file, keyed by source column name.
///
/// Ephemeral: lives only for the duration of one import session. Column
/// order is carried by the accompanying header list, not by the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    /// 1-based position in the uploaded file, used as the key of last
    /// resort for customers without any identifying code.
    pub row_number: usize,
    pub cells: HashMap<String, CellValue>,
}

impl RawRow {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            cells: HashMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

/// One raw row reshaped through the confirmed column mapping.
///
/// Invariants: `lat`/`lng` are finite or `None` (never NaN); string
/// fields are trimmed; empty string ≡ `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateRecord {
    pub row_number: usize,
    pub branch_code: Option<String>,
    pub branch_name: Option<String>,
    pub region: Option<String>,
    pub route_name: Option<String>,
    pub rep_code: Option<String>,
    pub client_code: Option<String>,
    pub reach_customer_code: Option<String>,
    pub customer_name_en: Option<String>,
    pub customer_name_ar: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub classification: Option<String>,
    pub week_number: Option<i32>,
    pub day_name: Option<String>,
    pub visit_order: Option<i32>,
    pub vat: Option<String>,
    pub district: Option<String>,
    pub buyer_id: Option<String>,
    pub store_type: Option<String>,
}
