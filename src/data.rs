//! Transaction tables and CSV loading using Polars

use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use chrono::{Datelike, NaiveDateTime};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};

/// Columns every input file must carry, in the order they are written back out
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "InvoiceNo",
    "StockCode",
    "Description",
    "Quantity",
    "InvoiceDate",
    "UnitPrice",
    "CustomerID",
    "Country",
];

/// Format used whenever a parsed invoice timestamp is turned back into text
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line item exactly as loaded, before any cleaning
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub invoice_no: String,
    pub stock_code: String,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
    /// Unparsed timestamp text; the cleaner owns date parsing
    pub invoice_date: Option<String>,
    pub customer_id: Option<String>,
    pub country: String,
}

/// Raw transaction rows in load order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    pub rows: Vec<RawRecord>,
}

impl RecordTable {
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build a table from a frame whose columns are all text
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let names = df.get_column_names();
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|&&c| !names.contains(&c)) {
            return Err(AnalysisError::MissingColumn(missing.to_string()));
        }

        let mut invoice_no = text_column(df, "InvoiceNo")?.into_iter();
        let mut stock_code = text_column(df, "StockCode")?.into_iter();
        let mut description = text_column(df, "Description")?.into_iter();
        let mut quantity = text_column(df, "Quantity")?.into_iter();
        let mut invoice_date = text_column(df, "InvoiceDate")?.into_iter();
        let mut unit_price = text_column(df, "UnitPrice")?.into_iter();
        let mut customer_id = text_column(df, "CustomerID")?.into_iter();
        let mut country = text_column(df, "Country")?.into_iter();

        let mut coercion_failures = 0usize;
        let mut rows = Vec::with_capacity(df.height());
        for _ in 0..df.height() {
            let quantity_text = trimmed(quantity.next().flatten());
            let price_text = trimmed(unit_price.next().flatten());

            let parsed_quantity = quantity_text.as_deref().and_then(parse_quantity);
            let parsed_price = price_text.as_deref().and_then(parse_price);
            if quantity_text.is_some() && parsed_quantity.is_none() {
                coercion_failures += 1;
            }
            if price_text.is_some() && parsed_price.is_none() {
                coercion_failures += 1;
            }

            rows.push(RawRecord {
                invoice_no: invoice_no.next().flatten().unwrap_or_default(),
                stock_code: stock_code.next().flatten().unwrap_or_default(),
                description: description.next().flatten(),
                quantity: parsed_quantity,
                unit_price: parsed_price,
                invoice_date: trimmed(invoice_date.next().flatten()),
                customer_id: trimmed(customer_id.next().flatten())
                    .map(|id| normalize_customer_id(&id)),
                country: country.next().flatten().unwrap_or_default(),
            });
        }

        if coercion_failures > 0 {
            warn!(
                coercion_failures,
                "numeric fields could not be coerced and were treated as missing"
            );
        }

        Ok(Self { rows })
    }
}

/// Calendar month of an invoice, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn of(timestamp: &NaiveDateTime) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// Sortable integer form, `year * 100 + month`
    pub fn key(&self) -> i32 {
        self.year * 100 + self.month as i32
    }

    pub fn from_key(key: i32) -> Self {
        Self {
            year: key.div_euclid(100),
            month: key.rem_euclid(100) as u32,
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A line item that passed every cleaning step
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub invoice_no: String,
    pub stock_code: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub invoice_date: NaiveDateTime,
    pub customer_id: String,
    pub country: String,
    /// quantity × unit price, fixed at cleaning time
    pub revenue: f64,
}

impl Transaction {
    pub fn month(&self) -> Month {
        Month::of(&self.invoice_date)
    }
}

/// Analysis-ready transactions. Only the cleaner constructs one, so every row
/// carries a positive quantity and price, a customer, and a parsed timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanTable {
    rows: Vec<Transaction>,
}

impl CleanTable {
    pub(crate) fn from_rows(rows: Vec<Transaction>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Transaction] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest invoice timestamp, `None` for an empty table
    pub fn max_invoice_date(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|tx| tx.invoice_date).max()
    }

    /// Null count per column; after cleaning only descriptions may be missing
    pub fn null_summary(&self) -> Vec<(&'static str, usize)> {
        let missing_descriptions = self
            .rows
            .iter()
            .filter(|tx| tx.description.is_none())
            .count();

        REQUIRED_COLUMNS
            .iter()
            .chain(std::iter::once(&"Revenue"))
            .map(|&column| {
                let nulls = if column == "Description" {
                    missing_descriptions
                } else {
                    0
                };
                (column, nulls)
            })
            .collect()
    }

    /// Columns the aggregations group over, one row per transaction
    ///
    /// `InvoiceMicros` is the invoice timestamp in microseconds and
    /// `MonthKey` is `year * 100 + month`, so both sort chronologically.
    pub fn analysis_frame(&self) -> Result<DataFrame> {
        let rows = &self.rows;
        let frame = DataFrame::new(vec![
            Series::new(
                "InvoiceNo",
                rows.iter().map(|tx| tx.invoice_no.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "Description",
                rows.iter()
                    .map(|tx| tx.description.as_deref())
                    .collect::<Vec<Option<&str>>>(),
            ),
            Series::new(
                "CustomerID",
                rows.iter().map(|tx| tx.customer_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "InvoiceMicros",
                rows.iter()
                    .map(|tx| tx.invoice_date.and_utc().timestamp_micros())
                    .collect::<Vec<i64>>(),
            ),
            Series::new(
                "MonthKey",
                rows.iter()
                    .map(|tx| tx.month().key())
                    .collect::<Vec<i32>>(),
            ),
            Series::new(
                "Revenue",
                rows.iter().map(|tx| tx.revenue).collect::<Vec<f64>>(),
            ),
        ])?;
        Ok(frame)
    }

    /// Convert back into raw form, e.g. to feed the cleaner a second time
    pub fn to_raw(&self) -> RecordTable {
        let rows = self
            .rows
            .iter()
            .map(|tx| RawRecord {
                invoice_no: tx.invoice_no.clone(),
                stock_code: tx.stock_code.clone(),
                description: tx.description.clone(),
                quantity: Some(tx.quantity),
                unit_price: Some(tx.unit_price),
                invoice_date: Some(tx.invoice_date.format(TIMESTAMP_FORMAT).to_string()),
                customer_id: Some(tx.customer_id.clone()),
                country: tx.country.clone(),
            })
            .collect();
        RecordTable { rows }
    }
}

impl<'a> IntoIterator for &'a CleanTable {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Load the transaction CSV at `file_path`
///
/// The file is read as UTF-8 when possible and as Latin-1 otherwise, so
/// extended characters in product descriptions never abort the load.
///
/// # Errors
/// * `AnalysisError::Load` when the file is missing or not a readable table
/// * `AnalysisError::MissingColumn` when the column layout is wrong
pub fn load_transactions(file_path: impl AsRef<Path>) -> Result<RecordTable> {
    let path = file_path.as_ref();
    let load_error = |reason: String| AnalysisError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| load_error(e.to_string()))?;
    debug!(bytes = bytes.len(), path = %path.display(), "read input file");

    let df = read_text_frame(decode_text(bytes)).map_err(|e| load_error(e.to_string()))?;
    let table = RecordTable::from_frame(&df)?;

    info!(rows = table.len(), path = %path.display(), "loaded transactions");
    Ok(table)
}

/// Parse CSV text into a frame without schema inference: every column is text
fn read_text_frame(text: String) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
        .finish()
}

/// Decode file bytes as UTF-8, falling back to Latin-1
fn decode_text(bytes: Vec<u8>) -> String {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Text values of a column exactly as written, with empty strings as nulls
fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| value.filter(|text| !text.is_empty()).map(str::to_owned))
        .collect();
    Ok(values)
}

/// Surrounding whitespace is noise in numeric, id and timestamp fields
fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn parse_quantity(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && value.fract() == 0.0)
            .map(|value| value as i64)
    })
}

fn parse_price(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Customer ids exported through a float column come back as `17850.0`
fn normalize_customer_id(id: &str) -> String {
    match id.strip_suffix(".0") {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.to_string()
        }
        _ => id.to_string(),
    }
}
