//! Cleaning of raw transactions into an analysis-ready table

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::{debug, info};

use crate::data::{CleanTable, RecordTable, Transaction};
use crate::error::{AnalysisError, Result};

/// Invoice prefix that marks a cancelled order in the Online Retail export
pub const DEFAULT_CANCELLATION_MARKER: char = 'C';

/// Timestamp layouts accepted for `InvoiceDate`, tried in order
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Dataset conventions the cleaner depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleaningPolicy {
    pub cancellation_marker: char,
}

impl Default for CleaningPolicy {
    fn default() -> Self {
        Self {
            cancellation_marker: DEFAULT_CANCELLATION_MARKER,
        }
    }
}

/// Rows removed by each cleaning step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanDiagnostics {
    pub input_rows: usize,
    pub cancelled: usize,
    pub missing_customer: usize,
    pub non_positive: usize,
    pub missing_date: usize,
    pub output_rows: usize,
}

impl CleanDiagnostics {
    pub fn removed(&self) -> usize {
        self.input_rows - self.output_rows
    }
}

/// Cleaned table together with what it took to get there
#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub table: CleanTable,
    pub diagnostics: CleanDiagnostics,
}

/// Whether an invoice identifier denotes a cancellation
pub fn is_cancellation(invoice_no: &str, marker: char) -> bool {
    invoice_no.starts_with(marker)
}

/// Parse an invoice timestamp in any of the accepted layouts
///
/// Date-only values are taken to be midnight.
pub fn parse_invoice_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Columns the filter steps inspect; `Row` points back into the raw table
fn screening_frame(raw: &RecordTable) -> Result<DataFrame> {
    let rows = &raw.rows;
    let frame = DataFrame::new(vec![
        Series::new("Row", (0..rows.len() as u64).collect::<Vec<u64>>()),
        Series::new(
            "CustomerID",
            rows.iter()
                .map(|row| row.customer_id.as_deref())
                .collect::<Vec<Option<&str>>>(),
        ),
        Series::new(
            "Quantity",
            rows.iter().map(|row| row.quantity).collect::<Vec<Option<i64>>>(),
        ),
        Series::new(
            "UnitPrice",
            rows.iter().map(|row| row.unit_price).collect::<Vec<Option<f64>>>(),
        ),
    ])?;
    Ok(frame)
}

/// Clean raw transactions
///
/// Steps run in a fixed order, each on the rows the previous one kept:
/// cancellations, missing customers, non-positive quantity or price,
/// timestamp parsing, then revenue. The input table is left untouched.
///
/// # Errors
/// * `AnalysisError::Parse` for a timestamp that matches no accepted layout
pub fn clean(raw: &RecordTable, policy: &CleaningPolicy) -> Result<CleanOutput> {
    let mut diagnostics = CleanDiagnostics {
        input_rows: raw.len(),
        ..CleanDiagnostics::default()
    };

    let not_cancelled: BooleanChunked = raw
        .rows
        .iter()
        .map(|row| !is_cancellation(&row.invoice_no, policy.cancellation_marker))
        .collect();
    let frame = screening_frame(raw)?.filter(&not_cancelled)?;
    diagnostics.cancelled = raw.len() - frame.height();
    debug!(removed = diagnostics.cancelled, "dropped cancelled invoices");

    let remaining = frame.height();
    let frame = frame
        .lazy()
        .filter(col("CustomerID").is_not_null())
        .collect()?;
    diagnostics.missing_customer = remaining - frame.height();
    debug!(
        removed = diagnostics.missing_customer,
        "dropped rows without a customer"
    );

    // Null quantity or price compares as null and is filtered out too
    let remaining = frame.height();
    let frame = frame
        .lazy()
        .filter(
            col("Quantity")
                .gt(lit(0))
                .and(col("UnitPrice").gt(lit(0.0))),
        )
        .collect()?;
    diagnostics.non_positive = remaining - frame.height();
    debug!(
        removed = diagnostics.non_positive,
        "dropped rows with non-positive quantity or price"
    );

    let survivors: Vec<usize> = frame
        .column("Row")?
        .u64()?
        .into_no_null_iter()
        .map(|index| index as usize)
        .collect();

    let mut rows = Vec::with_capacity(survivors.len());
    for index in survivors {
        let row = &raw.rows[index];
        let (Some(customer_id), Some(quantity), Some(unit_price)) =
            (row.customer_id.as_deref(), row.quantity, row.unit_price)
        else {
            continue;
        };
        let Some(text) = row.invoice_date.as_deref() else {
            diagnostics.missing_date += 1;
            continue;
        };
        let invoice_date = parse_invoice_date(text).ok_or_else(|| AnalysisError::Parse {
            row: index + 1,
            value: text.to_string(),
            reason: "unrecognised invoice timestamp".to_string(),
        })?;

        rows.push(Transaction {
            invoice_no: row.invoice_no.clone(),
            stock_code: row.stock_code.clone(),
            description: row.description.clone(),
            quantity,
            unit_price,
            invoice_date,
            customer_id: customer_id.to_string(),
            country: row.country.clone(),
            revenue: quantity as f64 * unit_price,
        });
    }
    if diagnostics.missing_date > 0 {
        debug!(
            removed = diagnostics.missing_date,
            "dropped rows without an invoice timestamp"
        );
    }

    diagnostics.output_rows = rows.len();
    info!(
        input_rows = diagnostics.input_rows,
        output_rows = diagnostics.output_rows,
        "cleaned transactions"
    );

    Ok(CleanOutput {
        table: CleanTable::from_rows(rows),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawRecord;
    use chrono::{Datelike, Timelike};

    fn raw(
        invoice: &str,
        quantity: i64,
        price: f64,
        customer: Option<&str>,
        date: &str,
    ) -> RawRecord {
        RawRecord {
            invoice_no: invoice.to_string(),
            stock_code: "85123A".to_string(),
            description: Some("WHITE HANGING HEART T-LIGHT HOLDER".to_string()),
            quantity: Some(quantity),
            unit_price: Some(price),
            invoice_date: Some(date.to_string()),
            customer_id: customer.map(str::to_string),
            country: "United Kingdom".to_string(),
        }
    }

    fn sample_table() -> RecordTable {
        RecordTable::new(vec![
            raw("536365", 6, 2.55, Some("17850"), "12/1/2010 8:26"),
            raw("C5001", 2, 4.0, Some("17850"), "12/1/2010 9:00"),
            raw("536366", -3, 1.85, Some("17850"), "12/1/2010 8:28"),
            raw("536367", 8, 2.75, None, "12/1/2010 8:34"),
            raw("536368", 4, 0.0, Some("13047"), "12/1/2010 8:34"),
            raw("536369", 3, 1.25, Some("13047"), "2011-01-05 10:15:00"),
        ])
    }

    #[test]
    fn test_is_cancellation() {
        assert!(is_cancellation("C5001", 'C'));
        assert!(!is_cancellation("536365", 'C'));
        assert!(!is_cancellation("", 'C'));
        assert!(is_cancellation("X5001", 'X'));
        assert!(!is_cancellation("c5001", 'C'));
    }

    #[test]
    fn test_clean_filters_in_order() {
        let output = clean(&sample_table(), &CleaningPolicy::default()).unwrap();
        let diagnostics = output.diagnostics;

        assert_eq!(diagnostics.input_rows, 6);
        assert_eq!(diagnostics.cancelled, 1);
        assert_eq!(diagnostics.missing_customer, 1);
        assert_eq!(diagnostics.non_positive, 2);
        assert_eq!(diagnostics.missing_date, 0);
        assert_eq!(diagnostics.output_rows, 2);
        assert_eq!(diagnostics.removed(), 4);

        let invoices: Vec<_> = output.table.iter().map(|tx| tx.invoice_no.as_str()).collect();
        assert_eq!(invoices, vec!["536365", "536369"]);
    }

    #[test]
    fn test_cancellation_counted_before_missing_customer() {
        // Both a cancellation and unattributed: only the first step counts it
        let table = RecordTable::new(vec![raw("C5002", 1, 1.0, None, "12/1/2010 8:26")]);
        let diagnostics = clean(&table, &CleaningPolicy::default()).unwrap().diagnostics;
        assert_eq!(diagnostics.cancelled, 1);
        assert_eq!(diagnostics.missing_customer, 0);
    }

    #[test]
    fn test_cleaned_rows_hold_invariants() {
        let output = clean(&sample_table(), &CleaningPolicy::default()).unwrap();
        for tx in output.table.iter() {
            assert!(tx.quantity > 0);
            assert!(tx.unit_price > 0.0);
            assert!(!tx.customer_id.is_empty());
            assert!(!is_cancellation(&tx.invoice_no, DEFAULT_CANCELLATION_MARKER));
            assert_eq!(tx.revenue, tx.quantity as f64 * tx.unit_price);
            assert!(tx.revenue >= 0.0);
        }
    }

    #[test]
    fn test_clean_is_idempotent() {
        let policy = CleaningPolicy::default();
        let once = clean(&sample_table(), &policy).unwrap();
        let twice = clean(&once.table.to_raw(), &policy).unwrap();

        assert_eq!(twice.table, once.table);
        assert_eq!(twice.diagnostics.removed(), 0);
    }

    #[test]
    fn test_raw_table_untouched() {
        let table = sample_table();
        let before = table.clone();
        clean(&table, &CleaningPolicy::default()).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_missing_quantity_or_price_dropped() {
        let mut no_quantity = raw("536370", 1, 1.0, Some("12583"), "12/1/2010 8:45");
        no_quantity.quantity = None;
        let mut no_price = raw("536371", 1, 1.0, Some("12583"), "12/1/2010 8:45");
        no_price.unit_price = None;

        let output = clean(
            &RecordTable::new(vec![no_quantity, no_price]),
            &CleaningPolicy::default(),
        )
        .unwrap();
        assert_eq!(output.diagnostics.non_positive, 2);
        assert!(output.table.is_empty());
    }

    #[test]
    fn test_empty_timestamp_dropped() {
        let mut row = raw("536370", 1, 1.0, Some("12583"), "");
        row.invoice_date = None;

        let output = clean(&RecordTable::new(vec![row]), &CleaningPolicy::default()).unwrap();
        assert_eq!(output.diagnostics.missing_date, 1);
        assert!(output.table.is_empty());
    }

    #[test]
    fn test_malformed_timestamp_is_fatal() {
        let table = RecordTable::new(vec![
            raw("536365", 6, 2.55, Some("17850"), "12/1/2010 8:26"),
            raw("536366", 6, 2.55, Some("17850"), "not a date"),
        ]);

        let err = clean(&table, &CleaningPolicy::default()).unwrap_err();
        match err {
            AnalysisError::Parse { row, value, .. } => {
                assert_eq!(row, 2);
                assert_eq!(value, "not a date");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_timestamp_on_filtered_row_is_ignored() {
        let table = RecordTable::new(vec![
            raw("536365", 6, 2.55, Some("17850"), "12/1/2010 8:26"),
            raw("C536366", 6, 2.55, Some("17850"), "not a date"),
        ]);
        assert!(clean(&table, &CleaningPolicy::default()).is_ok());
    }

    #[test]
    fn test_custom_cancellation_marker() {
        let table = RecordTable::new(vec![
            raw("X100", 1, 1.0, Some("1"), "2011-01-01"),
            raw("C100", 1, 1.0, Some("1"), "2011-01-01"),
        ]);
        let policy = CleaningPolicy {
            cancellation_marker: 'X',
        };
        let output = clean(&table, &policy).unwrap();
        assert_eq!(output.table.len(), 1);
        assert_eq!(output.table.rows()[0].invoice_no, "C100");
    }

    #[test]
    fn test_parse_invoice_date_formats() {
        let us = parse_invoice_date("12/1/2010 8:26").unwrap();
        assert_eq!((us.year(), us.month(), us.day()), (2010, 12, 1));
        assert_eq!((us.hour(), us.minute()), (8, 26));

        let iso = parse_invoice_date("2011-12-09 12:50:00").unwrap();
        assert_eq!((iso.year(), iso.month(), iso.day()), (2011, 12, 9));

        let rfc = parse_invoice_date("2010-12-01T08:26:00Z").unwrap();
        assert_eq!(rfc.hour(), 8);

        let midnight = parse_invoice_date("2011-03-01").unwrap();
        assert_eq!((midnight.hour(), midnight.minute()), (0, 0));

        assert!(parse_invoice_date("31/31/2011").is_none());
        assert!(parse_invoice_date("yesterday").is_none());
    }
}
