//! Flat-file outputs: cleaned transactions, RFM table and the revenue chart

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::aggregate::MonthlyRevenue;
use crate::data::{CleanTable, TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::rfm::RfmTable;
use crate::viz;

pub const CLEANED_FILE_NAME: &str = "cleaned_retail.csv";
pub const RFM_FILE_NAME: &str = "rfm_customers.csv";

/// Destination for finished results
///
/// Writes are staged. Nothing appears at a final location until `commit`
/// succeeds, and `discard` throws away whatever was staged.
pub trait ReportSink {
    fn write_cleaned(&mut self, table: &CleanTable) -> Result<()>;
    fn write_rfm(&mut self, rfm: &RfmTable) -> Result<()>;
    fn render_trend(&mut self, trend: &[MonthlyRevenue]) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn discard(&mut self);
}

/// Writes CSV files into an output directory and, optionally, a PNG chart
///
/// Each output is first written to a temporary file beside its destination
/// and renamed into place on `commit`.
#[derive(Debug)]
pub struct FileSink {
    output_dir: PathBuf,
    chart_path: Option<PathBuf>,
    staged: Vec<(NamedTempFile, PathBuf)>,
    written: Vec<PathBuf>,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>, chart_path: Option<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            chart_path,
            staged: Vec::new(),
            written: Vec::new(),
        }
    }

    pub fn cleaned_path(&self) -> PathBuf {
        self.output_dir.join(CLEANED_FILE_NAME)
    }

    pub fn rfm_path(&self) -> PathBuf {
        self.output_dir.join(RFM_FILE_NAME)
    }

    /// Files committed so far, in write order
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ReportSink for FileSink {
    fn write_cleaned(&mut self, table: &CleanTable) -> Result<()> {
        let path = self.cleaned_path();
        let staged = stage_frame(&mut cleaned_frame(table)?, &self.output_dir)?;
        debug!(rows = table.len(), path = %path.display(), "staged cleaned transactions");
        self.staged.push((staged, path));
        Ok(())
    }

    fn write_rfm(&mut self, rfm: &RfmTable) -> Result<()> {
        let path = self.rfm_path();
        let staged = stage_frame(&mut rfm_frame(rfm)?, &self.output_dir)?;
        debug!(customers = rfm.len(), path = %path.display(), "staged RFM table");
        self.staged.push((staged, path));
        Ok(())
    }

    fn render_trend(&mut self, trend: &[MonthlyRevenue]) -> Result<()> {
        let Some(path) = self.chart_path.clone() else {
            return Ok(());
        };
        // The backend picks the image format from the extension
        let staged = tempfile::Builder::new()
            .prefix(".retail-rfm")
            .suffix(".png")
            .tempfile_in(parent_dir(&path))?;
        viz::render_monthly_revenue(trend, staged.path())?;
        debug!(path = %path.display(), "staged monthly revenue chart");
        self.staged.push((staged, path));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());

        for (file, path) in staged {
            if let Err(err) = file.persist(&path) {
                for done in &committed {
                    let _ = fs::remove_file(done);
                }
                return Err(err.error.into());
            }
            info!(path = %path.display(), "saved output");
            committed.push(path);
        }

        self.written.extend(committed);
        Ok(())
    }

    fn discard(&mut self) {
        if !self.staged.is_empty() {
            warn!(files = self.staged.len(), "discarding staged outputs");
        }
        self.staged.clear();
    }
}

/// Cleaned transactions with their derived Revenue and Month columns
pub fn cleaned_frame(table: &CleanTable) -> Result<DataFrame> {
    let rows = table.rows();
    let frame = DataFrame::new(vec![
        Series::new(
            "InvoiceNo",
            rows.iter().map(|tx| tx.invoice_no.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "StockCode",
            rows.iter().map(|tx| tx.stock_code.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Description",
            rows.iter()
                .map(|tx| tx.description.as_deref())
                .collect::<Vec<Option<&str>>>(),
        ),
        Series::new(
            "Quantity",
            rows.iter().map(|tx| tx.quantity).collect::<Vec<i64>>(),
        ),
        Series::new(
            "InvoiceDate",
            rows.iter()
                .map(|tx| tx.invoice_date.format(TIMESTAMP_FORMAT).to_string())
                .collect::<Vec<_>>(),
        ),
        Series::new(
            "UnitPrice",
            rows.iter().map(|tx| tx.unit_price).collect::<Vec<f64>>(),
        ),
        Series::new(
            "CustomerID",
            rows.iter().map(|tx| tx.customer_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Country",
            rows.iter().map(|tx| tx.country.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Revenue",
            rows.iter().map(|tx| tx.revenue).collect::<Vec<f64>>(),
        ),
        Series::new(
            "Month",
            rows.iter()
                .map(|tx| tx.month().to_string())
                .collect::<Vec<_>>(),
        ),
    ])?;
    Ok(frame)
}

/// One row per customer: id, Recency, Frequency, Monetary, ChurnRisk
pub fn rfm_frame(rfm: &RfmTable) -> Result<DataFrame> {
    let customers = &rfm.customers;
    let frame = DataFrame::new(vec![
        Series::new(
            "CustomerID",
            customers
                .iter()
                .map(|c| c.customer_id.as_str())
                .collect::<Vec<_>>(),
        ),
        Series::new(
            "Recency",
            customers.iter().map(|c| c.recency).collect::<Vec<i64>>(),
        ),
        Series::new(
            "Frequency",
            customers
                .iter()
                .map(|c| c.frequency as i64)
                .collect::<Vec<i64>>(),
        ),
        Series::new(
            "Monetary",
            customers.iter().map(|c| c.monetary).collect::<Vec<f64>>(),
        ),
        Series::new(
            "ChurnRisk",
            customers
                .iter()
                .map(|c| c.churn_risk.label())
                .collect::<Vec<_>>(),
        ),
    ])?;
    Ok(frame)
}

/// Write `frame` as CSV into a fresh temporary file inside `dir`
fn stage_frame(frame: &mut DataFrame, dir: &Path) -> Result<NamedTempFile> {
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    CsvWriter::new(staged.as_file_mut())
        .include_header(true)
        .finish(frame)?;
    Ok(staged)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
