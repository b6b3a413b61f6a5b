//! Batch run: load, clean, aggregate and score, then publish

use std::path::PathBuf;

use tracing::{debug, info};

use crate::aggregate::{self, MonthlyRevenue, RevenueRank};
use crate::clean::{self, CleanDiagnostics, CleaningPolicy};
use crate::data::{self, CleanTable, RecordTable};
use crate::error::{AnalysisError, Result};
use crate::report::{FileSink, ReportSink};
use crate::rfm::{self, RfmTable};

/// Inputs of a run
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub input: PathBuf,
    /// Directory receiving the cleaned and RFM CSV files
    pub output_dir: PathBuf,
    /// Length of the product and customer rankings
    pub top_n: usize,
    /// PNG destination for the monthly revenue chart, if any
    pub chart: Option<PathBuf>,
    pub policy: CleaningPolicy,
}

impl AnalysisOptions {
    /// Sink writing into `output_dir` and, when set, `chart`
    pub fn file_sink(&self) -> FileSink {
        FileSink::new(self.output_dir.clone(), self.chart.clone())
    }
}

/// Everything a run derives from the input
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub cleaned: CleanTable,
    pub diagnostics: CleanDiagnostics,
    pub monthly_revenue: Vec<MonthlyRevenue>,
    pub top_products: Vec<RevenueRank>,
    pub top_customers: Vec<RevenueRank>,
    pub rfm: RfmTable,
}

/// Clean `raw` and derive every aggregate from the cleaned table
///
/// # Errors
/// * `AnalysisError::InvalidArgument` when `top_n` is zero
/// * `AnalysisError::Parse` for a malformed invoice timestamp
/// * `AnalysisError::EmptyInput` when no rows survive cleaning
pub fn analyze(
    raw: &RecordTable,
    policy: &CleaningPolicy,
    top_n: usize,
) -> Result<AnalysisReport> {
    if top_n == 0 {
        return Err(AnalysisError::InvalidArgument(
            "top-n must be at least 1".to_string(),
        ));
    }

    let clean::CleanOutput {
        table: cleaned,
        diagnostics,
    } = clean::clean(raw, policy)?;
    if cleaned.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }

    let monthly_revenue = aggregate::monthly_revenue(&cleaned)?;
    let top_products = aggregate::top_products(&cleaned, top_n)?;
    let top_customers = aggregate::top_customers(&cleaned, top_n)?;
    debug!(
        months = monthly_revenue.len(),
        products = top_products.len(),
        customers = top_customers.len(),
        "computed revenue aggregates"
    );

    let rfm = rfm::compute_rfm(&cleaned)?;

    Ok(AnalysisReport {
        cleaned,
        diagnostics,
        monthly_revenue,
        top_products,
        top_customers,
        rfm,
    })
}

/// Push finished results into `sink`
///
/// All outputs are staged first. They are committed together, or discarded if
/// any of them fails.
pub fn publish(report: &AnalysisReport, sink: &mut dyn ReportSink) -> Result<()> {
    match stage_outputs(report, sink) {
        Ok(()) => sink.commit(),
        Err(err) => {
            sink.discard();
            Err(err)
        }
    }
}

fn stage_outputs(report: &AnalysisReport, sink: &mut dyn ReportSink) -> Result<()> {
    sink.write_cleaned(&report.cleaned)?;
    sink.write_rfm(&report.rfm)?;
    sink.render_trend(&report.monthly_revenue)?;
    Ok(())
}

/// Run the whole batch
///
/// Every result is computed before the sink sees anything, and the sink only
/// commits once every output is staged, so a failing run leaves no output
/// behind.
pub fn run(options: &AnalysisOptions, sink: &mut dyn ReportSink) -> Result<AnalysisReport> {
    let raw = data::load_transactions(&options.input)?;
    let report = analyze(&raw, &options.policy, options.top_n)?;
    publish(&report, sink)?;

    info!(
        transactions = report.cleaned.len(),
        customers = report.rfm.len(),
        "analysis complete"
    );
    Ok(report)
}
