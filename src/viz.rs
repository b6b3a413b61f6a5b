//! Revenue chart rendering with Plotters and console previews

use std::path::Path;

use plotters::prelude::*;

use crate::aggregate::{MonthlyRevenue, RevenueRank};
use crate::clean::CleanDiagnostics;
use crate::error::{AnalysisError, Result};
use crate::rfm::RfmTable;

/// Rows shown in head-of-table previews
pub const PREVIEW_ROWS: usize = 5;

const CHART_TITLE: &str = "Monthly Revenue Trend";

/// Render monthly revenue as a line chart
///
/// # Arguments
/// * `trend` - Monthly totals, earliest first
/// * `output_path` - Path to save the PNG plot
pub fn render_monthly_revenue(trend: &[MonthlyRevenue], output_path: &Path) -> Result<()> {
    if trend.is_empty() {
        return Err(AnalysisError::Chart("no monthly revenue to plot".to_string()));
    }

    let (x_range, y_range) = chart_bounds(trend);
    let labels: Vec<String> = trend.iter().map(|m| m.month.to_string()).collect();

    let root = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(CHART_TITLE, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range, y_range)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .x_desc("Month")
        .y_desc("Revenue")
        .x_labels(labels.len())
        .x_label_formatter(&|index| labels.get(*index).cloned().unwrap_or_default())
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(chart_error)?;

    chart
        .draw_series(LineSeries::new(
            trend.iter().enumerate().map(|(i, m)| (i, m.revenue)),
            &BLUE,
        ))
        .map_err(chart_error)?;
    chart
        .draw_series(
            trend
                .iter()
                .enumerate()
                .map(|(i, m)| Circle::new((i, m.revenue), 3, BLUE.filled())),
        )
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;
    println!("Monthly revenue chart saved to: {}", output_path.display());

    Ok(())
}

/// Axis ranges: one x slot per month, y from zero with headroom above the peak
fn chart_bounds(trend: &[MonthlyRevenue]) -> (std::ops::Range<usize>, std::ops::Range<f64>) {
    let peak = trend.iter().map(|m| m.revenue).fold(0.0, f64::max);
    let y_max = if peak > 0.0 { peak * 1.1 } else { 1.0 };
    (0..trend.len().max(2) - 1, 0.0..y_max)
}

fn chart_error(err: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Chart(err.to_string())
}

/// Print row counts and the null summary after cleaning
pub fn print_cleaning_summary(diagnostics: &CleanDiagnostics, nulls: &[(&str, usize)]) {
    println!("\n=== Cleaning ===");
    println!("Rows before cleaning: {}", diagnostics.input_rows);
    println!("  Cancelled invoices:        {}", diagnostics.cancelled);
    println!("  Missing customer:          {}", diagnostics.missing_customer);
    println!("  Non-positive qty or price: {}", diagnostics.non_positive);
    if diagnostics.missing_date > 0 {
        println!("  Missing invoice date:      {}", diagnostics.missing_date);
    }
    println!("Rows after cleaning:  {}", diagnostics.output_rows);

    println!("\nMissing values after cleaning:");
    for (column, count) in nulls {
        println!("  {:<12} {}", column, count);
    }
}

pub fn print_monthly_revenue(trend: &[MonthlyRevenue]) {
    println!("\n=== Monthly Revenue ===");
    for entry in trend.iter().take(PREVIEW_ROWS) {
        println!("  {} | {:>14.2}", entry.month, entry.revenue);
    }
    if trend.len() > PREVIEW_ROWS {
        println!("  ... {} months total", trend.len());
    }
}

/// Print a revenue ranking under `title`
pub fn print_ranking(title: &str, ranks: &[RevenueRank]) {
    println!("\n=== {} ===", title);
    for (position, rank) in ranks.iter().enumerate() {
        println!("  {:>2}. {:<40} {:>14.2}", position + 1, rank.key, rank.revenue);
    }
}

pub fn print_rfm_summary(rfm: &RfmTable) {
    println!("\n=== RFM Sample ===");
    println!("Snapshot date: {}", rfm.snapshot);
    println!("  CustomerID | Recency | Frequency |       Monetary | ChurnRisk");
    println!("  -----------|---------|-----------|----------------|----------");
    for customer in rfm.customers.iter().take(PREVIEW_ROWS) {
        println!(
            "  {:>10} | {:>7} | {:>9} | {:>14.2} | {}",
            customer.customer_id,
            customer.recency,
            customer.frequency,
            customer.monetary,
            customer.churn_risk
        );
    }

    println!("\n=== Churn Risk Distribution ===");
    for (risk, count) in rfm.churn_distribution() {
        let percentage = (count as f64 / rfm.len().max(1) as f64) * 100.0;
        println!("  {:<10} {:>6} ({:.1}%)", risk.label(), count, percentage);
    }
}
