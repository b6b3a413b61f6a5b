//! retail-rfm: cleans an online retail export and derives revenue and RFM reports
//!
//! This is the main entrypoint that orchestrates loading, cleaning,
//! aggregation, RFM scoring and report output.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use retail_rfm::{pipeline, viz, Args};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level());

    if args.verbose {
        println!("retail-rfm - Revenue & Customer Retention Analysis");
        println!("==================================================\n");
    }

    let start_time = Instant::now();
    let options = args.options();
    let mut sink = options.file_sink();

    let report = pipeline::run(&options, &mut sink)
        .with_context(|| format!("analysis of {} failed", options.input.display()))?;

    viz::print_cleaning_summary(&report.diagnostics, &report.cleaned.null_summary());
    viz::print_monthly_revenue(&report.monthly_revenue);
    viz::print_ranking(
        &format!("Top {} Products by Revenue", options.top_n),
        &report.top_products,
    );
    viz::print_ranking(
        &format!("Top {} Customers by Revenue", options.top_n),
        &report.top_customers,
    );
    viz::print_rfm_summary(&report.rfm);

    println!("\n=== Outputs ===");
    for path in sink.written() {
        println!("Saved: {}", path.display());
    }
    if args.verbose {
        println!(
            "Total processing time: {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
