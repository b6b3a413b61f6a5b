//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::clean::{CleaningPolicy, DEFAULT_CANCELLATION_MARKER};
use crate::pipeline::AnalysisOptions;
use crate::report::FileSink;

/// Online retail revenue analysis and RFM churn segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the raw transactions CSV file
    #[arg(short, long, default_value = "data/online_retail.csv")]
    pub input: PathBuf,

    /// Directory receiving cleaned_retail.csv and rfm_customers.csv
    #[arg(short, long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Number of products and customers to rank by revenue
    #[arg(short = 'n', long, default_value = "10")]
    pub top_n: usize,

    /// Save the monthly revenue chart as a PNG at this path
    #[arg(short, long)]
    pub chart: Option<PathBuf>,

    /// Invoice prefix that marks a cancelled order
    #[arg(long, default_value_t = DEFAULT_CANCELLATION_MARKER)]
    pub cancellation_marker: char,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Run configuration derived from the arguments
    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            input: self.input.clone(),
            output_dir: self.output_dir.clone(),
            top_n: self.top_n,
            chart: self.chart.clone(),
            policy: CleaningPolicy {
                cancellation_marker: self.cancellation_marker,
            },
        }
    }

    pub fn sink(&self) -> FileSink {
        self.options().file_sink()
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
