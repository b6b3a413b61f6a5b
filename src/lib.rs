//! retail-rfm: revenue analysis and churn segmentation for online retail data
//!
//! This library cleans raw transaction exports, aggregates revenue by month,
//! product and customer, and scores customers with RFM (Recency, Frequency,
//! Monetary) analysis plus a binary churn-risk flag.

pub mod aggregate;
pub mod clean;
pub mod cli;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod rfm;
pub mod viz;

// Re-export public items for easier access
pub use aggregate::{
    customer_revenue, monthly_revenue, top_customers, top_products, total_revenue,
    MonthlyRevenue, RevenueRank,
};
pub use clean::{clean, is_cancellation, CleanDiagnostics, CleanOutput, CleaningPolicy};
pub use cli::Args;
pub use data::{load_transactions, CleanTable, Month, RawRecord, RecordTable, Transaction};
pub use error::{AnalysisError, Result};
pub use pipeline::{analyze, publish, run, AnalysisOptions, AnalysisReport};
pub use report::{FileSink, ReportSink};
pub use rfm::{compute_rfm, snapshot_date, ChurnRisk, CustomerRfm, RfmTable};
