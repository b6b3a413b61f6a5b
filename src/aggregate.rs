//! Revenue aggregates over the cleaned table

use polars::prelude::*;

use crate::data::{CleanTable, Month};
use crate::error::Result;

/// Total revenue booked in one calendar month
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyRevenue {
    pub month: Month,
    pub revenue: f64,
}

/// A product or customer with its summed revenue
#[derive(Debug, Clone, PartialEq)]
pub struct RevenueRank {
    pub key: String,
    pub revenue: f64,
}

/// Revenue per calendar month, earliest month first
pub fn monthly_revenue(table: &CleanTable) -> Result<Vec<MonthlyRevenue>> {
    let monthly = table
        .analysis_frame()?
        .lazy()
        .group_by([col("MonthKey")])
        .agg([col("Revenue").sum()])
        .sort_by_exprs([col("MonthKey")], SortMultipleOptions::default())
        .collect()?;

    let keys = monthly.column("MonthKey")?.i32()?;
    let revenue = monthly.column("Revenue")?.f64()?;

    Ok(keys
        .into_no_null_iter()
        .zip(revenue.into_no_null_iter())
        .map(|(key, revenue)| MonthlyRevenue {
            month: Month::from_key(key),
            revenue,
        })
        .collect())
}

/// The `n` product descriptions with the highest revenue
///
/// Rows without a description are not grouped. Equal totals keep the order in
/// which the descriptions first appear.
pub fn top_products(table: &CleanTable, n: usize) -> Result<Vec<RevenueRank>> {
    let products = table
        .analysis_frame()?
        .lazy()
        .filter(col("Description").is_not_null());
    rank_by_revenue(products, "Description", Some(n))
}

/// Every customer ranked by lifetime revenue, highest first
pub fn customer_revenue(table: &CleanTable) -> Result<Vec<RevenueRank>> {
    rank_by_revenue(table.analysis_frame()?.lazy(), "CustomerID", None)
}

/// The `n` customers with the highest revenue
pub fn top_customers(table: &CleanTable, n: usize) -> Result<Vec<RevenueRank>> {
    rank_by_revenue(table.analysis_frame()?.lazy(), "CustomerID", Some(n))
}

pub fn total_revenue(table: &CleanTable) -> f64 {
    table.iter().map(|tx| tx.revenue).sum()
}

/// Sum revenue per `key` in first-seen order, then sort descending.
/// The sort keeps ties in first-seen order.
fn rank_by_revenue(frame: LazyFrame, key: &str, n: Option<usize>) -> Result<Vec<RevenueRank>> {
    let mut ranked = frame
        .group_by_stable([col(key)])
        .agg([col("Revenue").sum()])
        .sort_by_exprs(
            [col("Revenue")],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        );
    if let Some(n) = n {
        ranked = ranked.limit(n as IdxSize);
    }
    let ranked = ranked.collect()?;

    let keys = ranked.column(key)?.str()?;
    let revenue = ranked.column("Revenue")?.f64()?;

    Ok(keys
        .into_no_null_iter()
        .zip(revenue.into_no_null_iter())
        .map(|(key, revenue)| RevenueRank {
            key: key.to_string(),
            revenue,
        })
        .collect())
}
