//! Recency-Frequency-Monetary scoring and churn classification

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime};
use polars::prelude::*;
use tracing::info;

use crate::data::CleanTable;
use crate::error::{AnalysisError, Result};

/// Customers idle for longer than this many days may be flagged
pub const CHURN_RECENCY_DAYS: i64 = 90;

/// Only customers with exactly this many invoices may be flagged
pub const CHURN_FREQUENCY: usize = 1;

/// Binary churn flag. Monetary value plays no part in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChurnRisk {
    High,
    Low,
}

impl ChurnRisk {
    /// High risk only for one-time buyers idle for more than 90 days
    pub fn classify(recency: i64, frequency: usize) -> Self {
        if recency > CHURN_RECENCY_DAYS && frequency == CHURN_FREQUENCY {
            ChurnRisk::High
        } else {
            ChurnRisk::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChurnRisk::High => "High Risk",
            ChurnRisk::Low => "Low Risk",
        }
    }
}

impl fmt::Display for ChurnRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// RFM scores for a single customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfm {
    pub customer_id: String,
    /// Whole days from the latest purchase to the snapshot date
    pub recency: i64,
    /// Distinct invoices
    pub frequency: usize,
    pub monetary: f64,
    pub churn_risk: ChurnRisk,
}

/// RFM scores for every customer, ordered by customer id
#[derive(Debug, Clone, PartialEq)]
pub struct RfmTable {
    pub snapshot: NaiveDateTime,
    pub customers: Vec<CustomerRfm>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerRfm> {
        self.customers.iter().find(|c| c.customer_id == customer_id)
    }

    pub fn total_monetary(&self) -> f64 {
        self.customers.iter().map(|c| c.monetary).sum()
    }

    /// Customers per churn class, most common first
    pub fn churn_distribution(&self) -> Vec<(ChurnRisk, usize)> {
        let high = self
            .customers
            .iter()
            .filter(|c| c.churn_risk == ChurnRisk::High)
            .count();
        let low = self.customers.len() - high;

        let mut counts = vec![(ChurnRisk::High, high), (ChurnRisk::Low, low)];
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }
}

/// One day past the latest invoice in the table
///
/// # Errors
/// * `AnalysisError::EmptyInput` when the table has no rows
pub fn snapshot_date(table: &CleanTable) -> Result<NaiveDateTime> {
    table
        .max_invoice_date()
        .map(|latest| latest + Duration::days(1))
        .ok_or(AnalysisError::EmptyInput)
}

/// Compute Recency, Frequency and Monetary for every customer
///
/// # Arguments
/// * `table` - Cleaned transactions
///
/// # Returns
/// * `RfmTable` with one record per distinct customer id
pub fn compute_rfm(table: &CleanTable) -> Result<RfmTable> {
    let snapshot = snapshot_date(table)?;

    let rfm_df = table
        .analysis_frame()?
        .lazy()
        .group_by([col("CustomerID")])
        .agg([
            col("InvoiceMicros").max().alias("LastPurchase"),
            col("InvoiceNo")
                .n_unique()
                .cast(DataType::UInt64)
                .alias("Frequency"),
            col("Revenue").sum().alias("Monetary"),
        ])
        .collect()?;

    let ids = rfm_df.column("CustomerID")?.str()?;
    let last_purchase = rfm_df.column("LastPurchase")?.i64()?;
    let frequency = rfm_df.column("Frequency")?.u64()?;
    let monetary = rfm_df.column("Monetary")?.f64()?;

    let mut customers = Vec::with_capacity(rfm_df.height());
    for (((customer_id, last), frequency), monetary) in ids
        .into_no_null_iter()
        .zip(last_purchase.into_no_null_iter())
        .zip(frequency.into_no_null_iter())
        .zip(monetary.into_no_null_iter())
    {
        let last = DateTime::from_timestamp_micros(last)
            .map(|d| d.naive_utc())
            .ok_or_else(|| {
                AnalysisError::InvalidArgument(format!(
                    "last purchase of customer {customer_id} is out of range"
                ))
            })?;
        let recency = (snapshot - last).num_days();
        let frequency = frequency as usize;
        customers.push(CustomerRfm {
            customer_id: customer_id.to_string(),
            recency,
            frequency,
            monetary,
            churn_risk: ChurnRisk::classify(recency, frequency),
        });
    }
    customers.sort_by(|a, b| compare_customer_ids(&a.customer_id, &b.customer_id));

    info!(
        customers = customers.len(),
        snapshot = %snapshot,
        "computed RFM scores"
    );

    Ok(RfmTable {
        snapshot,
        customers,
    })
}

/// Numeric ids in numeric order, then any other ids in text order
fn compare_customer_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::total_revenue;
    use crate::clean::{clean, CleaningPolicy};
    use crate::data::{RawRecord, RecordTable};
    use chrono::NaiveDate;

    fn row(invoice: &str, customer: &str, quantity: i64, price: f64, date: &str) -> RawRecord {
        RawRecord {
            invoice_no: invoice.to_string(),
            stock_code: "21730".to_string(),
            description: Some("GLASS STAR FROSTED T-LIGHT HOLDER".to_string()),
            quantity: Some(quantity),
            unit_price: Some(price),
            invoice_date: Some(date.to_string()),
            customer_id: Some(customer.to_string()),
            country: "United Kingdom".to_string(),
        }
    }

    fn cleaned(rows: Vec<RawRecord>) -> CleanTable {
        clean(&RecordTable::new(rows), &CleaningPolicy::default())
            .unwrap()
            .table
    }

    #[test]
    fn test_classify() {
        assert_eq!(ChurnRisk::classify(91, 1), ChurnRisk::High);
        assert_eq!(ChurnRisk::classify(90, 1), ChurnRisk::Low);
        assert_eq!(ChurnRisk::classify(300, 2), ChurnRisk::Low);
        assert_eq!(ChurnRisk::classify(5, 1), ChurnRisk::Low);
        assert_eq!(ChurnRisk::High.to_string(), "High Risk");
        assert_eq!(ChurnRisk::Low.to_string(), "Low Risk");
    }

    #[test]
    fn test_snapshot_date() {
        let table = cleaned(vec![
            row("1", "1", 1, 1.0, "2011-03-01 10:00:00"),
            row("2", "2", 1, 1.0, "2011-12-10 08:00:00"),
        ]);
        let expected = NaiveDate::from_ymd_opt(2011, 12, 11)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(snapshot_date(&table).unwrap(), expected);
    }

    #[test]
    fn test_empty_table_has_no_snapshot() {
        let table = CleanTable::default();
        assert!(matches!(snapshot_date(&table), Err(AnalysisError::EmptyInput)));
        assert!(matches!(compute_rfm(&table), Err(AnalysisError::EmptyInput)));
    }

    #[test]
    fn test_repeat_customer_not_flagged() {
        let table = cleaned(vec![
            row("540001", "12347", 2, 5.0, "2011-01-01 00:00:00"),
            row("545001", "12347", 1, 3.0, "2011-03-01 00:00:00"),
            row("545001", "12347", 1, 2.0, "2011-03-01 00:00:00"),
            row("581587", "12680", 1, 1.0, "2011-12-10 00:00:00"),
        ]);
        let rfm = compute_rfm(&table).unwrap();
        let customer = rfm.get("12347").unwrap();

        let snapshot = NaiveDate::from_ymd_opt(2011, 12, 11).unwrap();
        let last = NaiveDate::from_ymd_opt(2011, 3, 1).unwrap();
        assert_eq!(customer.recency, (snapshot - last).num_days());
        assert!(customer.recency > CHURN_RECENCY_DAYS);
        assert_eq!(customer.frequency, 2);
        assert_eq!(customer.monetary, 15.0);
        assert_eq!(customer.churn_risk, ChurnRisk::Low);
    }

    #[test]
    fn test_recency_boundary() {
        // Snapshot is 2011-12-11; 90 and 91 days before it
        let table = cleaned(vec![
            row("1", "100", 1, 1.0, "2011-09-12 00:00:00"),
            row("2", "101", 1, 1.0, "2011-09-11 00:00:00"),
            row("3", "102", 1, 1.0, "2011-12-10 00:00:00"),
        ]);
        let rfm = compute_rfm(&table).unwrap();

        let at_boundary = rfm.get("100").unwrap();
        assert_eq!(at_boundary.recency, 90);
        assert_eq!(at_boundary.churn_risk, ChurnRisk::Low);

        let past_boundary = rfm.get("101").unwrap();
        assert_eq!(past_boundary.recency, 91);
        assert_eq!(past_boundary.churn_risk, ChurnRisk::High);

        assert_eq!(rfm.get("102").unwrap().recency, 1);
    }

    #[test]
    fn test_rfm_invariants() {
        let table = cleaned(vec![
            row("1", "17850", 6, 2.55, "12/1/2010 8:26"),
            row("1", "17850", 6, 3.39, "12/1/2010 8:26"),
            row("2", "13047", 8, 2.75, "12/1/2010 8:34"),
            row("3", "12583", 24, 3.75, "12/1/2010 8:45"),
            row("4", "17850", 6, 1.85, "12/2/2010 9:10"),
        ]);
        let rfm = compute_rfm(&table).unwrap();

        assert_eq!(rfm.len(), 3);
        assert!(rfm.customers.iter().all(|c| c.recency >= 1));
        assert!((rfm.total_monetary() - total_revenue(&table)).abs() < 1e-9);
        for customer in &rfm.customers {
            let expected = ChurnRisk::classify(customer.recency, customer.frequency);
            assert_eq!(customer.churn_risk, expected);
        }
    }

    #[test]
    fn test_customers_sorted_by_id() {
        let table = cleaned(vec![
            row("1", "9999", 1, 1.0, "2011-01-01 00:00:00"),
            row("2", "12346", 1, 1.0, "2011-01-01 00:00:00"),
            row("3", "ANON", 1, 1.0, "2011-01-01 00:00:00"),
            row("4", "100", 1, 1.0, "2011-01-01 00:00:00"),
        ]);
        let ids: Vec<_> = compute_rfm(&table)
            .unwrap()
            .customers
            .into_iter()
            .map(|c| c.customer_id)
            .collect();
        assert_eq!(ids, vec!["100", "9999", "12346", "ANON"]);
    }

    #[test]
    fn test_churn_distribution() {
        let table = cleaned(vec![
            row("1", "1", 1, 1.0, "2011-01-01 00:00:00"),
            row("2", "2", 1, 1.0, "2011-01-02 00:00:00"),
            row("3", "3", 1, 1.0, "2011-12-01 00:00:00"),
        ]);
        let distribution = compute_rfm(&table).unwrap().churn_distribution();
        assert_eq!(distribution, vec![(ChurnRisk::High, 2), (ChurnRisk::Low, 1)]);
    }
}
