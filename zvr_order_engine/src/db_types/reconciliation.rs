use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use zvr_common::Rupiah;

use crate::db_enum;
use crate::db_types::Metadata;

db_enum! {
    ReconciliationStatus {
        Balanced => "BALANCED",
        MismatchesFound => "MISMATCHES_FOUND",
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub id: i64,
    pub reconciliation_date: NaiveDate,
    pub status: ReconciliationStatus,
    pub total_orders: i64,
    pub paid_orders: i64,
    pub total_payments: i64,
    pub paid_payments: i64,
    pub completed_refunds: i64,
    pub expected_revenue: Rupiah,
    pub collected_revenue: Rupiah,
    pub revenue_variance: Rupiah,
    pub orphan_orders: i64,
    pub orphan_payments: i64,
    pub stuck_payments: i64,
    pub auto_resolved: i64,
    pub unresolved: i64,
    #[sqlx(try_from = "String")]
    pub details: Metadata,
    pub created_at: DateTime<Utc>,
}
