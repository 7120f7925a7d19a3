use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use zvr_common::Rupiah;

use crate::db_enum;
use crate::db_types::Metadata;

db_enum! {
    PaymentStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Expired => "EXPIRED",
        Cancelled => "CANCELLED",
        Failed => "FAILED",
    }
}

impl PaymentStatus {
    /// Every status except `Pending` is final.
    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

db_enum! {
    /// What caused a payment status to be resolved.
    SyncType {
        Webhook => "webhook",
        ManualCheck => "manual_check",
        AutoResolve => "auto_resolve",
        Admin => "admin",
        ExpirySweeper => "expiry_sweeper",
    }
}

/// One charge attempt against the gateway. An order may accumulate several, but only the latest non-final one is
/// ever acted upon.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub payment_method: String,
    pub provider: Option<String>,
    pub bank: Option<String>,
    pub external_gateway_id: String,
    pub transaction_id: Option<String>,
    pub amount: Rupiah,
    pub status: PaymentStatus,
    pub va_number: Option<String>,
    pub qr_url: Option<String>,
    pub expiry_time: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    #[sqlx(try_from = "String")]
    pub raw_response: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub payment_method: String,
    pub provider: Option<String>,
    pub bank: Option<String>,
    pub external_gateway_id: String,
    pub amount: Rupiah,
    pub expiry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentSyncLog {
    pub id: i64,
    pub payment_id: i64,
    pub sync_type: SyncType,
    pub previous_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub gateway_status: Option<String>,
    pub actor: String,
    pub note: Option<String>,
    #[sqlx(try_from = "String")]
    pub raw_response: Metadata,
    pub created_at: DateTime<Utc>,
}
