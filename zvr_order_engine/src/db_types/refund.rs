use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use zvr_common::Rupiah;

use crate::db_enum;

db_enum! {
    RefundType {
        /// Everything: items plus shipping.
        Full => "FULL",
        /// A caller-chosen amount, booked against items.
        Partial => "PARTIAL",
        ShippingOnly => "SHIPPING_ONLY",
        /// Selected order lines, at their checkout price.
        ItemOnly => "ITEM_ONLY",
    }
}

db_enum! {
    RefundReason {
        CustomerRequest => "CUSTOMER_REQUEST",
        DamagedItem => "DAMAGED_ITEM",
        WrongItem => "WRONG_ITEM",
        LostPackage => "LOST_PACKAGE",
        LateDelivery => "LATE_DELIVERY",
        DuplicatePayment => "DUPLICATE_PAYMENT",
        Other => "OTHER",
    }
}

db_enum! {
    RefundStatus {
        Pending => "PENDING",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

impl RefundStatus {
    /// Refunds in these states count against the refundable balance.
    pub fn holds_balance(&self) -> bool {
        matches!(self, RefundStatus::Processing | RefundStatus::Completed)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub refund_code: String,
    pub order_id: i64,
    pub payment_id: Option<i64>,
    pub refund_type: RefundType,
    pub reason: RefundReason,
    pub reason_detail: Option<String>,
    pub original_amount: Rupiah,
    pub refund_amount: Rupiah,
    pub shipping_refund: Rupiah,
    pub items_refund: Rupiah,
    pub status: RefundStatus,
    pub idempotency_key: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub note: Option<String>,
    pub requested_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefundItem {
    pub id: i64,
    pub refund_id: i64,
    pub order_item_id: i64,
    pub quantity: i64,
    pub price: Rupiah,
    pub refund_amount: Rupiah,
    pub stock_restored: bool,
}

/// A validated, fully-priced refund ready to be stored.
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub order_id: i64,
    pub payment_id: Option<i64>,
    pub refund_type: RefundType,
    pub reason: RefundReason,
    pub reason_detail: Option<String>,
    pub original_amount: Rupiah,
    pub refund_amount: Rupiah,
    pub shipping_refund: Rupiah,
    pub items_refund: Rupiah,
    pub idempotency_key: Option<String>,
    pub requested_by: String,
    pub items: Vec<NewRefundItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefundItem {
    pub order_item_id: i64,
    pub quantity: i64,
    pub price: Rupiah,
    pub refund_amount: Rupiah,
}
