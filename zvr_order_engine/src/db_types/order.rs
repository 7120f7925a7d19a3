use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use zvr_common::Rupiah;

use crate::db_enum;
use crate::db_types::Metadata;

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
db_enum! {
    OrderStatusType {
        /// Created at checkout, awaiting payment.
        Pending => "PENDING",
        /// The gateway confirmed the payment.
        Paid => "PAID",
        Packing => "PACKING",
        /// Handed to the courier. The resi is locked from here on.
        Shipped => "SHIPPED",
        Delivered => "DELIVERED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
        Expired => "EXPIRED",
        Failed => "FAILED",
        Refunded => "REFUNDED",
    }
}

db_enum! {
    /// Summary of how much of an order has been given back to the customer.
    OrderRefundStatus {
        NotRefunded => "NONE",
        Partial => "PARTIAL",
        Full => "FULL",
    }
}

//--------------------------------------        Actor          ---------------------------------------------------------
/// Who caused a change, as recorded in the status history. Formatted as `kind:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn customer(id: Option<i64>) -> Self {
        match id {
            Some(id) => Self(format!("customer:{id}")),
            None => Self("customer:guest".to_string()),
        }
    }

    pub fn admin(email: &str) -> Self {
        Self(format!("admin:{email}"))
    }

    pub fn system(job: &str) -> Self {
        Self(format!("system:{job}"))
    }

    pub fn webhook() -> Self {
        Self::system("webhook")
    }

    pub fn monitor() -> Self {
        Self::system("monitor")
    }

    pub fn tracking() -> Self {
        Self::system("tracking")
    }

    pub fn is_admin(&self) -> bool {
        self.0.starts_with("admin:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_code: String,
    pub user_id: Option<i64>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub subtotal: Rupiah,
    pub shipping_cost: Rupiah,
    pub tax: Rupiah,
    pub discount: Rupiah,
    pub total_amount: Rupiah,
    pub status: OrderStatusType,
    pub stock_reserved: bool,
    pub resi: Option<String>,
    pub refund_status: OrderRefundStatus,
    pub refund_amount: Rupiah,
    #[sqlx(try_from = "String")]
    pub metadata: Metadata,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// `subtotal + shipping_cost + tax - discount`
    pub fn computed_total(&self) -> Rupiah {
        self.subtotal + self.shipping_cost + self.tax - self.discount
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

//--------------------------------------      OrderItem        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i64,
    pub unit_price: Rupiah,
    pub subtotal: Rupiah,
    pub weight_grams: i64,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------       NewOrder        ---------------------------------------------------------
/// Everything checkout has worked out before it opens the order transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Option<i64>,
    pub cart_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub subtotal: Rupiah,
    pub shipping_cost: Rupiah,
    pub tax: Rupiah,
    pub discount: Rupiah,
    pub total_amount: Rupiah,
    pub metadata: Metadata,
    pub items: Vec<NewOrderItem>,
    pub shipment: super::NewShipment,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i64,
    pub unit_price: Rupiah,
    pub weight_grams: i64,
}

impl NewOrderItem {
    pub fn subtotal(&self) -> Rupiah {
        self.unit_price * self.quantity
    }
}
