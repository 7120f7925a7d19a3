use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db_enum;
use crate::db_types::Metadata;

db_enum! {
    NotificationEvent {
        OrderCreated => "ORDER_CREATED",
        PaymentSuccess => "PAYMENT_SUCCESS",
        OrderShipped => "ORDER_SHIPPED",
        OrderDelivered => "ORDER_DELIVERED",
        OrderCancelled => "ORDER_CANCELLED",
        OrderRefunded => "ORDER_REFUNDED",
    }
}

db_enum! {
    NotificationStatus {
        Pending => "PENDING",
        Sent => "SENT",
        /// Terminal until an admin re-drives it.
        Failed => "FAILED",
    }
}

/// An outbox row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub order_id: i64,
    pub event_kind: NotificationEvent,
    pub recipient: String,
    #[sqlx(try_from = "String")]
    pub payload: Metadata,
    pub status: NotificationStatus,
    pub attempts: i64,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub order_id: i64,
    pub event_kind: NotificationEvent,
    pub recipient: String,
    pub payload: Metadata,
}
