use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db_enum;

db_enum! {
    MovementType {
        /// Stock set aside at checkout (negative delta).
        Reserve => "RESERVE",
        /// A reservation given back (positive delta).
        Release => "RELEASE",
        /// A reservation that became a sale. Stock already left the shelf at reservation, so the delta is zero.
        Deduct => "DEDUCT",
        /// Anything else, such as stock returned by a refund.
        Adjustment => "ADJUSTMENT",
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub order_id: Option<i64>,
    pub refund_id: Option<i64>,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub delta: i64,
    pub balance_after: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
