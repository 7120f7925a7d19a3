use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use zvr_common::Rupiah;

use crate::db_enum;

db_enum! {
    ShipmentStatus {
        /// Order not paid yet.
        Pending => "PENDING",
        /// Payment received, waiting to be packed and handed over.
        Processing => "PROCESSING",
        PickupScheduled => "PICKUP_SCHEDULED",
        PickupFailed => "PICKUP_FAILED",
        Shipped => "SHIPPED",
        InTransit => "IN_TRANSIT",
        OutForDelivery => "OUT_FOR_DELIVERY",
        Delivered => "DELIVERED",
        DeliveryFailed => "DELIVERY_FAILED",
        Investigation => "INVESTIGATION",
        Lost => "LOST",
        ReturnedToSender => "RETURNED_TO_SENDER",
        /// Superseded by a reship. The replacement links back via `original_shipment_id`.
        Replaced => "REPLACED",
        Cancelled => "CANCELLED",
    }
}

db_enum! {
    AlertType {
        StuckShipment => "STUCK_SHIPMENT",
        LostShipment => "LOST_SHIPMENT",
        PickupFailed => "PICKUP_FAILED",
        TrackingStale => "TRACKING_STALE",
    }
}

db_enum! {
    AlertSeverity {
        Info => "INFO",
        High => "HIGH",
        Critical => "CRITICAL",
        Urgent => "URGENT",
    }
}

db_enum! {
    DisputeType {
        LostPackage => "LOST_PACKAGE",
        Damaged => "DAMAGED",
        NotReceived => "NOT_RECEIVED",
        Other => "OTHER",
    }
}

db_enum! {
    DisputeStatus {
        Open => "OPEN",
        Resolved => "RESOLVED",
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Shipment {
    pub id: i64,
    pub order_id: i64,
    pub provider_code: String,
    pub provider_name: String,
    pub service_code: String,
    pub service_name: String,
    pub cost: Rupiah,
    pub etd: String,
    pub weight_grams: i64,
    pub tracking_number: Option<String>,
    pub draft_order_id: Option<String>,
    pub status: ShipmentStatus,
    pub origin_postal_code: String,
    pub destination_postal_code: String,
    pub pickup_attempts: i64,
    pub delivery_attempts: i64,
    pub reship_count: i64,
    pub days_without_update: i64,
    pub requires_admin_action: bool,
    pub is_replacement: bool,
    pub tracking_stale: bool,
    pub original_shipment_id: Option<i64>,
    pub replaced_by_shipment_id: Option<i64>,
    pub pickup_deadline: Option<DateTime<Utc>>,
    pub investigation_opened_at: Option<DateTime<Utc>>,
    pub marked_lost_at: Option<DateTime<Utc>>,
    pub last_tracking_update: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// The most recent sign of life: the last tracking update, or failing that the hand-over, or failing that the
    /// moment the record was created.
    pub fn last_activity(&self) -> DateTime<Utc> {
        [self.last_tracking_update, self.shipped_at].into_iter().flatten().fold(self.created_at, |a, b| a.max(b))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewShipment {
    pub provider_code: String,
    pub provider_name: String,
    pub service_code: String,
    pub service_name: String,
    pub cost: Rupiah,
    pub etd: String,
    pub weight_grams: i64,
    pub origin_postal_code: String,
    pub destination_postal_code: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ShipmentAlert {
    pub id: i64,
    pub shipment_id: i64,
    pub order_id: i64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CourierFailure {
    pub id: i64,
    pub shipment_id: i64,
    pub provider_code: String,
    pub failure_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Dispute {
    pub id: i64,
    pub order_id: i64,
    pub shipment_id: Option<i64>,
    pub dispute_type: DisputeType,
    pub status: DisputeStatus,
    pub description: String,
    pub opened_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
