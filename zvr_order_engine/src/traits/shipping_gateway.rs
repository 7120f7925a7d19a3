use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zvr_common::Rupiah;

use crate::{db_types::AddressSnapshot, traits::GatewayError};

/// The shipping aggregator. Every call is best-effort from the engine's point of view: checkout, shipping and
/// tracking all have a fallback when this port fails.
#[async_trait]
pub trait ShippingGateway: Send + Sync {
    async fn get_rates(&self, request: RateRequest) -> Result<Vec<ShippingRate>, GatewayError>;

    async fn create_draft_order(&self, request: DraftOrderRequest) -> Result<DraftOrder, GatewayError>;

    async fn confirm_draft_order(&self, draft_id: &str) -> Result<ConfirmedDraft, GatewayError>;

    async fn track(&self, waybill_id: &str) -> Result<TrackingInfo, GatewayError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateItem {
    pub name: String,
    pub value: Rupiah,
    pub weight_grams: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRequest {
    pub origin_postal_code: String,
    pub destination_postal_code: String,
    pub couriers: Vec<String>,
    pub items: Vec<RateItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRate {
    pub courier_code: String,
    pub courier_name: String,
    pub service_code: String,
    pub service_name: String,
    pub price: Rupiah,
    pub duration: String,
    pub service_type: String,
}

impl ShippingRate {
    pub fn matches(&self, courier_code: &str, service_code: &str) -> bool {
        self.courier_code.eq_ignore_ascii_case(courier_code) && self.service_code.eq_ignore_ascii_case(service_code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftOrderRequest {
    pub order_code: String,
    pub origin_postal_code: String,
    pub destination: AddressSnapshot,
    pub items: Vec<RateItem>,
    pub courier_code: String,
    pub service_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftOrder {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedDraft {
    pub waybill_id: String,
    pub tracking_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub status: String,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingInfo {
    /// The courier's own status word, e.g. `picked`, `dropping_off`, `delivered`.
    pub status: String,
    pub last_update: Option<DateTime<Utc>>,
    pub history: Vec<TrackingEvent>,
}
