//! The outbound ports the server hands to the engine.
//!
//! The engine only knows the [`PaymentGateway`], [`ShippingGateway`] and [`NotificationTransport`] traits. Concrete
//! clients for a payment provider or shipping aggregator are plugged in here by whoever deploys the server. Until
//! they are, the gateways answer every call with [`GatewayError::Unavailable`]: charges and refunds fail cleanly,
//! checkout falls back to the flat shipping cost, and shipments get a locally generated resi.
use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use zvr_order_engine::{
    db_types::Notification,
    traits::{
        ChargeRequest,
        ChargeResponse,
        ConfirmedDraft,
        DraftOrder,
        DraftOrderRequest,
        GatewayRefundRequest,
        GatewayRefundResponse,
        GatewayStatus,
        RateRequest,
        ShippingRate,
        TrackingInfo,
        TransportError,
    },
    GatewayError,
    NotificationTransport,
    PaymentGateway,
    ShippingGateway,
};

#[derive(Clone)]
pub struct Gateways {
    pub payment: Arc<dyn PaymentGateway>,
    pub shipping: Arc<dyn ShippingGateway>,
    pub transport: Arc<dyn NotificationTransport>,
}

impl Gateways {
    pub fn new(
        payment: Arc<dyn PaymentGateway>,
        shipping: Arc<dyn ShippingGateway>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self { payment, shipping, transport }
    }

    /// No provider clients. Notifications are written to the log.
    pub fn unconfigured() -> Self {
        warn!("🪛️ No payment or shipping client is configured. Gateway calls will fail as unavailable.");
        Self::new(Arc::new(UnconfiguredPaymentGateway), Arc::new(UnconfiguredShippingGateway), Arc::new(LogTransport))
    }
}

fn unavailable(what: &str) -> GatewayError {
    GatewayError::Unavailable(format!("no {what} client is configured"))
}

pub struct UnconfiguredPaymentGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        warn!("💰️ Cannot charge {} for {}. No payment client", request.amount, request.external_id);
        Err(unavailable("payment"))
    }

    async fn get_status(&self, _external_id: &str) -> Result<GatewayStatus, GatewayError> {
        Err(unavailable("payment"))
    }

    async fn refund(
        &self,
        external_id: &str,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError> {
        warn!("↩️ Cannot refund {} on {external_id}. No payment client", request.amount);
        Err(unavailable("payment"))
    }
}

pub struct UnconfiguredShippingGateway;

#[async_trait]
impl ShippingGateway for UnconfiguredShippingGateway {
    async fn get_rates(&self, _request: RateRequest) -> Result<Vec<ShippingRate>, GatewayError> {
        Err(unavailable("shipping"))
    }

    async fn create_draft_order(&self, _request: DraftOrderRequest) -> Result<DraftOrder, GatewayError> {
        Err(unavailable("shipping"))
    }

    async fn confirm_draft_order(&self, _draft_id: &str) -> Result<ConfirmedDraft, GatewayError> {
        Err(unavailable("shipping"))
    }

    async fn track(&self, _waybill_id: &str) -> Result<TrackingInfo, GatewayError> {
        Err(unavailable("shipping"))
    }
}

/// Writes each notification to the log instead of sending it.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, notification: &Notification) -> Result<(), TransportError> {
        info!(
            "📬️ [{}] order #{} -> {}: {}",
            notification.event_kind,
            notification.order_id,
            notification.recipient,
            notification.payload.to_json_string()
        );
        Ok(())
    }
}
