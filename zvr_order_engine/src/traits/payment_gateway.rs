use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zvr_common::Rupiah;

use crate::{db_types::Metadata, traits::GatewayError};

/// The payment gateway, seen from the engine. Concrete HTTP clients live outside this crate.
///
/// Implementations must be idempotent with respect to `external_id`: the engine generates a fresh one per charge
/// attempt and may repeat status and refund calls.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError>;

    async fn get_status(&self, external_id: &str) -> Result<GatewayStatus, GatewayError>;

    async fn refund(&self, external_id: &str, request: GatewayRefundRequest)
        -> Result<GatewayRefundResponse, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// `bank_transfer`, `echannel`, `qris`, `gopay`, `shopeepay`...
    pub kind: String,
    pub bank: Option<String>,
}

impl PaymentMethod {
    pub fn bank_transfer(bank: &str) -> Self {
        Self { kind: "bank_transfer".to_string(), bank: Some(bank.to_string()) }
    }

    pub fn qris() -> Self {
        Self { kind: "qris".to_string(), bank: None }
    }

    /// Card charges need client-side tokenisation, which this engine does not do.
    pub fn is_supported(&self) -> bool {
        !matches!(self.kind.as_str(), "credit_card" | "card")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub external_id: String,
    pub amount: Rupiah,
    pub method: PaymentMethod,
    pub customer: CustomerDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub transaction_id: String,
    pub bank: Option<String>,
    pub va_number: Option<String>,
    pub qr_url: Option<String>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub raw: Metadata,
}

/// `GET /{external_id}/status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub transaction_status: String,
    pub transaction_id: Option<String>,
    pub fraud_status: Option<String>,
    pub payment_type: Option<String>,
    pub raw: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefundRequest {
    pub refund_key: String,
    pub amount: Rupiah,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefundResponse {
    pub chargeback_id: String,
    pub status: String,
}
