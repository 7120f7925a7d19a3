use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zvr_common::Rupiah;
use zvr_order_engine::{
    admin_objects::{AdminOutcome, ReconcileAction},
    db_types::{
        AuditLogEntry,
        Metadata,
        Order,
        OrderItem,
        Payment,
        Refund,
        RefundReason,
        RefundType,
        Shipment,
        StatusHistory,
    },
    helpers::SignatureInputs,
    payment_objects::WebhookNotification,
    traits::{PaymentOutcome, RefundCompletion, RefundLine, ReshipOutcome},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

//----------------------------------------------   Webhook   ----------------------------------------------------------
/// The notification body the payment gateway posts. Only the fields the engine needs are named; the whole body is
/// kept alongside.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayNotificationBody {
    pub order_id: String,
    pub status_code: String,
    /// Sent as a string (`"215000.00"`), but tolerated as a number.
    pub gross_amount: Value,
    pub signature_key: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_type: Option<String>,
}

impl GatewayNotificationBody {
    /// The exact text that was signed. Numbers are rendered back the way they arrived.
    pub fn gross_amount_text(&self) -> String {
        match &self.gross_amount {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_notification(self, raw: Value) -> WebhookNotification {
        let signature_inputs = SignatureInputs {
            order_id: self.order_id.clone(),
            status_code: self.status_code.clone(),
            gross_amount: self.gross_amount_text(),
        };
        WebhookNotification {
            external_id: self.order_id,
            transaction_status: self.transaction_status.trim().to_ascii_lowercase(),
            fraud_status: self.fraud_status.map(|s| s.trim().to_ascii_lowercase()),
            transaction_id: self.transaction_id,
            payment_type: self.payment_type,
            signature_inputs,
            signature: self.signature_key,
            raw: Metadata::from(raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcomeView {
    /// `applied`, `still_pending` or `already_final`.
    pub outcome: String,
    pub payment: Payment,
    pub order: Option<Order>,
}

impl From<PaymentOutcome> for PaymentOutcomeView {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Applied { payment, order, .. } => {
                Self { outcome: "applied".into(), payment, order: Some(order.into_order()) }
            },
            PaymentOutcome::StillPending(payment) => Self { outcome: "still_pending".into(), payment, order: None },
            PaymentOutcome::AlreadyFinal(payment) => Self { outcome: "already_final".into(), payment, order: None },
        }
    }
}

//----------------------------------------------   Customer   ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusView {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub latest_payment: Option<Payment>,
    pub shipments: Vec<Shipment>,
    pub refunds: Vec<Refund>,
    pub history: Vec<StatusHistory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelOrderParams {
    pub reason: Option<String>,
}

//----------------------------------------------   Admin   ------------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipOrderParams {
    /// The courier's airway bill, when the admin already has one.
    pub resi: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceCancelParams {
    pub reason: String,
    #[serde(default = "default_true")]
    pub restore_stock: bool,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceRefundParams {
    pub refund_type: RefundType,
    pub reason: RefundReason,
    pub reason_detail: Option<String>,
    pub amount: Option<Rupiah>,
    #[serde(default)]
    pub items: Vec<RefundLine>,
    #[serde(default)]
    pub skip_gateway: bool,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceReshipParams {
    pub reason: String,
    pub new_tracking_number: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilePaymentParams {
    pub action: ReconcileAction,
    pub reason: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundView {
    pub refund: Refund,
    pub order: Order,
    pub order_refunded: bool,
}

impl From<RefundCompletion> for RefundView {
    fn from(value: RefundCompletion) -> Self {
        Self { refund: value.refund, order: value.order, order_refunded: value.order_refunded }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshipView {
    pub original: Shipment,
    pub replacement: Shipment,
}

impl From<ReshipOutcome> for ReshipView {
    fn from(value: ReshipOutcome) -> Self {
        Self { original: value.original, replacement: value.replacement }
    }
}

/// What an admin force-action returns. `result` is empty when the idempotency key had been used before, in which
/// case `audit` is the row that was written the first time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminActionResponse<T> {
    pub replayed: bool,
    pub audit: AuditLogEntry,
    pub result: Option<T>,
}

impl<T> AdminActionResponse<T> {
    pub fn from_outcome<U: Into<T>>(outcome: AdminOutcome<U>) -> Self {
        match outcome {
            AdminOutcome::Applied { value, audit } => Self { replayed: false, audit, result: Some(value.into()) },
            AdminOutcome::Replayed(audit) => Self { replayed: true, audit, result: None },
        }
    }
}
