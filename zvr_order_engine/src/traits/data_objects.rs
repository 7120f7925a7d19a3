use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zvr_common::Rupiah;

use crate::db_types::{
    Actor,
    AuditLogEntry,
    Metadata,
    Order,
    OrderStatusType,
    Payment,
    PaymentStatus,
    Refund,
    RefundReason,
    RefundType,
    Shipment,
    ShipmentAlert,
    ShipmentStatus,
    SyncType,
};

/// Identifies an order either by its surrogate key or by its public order code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRef {
    Id(i64),
    Code(String),
}

impl Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderRef::Id(id) => write!(f, "#{id}"),
            OrderRef::Code(code) => f.write_str(code),
        }
    }
}

impl From<i64> for OrderRef {
    fn from(id: i64) -> Self {
        OrderRef::Id(id)
    }
}

impl From<&str> for OrderRef {
    fn from(code: &str) -> Self {
        OrderRef::Code(code.to_string())
    }
}

//--------------------------------------   Order transitions   ---------------------------------------------------------
/// A request to move an order to a new status, with the side effects that go with it.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub to: OrderStatusType,
    pub actor: Actor,
    pub reason: Option<String>,
    /// Required when moving to `SHIPPED`.
    pub resi: Option<String>,
    /// Put reserved stock back when moving to `CANCELLED`, `EXPIRED` or `FAILED`.
    pub release_stock: bool,
    /// Allows an admin to move an order out of a terminal state, where a recovery path exists.
    pub admin_override: bool,
    /// Breadcrumbs merged into the order metadata and copied onto the history row.
    pub metadata: Metadata,
}

impl OrderTransition {
    pub fn new(to: OrderStatusType, actor: Actor) -> Self {
        Self {
            to,
            actor,
            reason: None,
            resi: None,
            release_stock: true,
            admin_override: false,
            metadata: Metadata::default(),
        }
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_resi<S: Into<String>>(mut self, resi: S) -> Self {
        self.resi = Some(resi.into());
        self
    }

    pub fn keep_stock(mut self) -> Self {
        self.release_stock = false;
        self
    }

    pub fn with_admin_override(mut self) -> Self {
        self.admin_override = true;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The order was already in the requested state. Nothing was written.
    Unchanged(Order),
    Changed { previous: OrderStatusType, order: Order },
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Unchanged(o) => o,
            TransitionOutcome::Changed { order, .. } => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            TransitionOutcome::Unchanged(o) => o,
            TransitionOutcome::Changed { order, .. } => order,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, TransitionOutcome::Changed { .. })
    }
}

//--------------------------------------       Payments        ---------------------------------------------------------
#[derive(Debug, Clone)]
pub enum CreatePaymentResult {
    Created(Payment),
    /// The order already had a PENDING payment, which is returned untouched.
    Existing(Payment),
}

impl CreatePaymentResult {
    pub fn payment(&self) -> &Payment {
        match self {
            CreatePaymentResult::Created(p) | CreatePaymentResult::Existing(p) => p,
        }
    }
}

/// What the gateway told us when the charge was created.
#[derive(Debug, Clone, Default)]
pub struct ChargeUpdate {
    pub transaction_id: Option<String>,
    pub bank: Option<String>,
    pub va_number: Option<String>,
    pub qr_url: Option<String>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub raw: Metadata,
}

/// A payment status reported by the gateway (or decided by an admin or a sweeper), to be applied to the latest
/// payment row of an order.
#[derive(Debug, Clone)]
pub struct PaymentResolution {
    pub order: OrderRef,
    /// When given, the payment with this gateway id is resolved. Otherwise the latest payment of the order is.
    pub external_id: Option<String>,
    pub status: PaymentStatus,
    pub gateway_status: Option<String>,
    pub transaction_id: Option<String>,
    pub raw: Metadata,
    pub sync_type: SyncType,
    pub actor: Actor,
    pub note: Option<String>,
    /// Admin reconciliation may overwrite a payment that is already final.
    pub force: bool,
}

impl PaymentResolution {
    pub fn new(order: OrderRef, status: PaymentStatus, sync_type: SyncType, actor: Actor) -> Self {
        Self {
            order,
            external_id: None,
            status,
            gateway_status: None,
            transaction_id: None,
            raw: Metadata::default(),
            sync_type,
            actor,
            note: None,
            force: false,
        }
    }

    pub fn for_external_id<S: Into<String>>(mut self, external_id: S) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_gateway_status<S: Into<String>>(mut self, status: S) -> Self {
        self.gateway_status = Some(status.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: Option<String>) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_raw(mut self, raw: Metadata) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// The payment moved to a final status. `order` says whether the order followed.
    Applied { previous: PaymentStatus, payment: Payment, order: TransitionOutcome },
    /// The gateway still says pending; only the transaction id and raw response were refreshed.
    StillPending(Payment),
    /// The payment had already been resolved. Nothing was written.
    AlreadyFinal(Payment),
}

impl PaymentOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            PaymentOutcome::Applied { payment, .. } => payment,
            PaymentOutcome::StillPending(p) | PaymentOutcome::AlreadyFinal(p) => p,
        }
    }
}

//--------------------------------------       Refunds         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundLine {
    pub order_item_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: i64,
    pub refund_type: RefundType,
    pub reason: RefundReason,
    pub reason_detail: Option<String>,
    /// Only used by `PARTIAL` refunds.
    pub amount: Option<Rupiah>,
    /// Only used by `ITEM_ONLY` refunds.
    pub items: Vec<RefundLine>,
    pub idempotency_key: Option<String>,
    pub requested_by: Actor,
}

#[derive(Debug, Clone)]
pub enum CreateRefundResult {
    Created { refund: Refund, payment: Option<Payment> },
    /// A refund with the same idempotency key exists already.
    Existing(Refund),
}

#[derive(Debug, Clone)]
pub struct RefundCompletion {
    pub refund: Refund,
    pub order: Order,
    /// The order moved to `REFUNDED` as part of this completion.
    pub order_refunded: bool,
    pub audit: Option<AuditLogEntry>,
}

//--------------------------------------      Shipments        ---------------------------------------------------------
/// Thresholds for the stuck, lost and pickup detectors.
#[derive(Debug, Clone, Copy)]
pub struct ShipmentMonitorPolicy {
    pub stale_after_days: i64,
    pub investigate_after_days: i64,
    pub lost_after_days: i64,
    pub max_pickup_attempts: i64,
}

impl Default for ShipmentMonitorPolicy {
    fn default() -> Self {
        Self { stale_after_days: 3, investigate_after_days: 7, lost_after_days: 14, max_pickup_attempts: 3 }
    }
}

/// One successful courier tracking lookup.
#[derive(Debug, Clone)]
pub struct TrackingObservation {
    pub courier_status: String,
    /// The courier status mapped onto ours, if it means anything to us.
    pub status: Option<ShipmentStatus>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TrackingOutcome {
    pub shipment: Shipment,
    /// Alerts raised during this pass.
    pub alerts: Vec<ShipmentAlert>,
    /// Set when the courier reported delivery and the order followed.
    pub delivered_order: Option<Order>,
}

#[derive(Debug, Clone)]
pub struct ReshipRequest {
    pub reason: String,
    pub new_tracking_number: Option<String>,
    pub actor: Actor,
}

#[derive(Debug, Clone)]
pub struct ReshipOutcome {
    pub original: Shipment,
    pub replacement: Shipment,
    pub audit: Option<AuditLogEntry>,
}

//--------------------------------------      Queries          ---------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct OrderQueryFilter {
    pub statuses: Vec<OrderStatusType>,
    pub user_id: Option<i64>,
    pub customer_email: Option<String>,
    pub created_since: Option<DateTime<Utc>>,
    pub created_until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl OrderQueryFilter {
    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_customer_email<S: Into<String>>(mut self, email: S) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    pub fn created_until(mut self, until: DateTime<Utc>) -> Self {
        self.created_until = Some(until);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() &&
            self.user_id.is_none() &&
            self.customer_email.is_none() &&
            self.created_since.is_none() &&
            self.created_until.is_none()
    }
}

//--------------------------------------    Reconciliation     ---------------------------------------------------------
/// Raw figures for one reconciliation window, as read from the database.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationFigures {
    pub total_orders: i64,
    pub paid_orders: i64,
    pub total_payments: i64,
    pub paid_payments: i64,
    pub completed_refunds: i64,
    /// Sum of `total_amount` over orders that reached `PAID` or beyond.
    pub expected_revenue: Rupiah,
    /// Sum of `amount` over `PAID` payments.
    pub collected_revenue: Rupiah,
    pub refunded_amount: Rupiah,
    /// `PENDING` orders without any payment row, older than an hour.
    pub orphan_orders: Vec<Order>,
    /// `PAID` payments whose order was cancelled, expired or failed.
    pub orphan_payments: Vec<Payment>,
    /// Payments still `PENDING` two hours after creation.
    pub stuck_payments: Vec<Payment>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliationLog {
    pub reconciliation_date: chrono::NaiveDate,
    pub figures: ReconciliationFigures,
    pub auto_resolved: i64,
    pub unresolved: i64,
    pub details: Metadata,
}

impl NewReconciliationLog {
    pub fn revenue_variance(&self) -> Rupiah {
        self.figures.collected_revenue - self.figures.expected_revenue
    }

    /// Mismatches that a human still has to look at.
    pub fn has_mismatches(&self) -> bool {
        self.unresolved > 0 ||
            !self.figures.orphan_orders.is_empty() ||
            !self.figures.orphan_payments.is_empty() ||
            !self.revenue_variance().is_zero()
    }
}
