use chrono::{DateTime, Utc};
use thiserror::Error;
use zvr_common::Rupiah;

use crate::{
    db_types::{
        Actor,
        AuditDraft,
        AuditLogEntry,
        CartLine,
        HistoryEntity,
        Metadata,
        NewOrder,
        NewPayment,
        Notification,
        Order,
        OrderStatusType,
        Payment,
        PaymentStatus,
        ReconciliationLog,
        Refund,
        Shipment,
        ShipmentAlert,
    },
    traits::{
        ChargeUpdate,
        CreatePaymentResult,
        CreateRefundResult,
        GatewayError,
        NewReconciliationLog,
        OrderQueries,
        OrderTransition,
        PaymentOutcome,
        PaymentResolution,
        ReconciliationFigures,
        RefundCompletion,
        RefundRequest,
        ReshipOutcome,
        ReshipRequest,
        ShipmentMonitorPolicy,
        TrackingObservation,
        TrackingOutcome,
        TransitionOutcome,
    },
};

/// The broad class of an [`OrderEngineError`]. Callers decide on retries and HTTP status codes from this, never from
/// the individual variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    GatewayTransient,
    GatewayPermanent,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum OrderEngineError {
    #[error("Cannot move {entity} #{id} from {from} to {to}")]
    InvalidTransition { entity: HistoryEntity, id: i64, from: String, to: String },
    #[error("Insufficient stock for product #{product_id}. Requested {requested}, available {available}")]
    InsufficientStock { product_id: i64, requested: i64, available: i64 },
    #[error("Cart #{0} is empty")]
    CartEmpty(i64),
    #[error("Invalid shipping address. {0}")]
    InvalidAddress(String),
    #[error("Refund of {requested} exceeds the refundable balance of {balance}")]
    RefundAmountExceedsBalance { requested: Rupiah, balance: Rupiah },
    #[error("Invalid refund request. {0}")]
    InvalidRefundRequest(String),
    #[error("Invalid resi '{0}'. Use at least 8 characters from A-Z, a-z, 0-9 and '-'")]
    InvalidResiFormat(String),
    #[error("Payment method {0} is not supported")]
    UnsupportedPaymentMethod(String),
    #[error("Shipment #{id} cannot be reshipped. {reason}")]
    ReshipNotAllowed { id: i64, reason: String },
    #[error("{0}")]
    ValidationError(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Refund #{0} does not exist")]
    RefundNotFound(i64),
    #[error("Shipment {0} does not exist")]
    ShipmentNotFound(String),
    #[error("Notification #{0} does not exist")]
    NotificationNotFound(i64),
    #[error("Shipment alert #{0} does not exist")]
    AlertNotFound(i64),
    #[error("Payment #{payment_id} is already {status}")]
    PaymentAlreadyFinal { payment_id: i64, status: PaymentStatus },
    #[error("Order #{order_id} is already {status}")]
    OrderAlreadyFinal { order_id: i64, status: OrderStatusType },
    #[error("The resi of order #{order_id} is locked at {resi}")]
    ResiLocked { order_id: i64, resi: String },
    #[error("Idempotency key {0} was already used for a different request")]
    IdempotencyConflict(String),
    #[error("Webhook signature does not match")]
    InvalidSignature,
    #[error("Gateway temporarily unavailable. {0}")]
    GatewayTransient(GatewayError),
    #[error("Gateway refused the request. {0}")]
    GatewayPermanent(GatewayError),
    #[error("Refund #{refund_id} needs manual processing: the settlement window is not open yet")]
    ManualRefundRequired { refund_id: i64 },
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl OrderEngineError {
    pub fn kind(&self) -> ErrorKind {
        use OrderEngineError::*;
        match self {
            InvalidTransition { .. } |
            InsufficientStock { .. } |
            CartEmpty(_) |
            InvalidAddress(_) |
            RefundAmountExceedsBalance { .. } |
            InvalidRefundRequest(_) |
            InvalidResiFormat(_) |
            UnsupportedPaymentMethod(_) |
            ReshipNotAllowed { .. } |
            ValidationError(_) => ErrorKind::Validation,
            OrderNotFound(_) |
            PaymentNotFound(_) |
            RefundNotFound(_) |
            ShipmentNotFound(_) |
            NotificationNotFound(_) |
            AlertNotFound(_) => ErrorKind::NotFound,
            PaymentAlreadyFinal { .. } | OrderAlreadyFinal { .. } | ResiLocked { .. } | IdempotencyConflict(_) => {
                ErrorKind::Conflict
            },
            GatewayTransient(_) | ManualRefundRequired { .. } => ErrorKind::GatewayTransient,
            GatewayPermanent(_) | InvalidSignature => ErrorKind::GatewayPermanent,
            DatabaseError(_) | InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Errors that an admin force-action records as a failed audit row rather than bubbling up as a crash.
    pub fn is_rejection(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Internal)
    }

    pub fn invalid_order_transition(id: i64, from: OrderStatusType, to: OrderStatusType) -> Self {
        Self::InvalidTransition { entity: HistoryEntity::Order, id, from: from.to_string(), to: to.to_string() }
    }
}

impl From<sqlx::Error> for OrderEngineError {
    fn from(e: sqlx::Error) -> Self {
        OrderEngineError::DatabaseError(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OrderEngineError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        OrderEngineError::DatabaseError(format!("Migration failed. {e}"))
    }
}

impl From<GatewayError> for OrderEngineError {
    fn from(e: GatewayError) -> Self {
        if e.is_transient() {
            OrderEngineError::GatewayTransient(e)
        } else {
            OrderEngineError::GatewayPermanent(e)
        }
    }
}

/// The mutating half of the persistence port.
///
/// Each method is a single atomic unit of transition: it locks the order first (then payment, shipment and refunds,
/// in that order), checks the state machine, writes the new state together with its status history, stock
/// movements, outbox rows and audit row, and commits. If any step fails, nothing is written.
///
/// `now` is passed in rather than read from the clock so that sweepers and tests control time.
#[allow(async_fn_in_trait)]
pub trait OrderEngineDatabase: Clone + OrderQueries {
    /// The URL of the database
    fn url(&self) -> &str;

    //------------------------------------------   Checkout   ---------------------------------------------------------
    async fn fetch_cart_lines(&self, cart_id: i64) -> Result<Vec<CartLine>, OrderEngineError>;

    /// Inserts the order, its items, the stock reservations and the `PENDING` shipment, and empties the cart.
    ///
    /// Product stock is re-checked under the write lock. A line whose product has no stock tracked (stock 0) is not
    /// reserved.
    async fn insert_checkout_order(&self, order: NewOrder, now: DateTime<Utc>) -> Result<Order, OrderEngineError>;

    /// Merges `metadata` into the order's metadata. Used for fallback breadcrumbs written after the main transaction.
    async fn annotate_order(
        &self,
        order_id: i64,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError>;

    async fn record_draft_order(
        &self,
        order_id: i64,
        draft_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Shipment, OrderEngineError>;

    //------------------------------------------   Orders     ---------------------------------------------------------
    /// Moves the order to `transition.to`, applying the side effects of that transition.
    ///
    /// Re-applying the current status is a no-op that returns [`TransitionOutcome::Unchanged`].
    async fn transition_order(
        &self,
        order_id: i64,
        transition: OrderTransition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, OrderEngineError>;

    /// As [`Self::transition_order`], writing a successful audit row in the same transaction. An order that is
    /// already in the target state is an `InvalidTransition`.
    async fn admin_transition_order(
        &self,
        order_id: i64,
        transition: OrderTransition,
        audit: AuditDraft,
        now: DateTime<Utc>,
    ) -> Result<(TransitionOutcome, AuditLogEntry), OrderEngineError>;

    /// Sets the resi of an order that has not shipped yet.
    async fn assign_resi(
        &self,
        order_id: i64,
        resi: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError>;

    async fn schedule_pickup(
        &self,
        order_id: i64,
        deadline: DateTime<Utc>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Shipment, OrderEngineError>;

    //------------------------------------------   Payments   ---------------------------------------------------------
    /// Inserts a `PENDING` payment for a `PENDING` order, or returns the order's existing `PENDING` payment.
    async fn begin_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<CreatePaymentResult, OrderEngineError>;

    async fn attach_charge(
        &self,
        payment_id: i64,
        update: ChargeUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, OrderEngineError>;

    /// The gateway refused to create the charge. The payment is marked `FAILED`; the order stays `PENDING` so the
    /// customer can try another method.
    async fn fail_payment_attempt(
        &self,
        payment_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, OrderEngineError>;

    /// Applies a gateway verdict to a payment and cascades it to a `PENDING` order. Final payments are left alone
    /// unless the resolution is forced.
    async fn resolve_payment(
        &self,
        resolution: PaymentResolution,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, OrderEngineError>;

    async fn admin_resolve_payment(
        &self,
        resolution: PaymentResolution,
        audit: AuditDraft,
        now: DateTime<Utc>,
    ) -> Result<(PaymentOutcome, AuditLogEntry), OrderEngineError>;

    /// `PENDING` payments past their expiry on orders that are still `PENDING`.
    async fn fetch_expired_payments(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>, OrderEngineError>;

    async fn fetch_stuck_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, OrderEngineError>;

    async fn fetch_expirable_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderEngineError>;

    async fn fetch_completable_orders(
        &self,
        delivered_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderEngineError>;

    //------------------------------------------  Shipments   ---------------------------------------------------------
    async fn fetch_trackable_shipments(&self, limit: i64) -> Result<Vec<Shipment>, OrderEngineError>;

    /// Records a tracking lookup (or its absence, when the courier could not be reached) and runs the stale, stuck,
    /// lost and pickup-failure detectors.
    async fn apply_tracking(
        &self,
        shipment_id: i64,
        observation: Option<TrackingObservation>,
        policy: ShipmentMonitorPolicy,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome, OrderEngineError>;

    async fn reship(
        &self,
        shipment_id: i64,
        request: ReshipRequest,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<ReshipOutcome, OrderEngineError>;

    async fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_by: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ShipmentAlert, OrderEngineError>;

    //------------------------------------------   Refunds    ---------------------------------------------------------
    /// Creates a refund under the order lock, after the idempotency, state and balance checks. The refund is left in
    /// `PROCESSING` when `via_gateway` is set and the order has a paid payment, otherwise in `PENDING`.
    async fn create_refund(
        &self,
        request: RefundRequest,
        via_gateway: bool,
        now: DateTime<Utc>,
    ) -> Result<CreateRefundResult, OrderEngineError>;

    async fn complete_refund(
        &self,
        refund_id: i64,
        gateway_refund_id: &str,
        actor: &Actor,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<RefundCompletion, OrderEngineError>;

    async fn fail_refund(
        &self,
        refund_id: i64,
        reason: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Refund, OrderEngineError>;

    /// Moves a `PROCESSING` refund back to `PENDING` with a note, for refunds that must be settled by hand.
    async fn defer_refund(
        &self,
        refund_id: i64,
        note: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Refund, OrderEngineError>;

    //------------------------------------------    Admin     ---------------------------------------------------------
    /// Writes an unsuccessful audit row in a transaction of its own. The state maps are both the current state.
    async fn record_failed_admin_action(
        &self,
        audit: AuditDraft,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, OrderEngineError>;

    //------------------------------------------   Outbox     ---------------------------------------------------------
    async fn fetch_pending_notifications(&self, limit: i64) -> Result<Vec<Notification>, OrderEngineError>;

    async fn mark_notification_sent(&self, id: i64, now: DateTime<Utc>) -> Result<Notification, OrderEngineError>;

    async fn mark_notification_failed(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Notification, OrderEngineError>;

    /// Puts a `FAILED` notification back in the queue.
    async fn redrive_notification(&self, id: i64, now: DateTime<Utc>) -> Result<Notification, OrderEngineError>;

    //------------------------------------------ Reconciliation --------------------------------------------------------
    async fn reconciliation_figures(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationFigures, OrderEngineError>;

    async fn insert_reconciliation_log(
        &self,
        log: NewReconciliationLog,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationLog, OrderEngineError>;
}
