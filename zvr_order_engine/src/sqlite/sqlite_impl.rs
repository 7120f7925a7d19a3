//! `SqliteDatabase` is the SQLite backend of the order engine.
//!
//! It implements [`OrderEngineDatabase`] and [`OrderQueries`] on top of the plain functions in [`super::db`]. Every
//! mutating method is one transaction that starts by locking the order (see [`orders::lock_order`]). Any lookup that
//! is needed to find *which* order to lock happens on a pooled connection before the transaction opens.
use std::{fmt::Debug, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{
    audit,
    carts,
    db_url,
    history,
    is_unique_violation,
    monitor,
    new_pool,
    notifications,
    orders,
    payments,
    reconciliation,
    refund_ledger,
    refunds,
    shipments,
    stock,
    transitions,
    DEFAULT_BUSY_TIMEOUT,
};
use crate::{
    db_types::{
        Actor,
        AuditDraft,
        AuditLogEntry,
        CartLine,
        CourierFailure,
        Dispute,
        HistoryEntity,
        Metadata,
        NewOrder,
        NewPayment,
        Notification,
        Order,
        OrderItem,
        OrderStatusType,
        Payment,
        PaymentStatus,
        PaymentSyncLog,
        Product,
        ReconciliationLog,
        Refund,
        RefundItem,
        Shipment,
        ShipmentAlert,
        StatusHistory,
        StockMovement,
        SyncType,
    },
    helpers::{new_external_gateway_id, new_order_code, MAX_CODE_ATTEMPTS},
    traits::{
        ChargeUpdate,
        CreatePaymentResult,
        CreateRefundResult,
        NewReconciliationLog,
        OrderEngineDatabase,
        OrderEngineError,
        OrderQueries,
        OrderQueryFilter,
        OrderRef,
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

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, reading the URL from `DB_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        SqliteDatabase::new_with_options(url, max_connections, DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections, busy_timeout).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), OrderEngineError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        debug!("🗃️ Migrations complete for {}", self.url);
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn order_id_for_shipment(&self, shipment_id: i64) -> Result<i64, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        shipments::fetch_shipment(shipment_id, &mut conn)
            .await?
            .map(|s| s.order_id)
            .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("#{shipment_id}")))
    }

    async fn order_id_for_payment(&self, payment_id: i64) -> Result<i64, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment(payment_id, &mut conn)
            .await?
            .map(|p| p.order_id)
            .ok_or_else(|| OrderEngineError::PaymentNotFound(format!("#{payment_id}")))
    }

    async fn order_id_for_refund(&self, refund_id: i64) -> Result<i64, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refund(refund_id, &mut conn)
            .await?
            .map(|r| r.order_id)
            .ok_or(OrderEngineError::RefundNotFound(refund_id))
    }
}

impl OrderEngineDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch_cart_lines(&self, cart_id: i64) -> Result<Vec<CartLine>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(carts::fetch_cart_lines(cart_id, &mut conn).await?)
    }

    /// In a single atomic transaction,
    /// * inserts the order under a fresh order code (retrying on a clash),
    /// * inserts its items and reserves stock for every line whose product tracks stock,
    /// * inserts the `PENDING` shipment,
    /// * empties the cart, and
    /// * writes the first history rows for the order and the shipment.
    async fn insert_checkout_order(&self, order: NewOrder, now: DateTime<Utc>) -> Result<Order, OrderEngineError> {
        if order.items.is_empty() {
            return Err(OrderEngineError::CartEmpty(order.cart_id));
        }
        let mut tx = self.pool.begin().await?;
        let mut attempts = 0;
        let inserted = loop {
            let code = new_order_code(now);
            match orders::insert_order(&order, &code, now, &mut tx).await {
                Ok(o) => break o,
                Err(e) if is_unique_violation(&e) && attempts < MAX_CODE_ATTEMPTS => {
                    attempts += 1;
                    warn!("🗃️ Order code {code} is taken. Trying another ({attempts}/{MAX_CODE_ATTEMPTS})");
                },
                Err(e) => return Err(e.into()),
            }
        };
        let mut reserved_lines = 0;
        for item in &order.items {
            orders::insert_order_item(inserted.id, item, now, &mut tx).await?;
            let product = carts::fetch_product(item.product_id, &mut tx)
                .await?
                .ok_or_else(|| OrderEngineError::ValidationError(format!("Product #{} is gone", item.product_id)))?;
            if product.stock > 0 {
                stock::reserve(item.product_id, item.variant_id, inserted.id, item.quantity, now, &mut tx).await?;
                reserved_lines += 1;
            }
        }
        let inserted = if reserved_lines == 0 {
            orders::set_stock_reserved(inserted.id, false, now, &mut tx).await?
        } else {
            inserted
        };
        let shipment = shipments::insert_shipment(inserted.id, &order.shipment, now, &mut tx).await?;
        let cleared = carts::clear_cart(order.cart_id, &mut tx).await?;
        let actor = Actor::customer(order.user_id);
        let (reason, none) = (Some("Checkout"), Metadata::default());
        let (order_status, shipment_status) = (inserted.status.as_str(), shipment.status.as_str());
        let entity = HistoryEntity::Order;
        history::record(entity, inserted.id, None, order_status, &actor, reason, &none, now, &mut tx).await?;
        let entity = HistoryEntity::Shipment;
        history::record(entity, shipment.id, None, shipment_status, &actor, reason, &none, now, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Order {} saved with {} items ({reserved_lines} reserved), shipment #{}. {cleared} cart lines cleared",
            inserted.order_code,
            order.items.len(),
            shipment.id
        );
        Ok(inserted)
    }

    async fn annotate_order(
        &self,
        order_id: i64,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let mut merged = order.metadata;
        merged.merge(metadata);
        let order = orders::set_metadata(order_id, &merged, now, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn record_draft_order(
        &self,
        order_id: i64,
        draft_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Shipment, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let active = shipments::fetch_active_shipment(order.id, &mut tx)
            .await?
            .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("for order {}", order.order_code)))?;
        let shipment = shipments::lock_shipment(active.id, &mut tx).await?;
        let shipment = shipments::set_draft_order_id(shipment.id, draft_order_id, now, &mut tx).await?;
        tx.commit().await?;
        Ok(shipment)
    }

    async fn transition_order(
        &self,
        order_id: i64,
        transition: OrderTransition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let outcome = transitions::transition_locked_order(order, &transition, now, &mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn admin_transition_order(
        &self,
        order_id: i64,
        transition: OrderTransition,
        audit: AuditDraft,
        now: DateTime<Utc>,
    ) -> Result<(TransitionOutcome, AuditLogEntry), OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        // An admin action that changes nothing is refused rather than audited as a success
        if order.status == transition.to {
            return Err(OrderEngineError::invalid_order_transition(order.id, order.status, transition.to));
        }
        let before = audit::order_snapshot(order.id, &mut tx).await?;
        let outcome = transitions::transition_locked_order(order, &transition, now, &mut tx).await?;
        let after = audit::order_snapshot(order_id, &mut tx).await?;
        let entry = audit::insert_audit(&audit, &before, &after, None, now, &mut tx).await?;
        tx.commit().await?;
        Ok((outcome, entry))
    }

    async fn assign_resi(
        &self,
        order_id: i64,
        resi: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        if order.resi.as_deref() == Some(resi) {
            return Ok(order);
        }
        if order.status.resi_is_locked() {
            let current = order.resi.clone().unwrap_or_default();
            return Err(OrderEngineError::ResiLocked { order_id, resi: current });
        }
        if !matches!(order.status, OrderStatusType::Paid | OrderStatusType::Packing) {
            return Err(OrderEngineError::ValidationError(format!(
                "A resi can only be assigned to paid or packing orders. Order {} is {}",
                order.order_code, order.status
            )));
        }
        let order = transitions::write_resi(order_id, resi, now, &mut tx).await?;
        if let Some(active) = shipments::fetch_active_shipment(order_id, &mut tx).await? {
            let shipment = shipments::lock_shipment(active.id, &mut tx).await?;
            transitions::attach_tracking_number(shipment, resi, now, &mut tx).await?;
        }
        tx.commit().await?;
        info!("🚚️ Resi {resi} assigned to order {} by {actor}", order.order_code);
        Ok(order)
    }

    async fn schedule_pickup(
        &self,
        order_id: i64,
        deadline: DateTime<Utc>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Shipment, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let shipment = monitor::schedule_pickup_locked(&order, deadline, actor, now, &mut tx).await?;
        tx.commit().await?;
        Ok(shipment)
    }

    async fn begin_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<CreatePaymentResult, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(payment.order_id), &mut tx).await?;
        if order.status != OrderStatusType::Pending {
            return Err(OrderEngineError::OrderAlreadyFinal { order_id: order.id, status: order.status });
        }
        if let Some(existing) = payments::fetch_pending_payment(order.id, &mut tx).await? {
            debug!("💰️ Order {} already has pending payment #{}. Reusing it", order.order_code, existing.id);
            return Ok(CreatePaymentResult::Existing(existing));
        }
        let mut payment = payment;
        let mut attempts = 0;
        let inserted = loop {
            match payments::insert_payment(&payment, now, &mut tx).await {
                Ok(p) => break p,
                Err(e) if is_unique_violation(&e) && attempts < MAX_CODE_ATTEMPTS => {
                    attempts += 1;
                    warn!("💰️ Gateway id {} is taken. Generating another", payment.external_gateway_id);
                    payment.external_gateway_id = new_external_gateway_id(&order.order_code, now);
                },
                Err(e) => return Err(e.into()),
            }
        };
        tx.commit().await?;
        debug!(
            "💰️ Payment #{} ({}) created for order {}",
            inserted.id, inserted.external_gateway_id, order.order_code
        );
        Ok(CreatePaymentResult::Created(inserted))
    }

    async fn attach_charge(
        &self,
        payment_id: i64,
        update: ChargeUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        match payments::attach_charge(payment_id, &update, now, &mut conn).await {
            Ok(p) => Ok(p),
            Err(sqlx::Error::RowNotFound) => Err(OrderEngineError::PaymentNotFound(format!("#{payment_id}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_payment_attempt(
        &self,
        payment_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, OrderEngineError> {
        let order_id = self.order_id_for_payment(payment_id).await?;
        let mut tx = self.pool.begin().await?;
        orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let payment = payments::lock_payment(payment_id, &mut tx).await?;
        if payment.status.is_final() {
            return Err(OrderEngineError::PaymentAlreadyFinal { payment_id, status: payment.status });
        }
        let raw = Metadata::default();
        let failed = PaymentStatus::Failed;
        let updated = payments::set_status(payment_id, failed, None, &raw, Some(reason), now, &mut tx).await?;
        let actor = Actor::system("payments");
        let note = Some("Charge rejected by gateway");
        let (gw, sync, previous) = (Some(reason), SyncType::AutoResolve, payment.status);
        payments::insert_sync_log(payment_id, sync, previous, failed, gw, &actor, note, &raw, now, &mut tx).await?;
        tx.commit().await?;
        warn!("💰️ Payment #{payment_id} failed at the gateway: {reason}");
        Ok(updated)
    }

    async fn resolve_payment(
        &self,
        resolution: PaymentResolution,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let outcome = transitions::resolve_payment_locked(&resolution, now, &mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn admin_resolve_payment(
        &self,
        resolution: PaymentResolution,
        audit: AuditDraft,
        now: DateTime<Utc>,
    ) -> Result<(PaymentOutcome, AuditLogEntry), OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&resolution.order, &mut tx).await?;
        let before = audit::order_snapshot(order.id, &mut tx).await?;
        let outcome = transitions::resolve_payment_locked(&resolution, now, &mut tx).await?;
        let after = audit::order_snapshot(order.id, &mut tx).await?;
        let entry = audit::insert_audit(&audit, &before, &after, None, now, &mut tx).await?;
        tx.commit().await?;
        Ok((outcome, entry))
    }

    async fn fetch_expired_payments(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_expired_payments(now, limit, &mut conn).await?)
    }

    async fn fetch_stuck_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_stuck_payments(created_before, limit, &mut conn).await?)
    }

    async fn fetch_expirable_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_expirable_orders(created_before, limit, &mut conn).await?)
    }

    async fn fetch_completable_orders(
        &self,
        delivered_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_completable_orders(delivered_before, limit, &mut conn).await?)
    }

    async fn fetch_trackable_shipments(&self, limit: i64) -> Result<Vec<Shipment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_trackable_shipments(limit, &mut conn).await?)
    }

    async fn apply_tracking(
        &self,
        shipment_id: i64,
        observation: Option<TrackingObservation>,
        policy: ShipmentMonitorPolicy,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome, OrderEngineError> {
        let order_id = self.order_id_for_shipment(shipment_id).await?;
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let outcome = monitor::apply_tracking_locked(order, shipment_id, observation, policy, now, &mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn reship(
        &self,
        shipment_id: i64,
        request: ReshipRequest,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<ReshipOutcome, OrderEngineError> {
        let order_id = self.order_id_for_shipment(shipment_id).await?;
        let mut tx = self.pool.begin().await?;
        orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let before = match &audit {
            Some(_) => Some(audit::order_snapshot(order_id, &mut tx).await?),
            None => None,
        };
        let (original, replacement) = monitor::reship_locked(shipment_id, &request, now, &mut tx).await?;
        let entry = match (&audit, before) {
            (Some(draft), Some(before)) => {
                let after = audit::order_snapshot(order_id, &mut tx).await?;
                Some(audit::insert_audit(draft, &before, &after, None, now, &mut tx).await?)
            },
            _ => None,
        };
        tx.commit().await?;
        Ok(ReshipOutcome { original, replacement, audit: entry })
    }

    async fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_by: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ShipmentAlert, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        let alert = shipments::resolve_alert(alert_id, resolved_by.as_str(), now, &mut conn)
            .await?
            .ok_or(OrderEngineError::AlertNotFound(alert_id))?;
        info!("🚚️ Alert #{alert_id} on shipment #{} resolved by {resolved_by}", alert.shipment_id);
        Ok(alert)
    }

    async fn create_refund(
        &self,
        request: RefundRequest,
        via_gateway: bool,
        now: DateTime<Utc>,
    ) -> Result<CreateRefundResult, OrderEngineError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(request.order_id), &mut tx).await?;
        let result = refund_ledger::create_refund_locked(order, &request, via_gateway, now, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn complete_refund(
        &self,
        refund_id: i64,
        gateway_refund_id: &str,
        actor: &Actor,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<RefundCompletion, OrderEngineError> {
        let order_id = self.order_id_for_refund(refund_id).await?;
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let before = match &audit {
            Some(_) => Some(audit::order_snapshot(order_id, &mut tx).await?),
            None => None,
        };
        let (refund, order, order_refunded) =
            refund_ledger::complete_refund_locked(order, refund_id, gateway_refund_id, actor, now, &mut tx).await?;
        let entry = match (&audit, before) {
            (Some(draft), Some(mut before)) => {
                let mut after = audit::order_snapshot(order_id, &mut tx).await?;
                before.insert("refund_id", refund.id);
                after.insert("refund_id", refund.id).insert("refund_status", refund.status);
                Some(audit::insert_audit(draft, &before, &after, None, now, &mut tx).await?)
            },
            _ => None,
        };
        tx.commit().await?;
        Ok(RefundCompletion { refund, order, order_refunded, audit: entry })
    }

    async fn fail_refund(
        &self,
        refund_id: i64,
        reason: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Refund, OrderEngineError> {
        let order_id = self.order_id_for_refund(refund_id).await?;
        let mut tx = self.pool.begin().await?;
        orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let refund = refund_ledger::fail_refund_locked(refund_id, reason, actor, now, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn defer_refund(
        &self,
        refund_id: i64,
        note: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Refund, OrderEngineError> {
        let order_id = self.order_id_for_refund(refund_id).await?;
        let mut tx = self.pool.begin().await?;
        orders::lock_order(&OrderRef::Id(order_id), &mut tx).await?;
        let refund = refund_ledger::defer_refund_locked(refund_id, note, actor, now, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn record_failed_admin_action(
        &self,
        audit: AuditDraft,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, OrderEngineError> {
        // The action's own transaction has rolled back by now, so the failure is recorded in a fresh one
        let mut tx = self.pool.begin().await?;
        let state = audit::target_snapshot(&audit, &mut tx).await?;
        let entry = audit::insert_audit(&audit, &state, &state, Some(error), now, &mut tx).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn fetch_pending_notifications(&self, limit: i64) -> Result<Vec<Notification>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::fetch_pending(limit, &mut conn).await?)
    }

    async fn mark_notification_sent(&self, id: i64, now: DateTime<Utc>) -> Result<Notification, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        match notifications::mark_sent(id, now, &mut conn).await {
            Ok(Some(n)) => Ok(n),
            Ok(None) => notifications::fetch_notification(id, &mut conn)
                .await?
                .ok_or(OrderEngineError::NotificationNotFound(id)),
            Err(e) if is_unique_violation(&e) => {
                warn!("📬️ Notification #{id} duplicates one that was already sent. Marking it failed");
                notifications::mark_failed(id, "already sent", now, &mut conn)
                    .await?
                    .ok_or(OrderEngineError::NotificationNotFound(id))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_notification_failed(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Notification, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        match notifications::mark_failed(id, error, now, &mut conn).await? {
            Some(n) => Ok(n),
            None => notifications::fetch_notification(id, &mut conn)
                .await?
                .ok_or(OrderEngineError::NotificationNotFound(id)),
        }
    }

    async fn redrive_notification(&self, id: i64, now: DateTime<Utc>) -> Result<Notification, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(n) = notifications::redrive(id, now, &mut conn).await? {
            info!("📬️ Notification #{id} ({}) is queued again", n.event_kind);
            return Ok(n);
        }
        match notifications::fetch_notification(id, &mut conn).await? {
            Some(n) => Err(OrderEngineError::ValidationError(format!(
                "Only failed notifications can be re-driven. Notification #{id} is {}",
                n.status
            ))),
            None => Err(OrderEngineError::NotificationNotFound(id)),
        }
    }

    async fn reconciliation_figures(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationFigures, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(reconciliation::figures(from, to, now, &mut conn).await?)
    }

    async fn insert_reconciliation_log(
        &self,
        log: NewReconciliationLog,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationLog, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(reconciliation::insert_log(&log, now, &mut conn).await?)
    }
}

impl OrderQueries for SqliteDatabase {
    async fn fetch_order(&self, order: &OrderRef) -> Result<Option<Order>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order(order, &mut conn).await?)
    }

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_items(order_id, &mut conn).await?)
    }

    async fn search_orders(&self, filter: OrderQueryFilter) -> Result<Vec<Order>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::search_orders(filter, &mut conn).await?)
    }

    async fn fetch_product(&self, product_id: i64) -> Result<Option<Product>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(carts::fetch_product(product_id, &mut conn).await?)
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<Payment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment(payment_id, &mut conn).await?)
    }

    async fn fetch_latest_payment(&self, order_id: i64) -> Result<Option<Payment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_latest_payment(order_id, &mut conn).await?)
    }

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payments_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_payment_sync_logs(&self, payment_id: i64) -> Result<Vec<PaymentSyncLog>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_sync_logs(payment_id, &mut conn).await?)
    }

    async fn fetch_shipment(&self, shipment_id: i64) -> Result<Option<Shipment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_shipment(shipment_id, &mut conn).await?)
    }

    async fn fetch_shipments_for_order(&self, order_id: i64) -> Result<Vec<Shipment>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_shipments_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_alerts_for_shipment(&self, shipment_id: i64) -> Result<Vec<ShipmentAlert>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_alerts_for_shipment(shipment_id, &mut conn).await?)
    }

    async fn fetch_open_alerts(&self) -> Result<Vec<ShipmentAlert>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_open_alerts(&mut conn).await?)
    }

    async fn fetch_courier_failures(&self, shipment_id: i64) -> Result<Vec<CourierFailure>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_courier_failures(shipment_id, &mut conn).await?)
    }

    async fn fetch_disputes_for_order(&self, order_id: i64) -> Result<Vec<Dispute>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(shipments::fetch_disputes_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(refunds::fetch_refund(refund_id, &mut conn).await?)
    }

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(refunds::fetch_refunds_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_refund_items(&self, refund_id: i64) -> Result<Vec<RefundItem>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(refunds::fetch_refund_items(refund_id, &mut conn).await?)
    }

    async fn fetch_status_history(
        &self,
        entity: HistoryEntity,
        entity_id: i64,
    ) -> Result<Vec<StatusHistory>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(history::fetch_history(entity, entity_id, &mut conn).await?)
    }

    async fn fetch_stock_movements_for_order(&self, order_id: i64) -> Result<Vec<StockMovement>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(stock::fetch_movements_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_stock_movements_for_product(
        &self,
        product_id: i64,
    ) -> Result<Vec<StockMovement>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(stock::fetch_movements_for_product(product_id, &mut conn).await?)
    }

    async fn fetch_notifications_for_order(&self, order_id: i64) -> Result<Vec<Notification>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_audit_log_for_target(
        &self,
        target_type: &str,
        target_id: i64,
    ) -> Result<Vec<AuditLogEntry>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(audit::fetch_for_target(target_type, target_id, &mut conn).await?)
    }

    async fn fetch_audit_by_idempotency_key(&self, key: &str) -> Result<Option<AuditLogEntry>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(audit::fetch_by_idempotency_key(key, &mut conn).await?)
    }

    async fn fetch_reconciliation_logs(&self, date: NaiveDate) -> Result<Vec<ReconciliationLog>, OrderEngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(reconciliation::fetch_logs(date, &mut conn).await?)
    }
}
