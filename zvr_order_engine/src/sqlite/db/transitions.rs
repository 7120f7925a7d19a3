//! The order and payment transition kernel.
//!
//! Every function here runs inside a transaction that has already taken the order lock (see
//! [`super::orders::lock_order`]). The functions check the state machine, write the new state, its status history,
//! the stock movements and the outbox rows, and leave the commit to the caller.
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use super::{history, is_unique_violation, notifications, orders, payments, shipments, stock};
use crate::{
    db_types::{
        Actor,
        HistoryEntity,
        Metadata,
        NewShipment,
        NotificationEvent,
        Order,
        OrderStatusType,
        Payment,
        PaymentStatus,
        Shipment,
        ShipmentStatus,
    },
    state_machine::{is_valid_order_transition, ShipmentActor},
    traits::{OrderEngineError, OrderTransition, PaymentOutcome, PaymentResolution, TransitionOutcome},
};

/// Moves a locked order to `transition.to` and applies the side effects of that move.
pub(crate) async fn transition_locked_order(
    order: Order,
    transition: &OrderTransition,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TransitionOutcome, OrderEngineError> {
    let from = order.status;
    let to = transition.to;
    if from == to {
        if let (Some(requested), Some(current)) = (&transition.resi, &order.resi) {
            if requested != current && from.resi_is_locked() {
                return Err(OrderEngineError::ResiLocked { order_id: order.id, resi: current.clone() });
            }
        }
        trace!("🔄️ Order {} is already {to}. Nothing to do", order.order_code);
        return Ok(TransitionOutcome::Unchanged(order));
    }
    let overriding = transition.admin_override && transition.actor.is_admin() && from.admin_override_allowed(to);
    if !is_valid_order_transition(from, to) && !overriding {
        return Err(OrderEngineError::invalid_order_transition(order.id, from, to));
    }
    let order_id = order.id;
    match to {
        OrderStatusType::Paid => on_paid(&order, overriding, &transition.actor, now, conn).await?,
        OrderStatusType::Shipped => on_shipped(&order, transition, now, conn).await?,
        OrderStatusType::Delivered => on_delivered(&order, &transition.actor, now, conn).await?,
        OrderStatusType::Cancelled | OrderStatusType::Expired | OrderStatusType::Failed => {
            on_annulled(&order, transition, now, conn).await?
        },
        OrderStatusType::Pending |
        OrderStatusType::Packing |
        OrderStatusType::Completed |
        OrderStatusType::Refunded => {},
    }
    if !transition.metadata.is_empty() {
        let mut metadata = order.metadata.clone();
        metadata.merge(transition.metadata.clone());
        orders::set_metadata(order_id, &metadata, now, conn).await?;
    }
    let updated = orders::update_status(order_id, to, now, conn).await?;
    history::record(
        HistoryEntity::Order,
        order_id,
        Some(from.as_str()),
        to.as_str(),
        &transition.actor,
        transition.reason.as_deref(),
        &transition.metadata,
        now,
        conn,
    )
    .await?;
    if let Some(event) = notification_event(to) {
        notifications::enqueue(&notifications::notification_for_order(&updated, event), now, conn).await?;
    }
    info!("🔄️ Order {} moved from {from} to {to} by {}", updated.order_code, transition.actor);
    Ok(TransitionOutcome::Changed { previous: from, order: updated })
}

/// Customer-visible events. Creation, packing, completion, expiry and failure are not announced.
fn notification_event(status: OrderStatusType) -> Option<NotificationEvent> {
    match status {
        OrderStatusType::Paid => Some(NotificationEvent::PaymentSuccess),
        OrderStatusType::Shipped => Some(NotificationEvent::OrderShipped),
        OrderStatusType::Delivered => Some(NotificationEvent::OrderDelivered),
        OrderStatusType::Cancelled => Some(NotificationEvent::OrderCancelled),
        OrderStatusType::Refunded => Some(NotificationEvent::OrderRefunded),
        _ => None,
    }
}

/// Moves a shipment and writes its history row. `actor` is checked against the shipment state machine.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn move_shipment(
    shipment: &Shipment,
    to: ShipmentStatus,
    by: ShipmentActor,
    actor: &Actor,
    reason: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, OrderEngineError> {
    if !by.permits(shipment.status, to) {
        return Err(OrderEngineError::InvalidTransition {
            entity: HistoryEntity::Shipment,
            id: shipment.id,
            from: shipment.status.to_string(),
            to: to.to_string(),
        });
    }
    let updated = shipments::update_status(shipment.id, to, now, conn).await?;
    history::record(
        HistoryEntity::Shipment,
        shipment.id,
        Some(shipment.status.as_str()),
        to.as_str(),
        actor,
        reason,
        &Metadata::default(),
        now,
        conn,
    )
    .await?;
    debug!("🚚️ Shipment #{} moved from {} to {to}", shipment.id, shipment.status);
    Ok(updated)
}

async fn on_paid(
    order: &Order,
    overriding: bool,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    if overriding && !order.stock_reserved {
        rereserve_stock(order, now, conn).await?;
    }
    let deducted = stock::deduct_for_order(order.id, now, conn).await?;
    trace!("🔄️ {} reservation lines of order {} became sales", deducted.len(), order.order_code);
    let shipment = match shipments::fetch_active_shipment(order.id, conn).await? {
        Some(s) if s.status == ShipmentStatus::Cancelled => Some(reopen_shipment(&s, actor, now, conn).await?),
        other => other,
    };
    match shipment {
        Some(s) if s.status == ShipmentStatus::Pending => {
            move_shipment(&s, ShipmentStatus::Processing, ShipmentActor::Cascade, actor, None, now, conn).await?;
        },
        Some(s) => debug!("🔄️ Shipment #{} of order {} is already {}", s.id, order.order_code, s.status),
        None => warn!("🔄️ Order {} was paid but has no shipment record", order.order_code),
    }
    Ok(())
}

/// A payment that settles after its order was annulled: take the stock off the shelf again, or refuse.
async fn rereserve_stock(
    order: &Order,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    let items = orders::fetch_order_items(order.id, conn).await?;
    let mut reserved_any = false;
    for item in items {
        if stock::was_reserved(order.id, item.product_id, conn).await? {
            stock::reserve(item.product_id, item.variant_id, order.id, item.quantity, now, conn).await?;
            reserved_any = true;
        }
    }
    if reserved_any {
        orders::set_stock_reserved(order.id, true, now, conn).await?;
    }
    info!("🔄️ Stock for revived order {} reserved again", order.order_code);
    Ok(())
}

/// A cancelled shipment is a sink, so a revived order gets a fresh `PENDING` copy.
async fn reopen_shipment(
    cancelled: &Shipment,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, OrderEngineError> {
    let copy = NewShipment {
        provider_code: cancelled.provider_code.clone(),
        provider_name: cancelled.provider_name.clone(),
        service_code: cancelled.service_code.clone(),
        service_name: cancelled.service_name.clone(),
        cost: cancelled.cost,
        etd: cancelled.etd.clone(),
        weight_grams: cancelled.weight_grams,
        origin_postal_code: cancelled.origin_postal_code.clone(),
        destination_postal_code: cancelled.destination_postal_code.clone(),
    };
    let shipment = shipments::insert_shipment(cancelled.order_id, &copy, now, conn).await?;
    let reason = format!("Reopened after shipment #{} was cancelled", cancelled.id);
    history::record(
        HistoryEntity::Shipment,
        shipment.id,
        None,
        shipment.status.as_str(),
        actor,
        Some(&reason),
        &Metadata::default(),
        now,
        conn,
    )
    .await?;
    Ok(shipment)
}

async fn on_shipped(
    order: &Order,
    transition: &OrderTransition,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    let resi = transition.resi.as_ref().or(order.resi.as_ref()).ok_or_else(|| {
        OrderEngineError::ValidationError(format!("Order {} cannot ship without a resi", order.order_code))
    })?;
    if order.resi.as_ref() != Some(resi) {
        write_resi(order.id, resi, now, conn).await?;
    }
    let shipment = shipments::fetch_active_shipment(order.id, conn)
        .await?
        .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("for order {}", order.order_code)))?;
    let shipment = attach_tracking_number(shipment, resi, now, conn).await?;
    move_shipment(&shipment, ShipmentStatus::Shipped, ShipmentActor::Cascade, &transition.actor, None, now, conn)
        .await?;
    Ok(())
}

/// Sets the resi, reporting a resi that belongs to another order as a validation error.
pub(crate) async fn write_resi(
    order_id: i64,
    resi: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, OrderEngineError> {
    match orders::set_resi(order_id, resi, now, conn).await {
        Ok(order) => Ok(order),
        Err(e) if is_unique_violation(&e) => {
            Err(OrderEngineError::ValidationError(format!("Resi {resi} is already assigned to another order")))
        },
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn attach_tracking_number(
    shipment: Shipment,
    tracking_number: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, OrderEngineError> {
    if shipment.tracking_number.as_deref() == Some(tracking_number) {
        return Ok(shipment);
    }
    match shipments::set_tracking_number(shipment.id, tracking_number, now, conn).await {
        Ok(s) => Ok(s),
        Err(e) if is_unique_violation(&e) => Err(OrderEngineError::ValidationError(format!(
            "Tracking number {tracking_number} is already used by another shipment"
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn on_delivered(
    order: &Order,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    let Some(shipment) = shipments::fetch_active_shipment(order.id, conn).await? else {
        warn!("🔄️ Order {} was delivered but has no shipment record", order.order_code);
        return Ok(());
    };
    if shipment.status == ShipmentStatus::Delivered {
        return Ok(());
    }
    // An admin marking the order delivered vouches for the parcel, wherever the tracking says it is
    let by = if actor.is_admin() { ShipmentActor::Admin } else { ShipmentActor::Tracking };
    if by.permits(shipment.status, ShipmentStatus::Delivered) {
        move_shipment(&shipment, ShipmentStatus::Delivered, by, actor, None, now, conn).await?;
    } else {
        warn!(
            "🔄️ Order {} delivered while shipment #{} is {}. Leaving the shipment alone",
            order.order_code, shipment.id, shipment.status
        );
    }
    Ok(())
}

async fn on_annulled(
    order: &Order,
    transition: &OrderTransition,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    if transition.release_stock && order.stock_reserved {
        let note = format!("Order {} {}", order.order_code, transition.to.as_str().to_lowercase());
        let released = stock::release_for_order(order.id, &note, now, conn).await?;
        orders::set_stock_reserved(order.id, false, now, conn).await?;
        info!("🔄️ Released {} stock lines of order {}", released.len(), order.order_code);
    }
    if let Some(shipment) = shipments::fetch_active_shipment(order.id, conn).await? {
        if ShipmentActor::Cascade.permits(shipment.status, ShipmentStatus::Cancelled) {
            let reason = format!("Order {}", transition.to);
            let actor = &transition.actor;
            move_shipment(&shipment, ShipmentStatus::Cancelled, ShipmentActor::Cascade, actor, Some(&reason), now, conn)
                .await?;
        }
    }
    Ok(())
}

//--------------------------------------       Payments        ---------------------------------------------------------
async fn find_payment(
    order: &Order,
    resolution: &PaymentResolution,
    conn: &mut SqliteConnection,
) -> Result<Payment, OrderEngineError> {
    let payment = match &resolution.external_id {
        Some(external_id) => payments::fetch_payment_by_external_id(external_id, conn)
            .await?
            .filter(|p| p.order_id == order.id)
            .ok_or_else(|| OrderEngineError::PaymentNotFound(external_id.clone()))?,
        None => payments::fetch_latest_payment(order.id, conn)
            .await?
            .ok_or_else(|| OrderEngineError::PaymentNotFound(format!("for order {}", order.order_code)))?,
    };
    payments::lock_payment(payment.id, conn).await
}

/// Applies a payment verdict, and cascades it to the order in the same transaction.
///
/// A payment that is already final is left alone, which is what makes duplicate webhooks and webhook/sweeper races
/// harmless: whoever takes the lock second finds the payment final and writes nothing.
pub(crate) async fn resolve_payment_locked(
    resolution: &PaymentResolution,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOutcome, OrderEngineError> {
    let order = orders::lock_order(&resolution.order, conn).await?;
    let payment = find_payment(&order, resolution, conn).await?;
    let previous = payment.status;
    if previous.is_final() && (!resolution.force || previous == resolution.status) {
        debug!(
            "💰️ Payment #{} is already {previous}. Ignoring {} via {}",
            payment.id, resolution.status, resolution.sync_type
        );
        return Ok(PaymentOutcome::AlreadyFinal(payment));
    }
    if resolution.status == PaymentStatus::Pending {
        let payment =
            payments::refresh_pending(payment.id, resolution.transaction_id.as_deref(), &resolution.raw, now, conn)
                .await?;
        return Ok(PaymentOutcome::StillPending(payment));
    }
    let failure_reason = match resolution.status {
        PaymentStatus::Paid => None,
        _ => resolution.note.as_deref().or(resolution.gateway_status.as_deref()),
    };
    let updated = payments::set_status(
        payment.id,
        resolution.status,
        resolution.transaction_id.as_deref(),
        &resolution.raw,
        failure_reason,
        now,
        conn,
    )
    .await?;
    payments::insert_sync_log(
        payment.id,
        resolution.sync_type,
        previous,
        resolution.status,
        resolution.gateway_status.as_deref(),
        &resolution.actor,
        resolution.note.as_deref(),
        &resolution.raw,
        now,
        conn,
    )
    .await?;
    info!(
        "💰️ Payment #{} of order {} moved from {previous} to {} via {}",
        payment.id, order.order_code, resolution.status, resolution.sync_type
    );
    let order_outcome = cascade_to_order(order, &updated, resolution, now, conn).await?;
    Ok(PaymentOutcome::Applied { previous, payment: updated, order: order_outcome })
}

/// The order only follows its payment while it is waiting for one. A late settlement on an annulled order is left
/// for reconciliation, unless an admin forces it through.
async fn cascade_to_order(
    order: Order,
    payment: &Payment,
    resolution: &PaymentResolution,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TransitionOutcome, OrderEngineError> {
    let target = match payment.status {
        PaymentStatus::Paid => OrderStatusType::Paid,
        PaymentStatus::Expired => OrderStatusType::Expired,
        PaymentStatus::Failed => OrderStatusType::Failed,
        // The customer may start another attempt; the order expiry sweeper deals with abandoned orders
        PaymentStatus::Cancelled | PaymentStatus::Pending => return Ok(TransitionOutcome::Unchanged(order)),
    };
    let revivable = resolution.force && order.status.admin_override_allowed(target);
    if order.status != OrderStatusType::Pending && !revivable {
        if target == OrderStatusType::Paid && !order.status.has_been_paid() {
            warn!(
                "💰️ Payment #{} settled but order {} is {}. Left for reconciliation",
                payment.id, order.order_code, order.status
            );
        }
        return Ok(TransitionOutcome::Unchanged(order));
    }
    let reason = format!("Payment #{} {} via {}", payment.id, payment.status, resolution.sync_type);
    let mut transition = OrderTransition::new(target, resolution.actor.clone()).with_reason(reason);
    if revivable {
        transition = transition.with_admin_override();
    }
    transition_locked_order(order, &transition, now, conn).await
}
