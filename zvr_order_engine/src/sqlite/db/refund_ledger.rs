//! Refund bookkeeping under the order lock: the balance check, completion side effects and the manual paths.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;
use zvr_common::Rupiah;

use super::{history, is_unique_violation, orders, payments, refunds, stock, transitions};
use crate::{
    db_types::{
        Actor,
        HistoryEntity,
        Metadata,
        NewRefund,
        Order,
        OrderRefundStatus,
        OrderStatusType,
        Payment,
        PaymentStatus,
        Refund,
        RefundStatus,
    },
    helpers::{new_refund_code, quote_refund, MAX_CODE_ATTEMPTS},
    traits::{CreateRefundResult, OrderEngineError, OrderTransition, RefundRequest},
};

/// The amount refunds are measured against: what was actually collected, or the order total for orders that were
/// settled outside the gateway.
fn refundable_base(order: &Order, payment: Option<&Payment>) -> Rupiah {
    payment.map(|p| p.amount).unwrap_or(order.total_amount)
}

/// The paid payment a refund goes back through. `None` when the order has no payment rows at all.
async fn refundable_payment(order: &Order, conn: &mut SqliteConnection) -> Result<Option<Payment>, OrderEngineError> {
    let all = payments::fetch_payments_for_order(order.id, conn).await?;
    if all.is_empty() {
        return Ok(None);
    }
    match all.into_iter().rev().find(|p| p.status == PaymentStatus::Paid) {
        Some(p) => Ok(Some(payments::lock_payment(p.id, conn).await?)),
        None => Err(OrderEngineError::InvalidRefundRequest(format!("Order {} has no paid payment", order.order_code))),
    }
}

async fn record_refund_history(
    refund: &Refund,
    from: Option<RefundStatus>,
    actor: &Actor,
    reason: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    history::record(
        HistoryEntity::Refund,
        refund.id,
        from.as_ref().map(RefundStatus::as_str),
        refund.status.as_str(),
        actor,
        reason,
        &Metadata::default(),
        now,
        conn,
    )
    .await?;
    Ok(())
}

fn invalid_refund_transition(refund: &Refund, to: RefundStatus) -> OrderEngineError {
    OrderEngineError::InvalidTransition {
        entity: HistoryEntity::Refund,
        id: refund.id,
        from: refund.status.to_string(),
        to: to.to_string(),
    }
}

/// Prices and stores a refund for a locked order.
pub(crate) async fn create_refund_locked(
    order: Order,
    request: &RefundRequest,
    via_gateway: bool,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CreateRefundResult, OrderEngineError> {
    if let Some(key) = &request.idempotency_key {
        if let Some(existing) = refunds::fetch_refund_by_idempotency_key(key, conn).await? {
            if existing.order_id != order.id {
                return Err(OrderEngineError::IdempotencyConflict(key.clone()));
            }
            debug!("↩️ Refund key {key} was already used for refund {}. Returning it", existing.refund_code);
            return Ok(CreateRefundResult::Existing(existing));
        }
    }
    if !order.status.is_refundable() {
        return Err(OrderEngineError::InvalidRefundRequest(format!(
            "Order {} is {}. Only delivered or completed orders can be refunded",
            order.order_code, order.status
        )));
    }
    let payment = refundable_payment(&order, conn).await?;
    let items = orders::fetch_order_items(order.id, conn).await?;
    let quote = quote_refund(&order, &items, request.refund_type, request.amount, &request.items)?;
    let balance = refundable_base(&order, payment.as_ref()) - refunds::committed_total(order.id, conn).await?;
    if quote.refund_amount > balance {
        return Err(OrderEngineError::RefundAmountExceedsBalance { requested: quote.refund_amount, balance });
    }
    let new_refund = NewRefund {
        order_id: order.id,
        payment_id: payment.as_ref().map(|p| p.id),
        refund_type: request.refund_type,
        reason: request.reason,
        reason_detail: request.reason_detail.clone(),
        original_amount: order.total_amount,
        refund_amount: quote.refund_amount,
        shipping_refund: quote.shipping_refund,
        items_refund: quote.items_refund,
        idempotency_key: request.idempotency_key.clone(),
        requested_by: request.requested_by.to_string(),
        items: quote.items,
    };
    let mut attempts = 0;
    let refund = loop {
        let code = new_refund_code(now);
        match refunds::insert_refund(&new_refund, &code, RefundStatus::Pending, now, conn).await {
            Ok(r) => break r,
            Err(e) if is_unique_violation(&e) && attempts < MAX_CODE_ATTEMPTS => {
                attempts += 1;
                warn!("↩️ Refund code {code} is taken. Trying another ({attempts}/{MAX_CODE_ATTEMPTS})");
            },
            Err(e) => return Err(e.into()),
        }
    };
    record_refund_history(&refund, None, &request.requested_by, request.reason_detail.as_deref(), now, conn).await?;
    // Without a paid payment there is nothing to send back through the gateway; the refund waits for a transfer
    let refund = if via_gateway && payment.is_some() {
        let processing = refunds::update_status(refund.id, RefundStatus::Processing, None, now, conn).await?;
        record_refund_history(&processing, Some(refund.status), &request.requested_by, None, now, conn).await?;
        processing
    } else {
        refund
    };
    info!(
        "↩️ {} refund {} of {} created for order {} ({})",
        refund.refund_type, refund.refund_code, refund.refund_amount, order.order_code, refund.status
    );
    Ok(CreateRefundResult::Created { refund, payment })
}

/// Completes a refund and applies its effects: order refund totals, stock for the refunded lines, and the move to
/// `REFUNDED` once the whole order has been given back.
pub(crate) async fn complete_refund_locked(
    order: Order,
    refund_id: i64,
    gateway_refund_id: &str,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(Refund, Order, bool), OrderEngineError> {
    let refund = refunds::lock_refund(refund_id, conn).await?;
    if refund.status == RefundStatus::Completed {
        debug!("↩️ Refund {} is already complete", refund.refund_code);
        return Ok((refund, order, false));
    }
    if !refund.status.can_transition_to(RefundStatus::Completed) {
        return Err(invalid_refund_transition(&refund, RefundStatus::Completed));
    }
    if !refund.status.holds_balance() {
        let payment = match refund.payment_id {
            Some(id) => payments::fetch_payment(id, conn).await?,
            None => None,
        };
        let balance = refundable_base(&order, payment.as_ref()) - refunds::committed_total(order.id, conn).await?;
        if refund.refund_amount > balance {
            return Err(OrderEngineError::RefundAmountExceedsBalance { requested: refund.refund_amount, balance });
        }
    }
    let completed = refunds::mark_completed(refund.id, gateway_refund_id, now, conn).await?;
    let reason = format!("Refund reference {gateway_refund_id}");
    record_refund_history(&completed, Some(refund.status), actor, Some(&reason), now, conn).await?;
    restock_refunded_items(&order, &completed, now, conn).await?;

    let refunded_total = refunds::completed_total(order.id, conn).await?;
    let fully_refunded = refunded_total >= order.total_amount;
    let refund_status = if fully_refunded { OrderRefundStatus::Full } else { OrderRefundStatus::Partial };
    let mut order = orders::set_refund_totals(order.id, refunded_total, refund_status, now, conn).await?;
    let mut order_refunded = false;
    if fully_refunded && order.status != OrderStatusType::Refunded {
        let transition = OrderTransition::new(OrderStatusType::Refunded, actor.clone())
            .with_reason(format!("Refund {} completed the order refund", completed.refund_code));
        let outcome = transitions::transition_locked_order(order, &transition, now, conn).await?;
        order_refunded = outcome.is_changed();
        order = outcome.into_order();
    }
    info!(
        "↩️ Refund {} of {} completed. Order {} has had {refunded_total} refunded",
        completed.refund_code, completed.refund_amount, order.order_code
    );
    Ok((completed, order, order_refunded))
}

/// Puts the refunded lines back on the shelf, once per refund item. Lines whose stock was never tracked by this
/// engine are skipped.
async fn restock_refunded_items(
    order: &Order,
    refund: &Refund,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    let order_items: HashMap<i64, _> =
        orders::fetch_order_items(order.id, conn).await?.into_iter().map(|i| (i.id, i)).collect();
    let note = format!("Refund {}", refund.refund_code);
    for item in refunds::fetch_refund_items(refund.id, conn).await? {
        let Some(line) = order_items.get(&item.order_item_id) else {
            warn!("↩️ Refund item #{} points at a line that is not on order {}", item.id, order.order_code);
            continue;
        };
        if !stock::was_reserved(order.id, line.product_id, conn).await? {
            continue;
        }
        if refunds::claim_item_restock(item.id, conn).await? {
            let (product, variant, qty) = (line.product_id, line.variant_id, item.quantity);
            stock::restock_for_refund(product, variant, order.id, refund.id, qty, &note, now, conn).await?;
        }
    }
    Ok(())
}

pub(crate) async fn fail_refund_locked(
    refund_id: i64,
    reason: &str,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, OrderEngineError> {
    move_refund(refund_id, RefundStatus::Failed, reason, actor, now, conn).await
}

pub(crate) async fn defer_refund_locked(
    refund_id: i64,
    note: &str,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, OrderEngineError> {
    move_refund(refund_id, RefundStatus::Pending, note, actor, now, conn).await
}

async fn move_refund(
    refund_id: i64,
    to: RefundStatus,
    note: &str,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, OrderEngineError> {
    let refund = refunds::lock_refund(refund_id, conn).await?;
    if refund.status == to {
        return Ok(refund);
    }
    if !refund.status.can_transition_to(to) {
        return Err(invalid_refund_transition(&refund, to));
    }
    let updated = refunds::update_status(refund.id, to, Some(note), now, conn).await?;
    record_refund_history(&updated, Some(refund.status), actor, Some(note), now, conn).await?;
    info!("↩️ Refund {} moved from {} to {to}: {note}", refund.refund_code, refund.status);
    Ok(updated)
}
