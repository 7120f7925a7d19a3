use std::str::FromStr;

use chrono::Utc;
use cucumber::{then, when};
use zvr_order_engine::{
    admin_objects::{AdminContext, ForceCancelRequest},
    db_types::{
        Actor,
        HistoryEntity,
        NotificationEvent,
        OrderStatusType,
        PaymentStatus,
        RefundReason,
        RefundStatus,
        RefundType,
        Rupiah,
        ShipmentStatus,
    },
    test_utils::seeds::product_stock,
    traits::{OrderRef, RefundRequest},
    AdminActionError,
    OrderEngineError,
    OrderQueries,
};

use crate::cucumber::OrderWorld;

fn admin() -> AdminContext {
    AdminContext {
        admin_id: 1,
        admin_email: "ops@zvr.id".into(),
        ip_address: Some("10.0.0.8".into()),
        user_agent: Some("cucumber".into()),
    }
}

//--------------------------------------   Checkout & payment  ---------------------------------------------------------
#[when(expr = "a customer checks out {int} of {string}")]
async fn checkout(world: &mut OrderWorld, quantity: i64, sku: String) {
    let product = world.product(&sku).clone();
    let result = world.shop().checkout(&product, quantity).await;
    world.order = Some(result.order);
}

#[when("the customer pays by bank transfer")]
async fn pay_by_bank_transfer(world: &mut OrderWorld) {
    let order = world.order().clone();
    let payment = world.shop().pay(&order).await;
    world.payment = Some(payment);
}

#[when(expr = "the gateway reports the payment as {string}")]
async fn gateway_reports(world: &mut OrderWorld, status: String) {
    let payment = world.payment.clone().expect("No payment was started");
    let notification = world.shop().webhook(&payment, &status);
    world.shop().payments.handle_webhook(notification.clone(), Utc::now()).await.expect("Webhook was refused");
    world.last_webhook = Some(notification);
    world.refresh_order().await;
}

#[when("the same notification arrives again")]
async fn redelivered_webhook(world: &mut OrderWorld) {
    let notification = world.last_webhook.clone().expect("No notification has been delivered");
    world.shop().payments.handle_webhook(notification, Utc::now()).await.expect("Redelivery was refused");
    world.refresh_order().await;
}

#[then(expr = "the order is {word}")]
async fn order_status_is(world: &mut OrderWorld, status: String) {
    let expected = OrderStatusType::from_str(&status).expect("Not an order status");
    let order = world.refresh_order().await;
    assert_eq!(order.status, expected);
}

#[then(expr = "the order total is {int}")]
async fn order_total_is(world: &mut OrderWorld, total: i64) {
    assert_eq!(world.order().total_amount, Rupiah::from(total));
    assert_eq!(world.order().computed_total(), Rupiah::from(total));
}

#[then(expr = "product {string} has {int} in stock")]
async fn stock_is(world: &mut OrderWorld, sku: String, stock: i64) {
    let product_id = world.product(&sku).id;
    assert_eq!(product_stock(world.shop().db.pool(), product_id).await, stock);
}

#[then(expr = "the latest payment is {word}")]
async fn latest_payment_is(world: &mut OrderWorld, status: String) {
    let expected = PaymentStatus::from_str(&status).expect("Not a payment status");
    let payment = world.shop().latest_payment(world.order().id).await;
    assert_eq!(payment.status, expected);
}

#[then(expr = "the shipment is {word}")]
async fn shipment_is(world: &mut OrderWorld, status: String) {
    let expected = ShipmentStatus::from_str(&status).expect("Not a shipment status");
    let shipment = world.shop().active_shipment(world.order().id).await;
    assert_eq!(shipment.status, expected);
}

#[then(expr = "the order history has {int} row(s) from {word} to {word}")]
async fn history_rows(world: &mut OrderWorld, count: usize, from: String, to: String) {
    let history = world
        .shop()
        .db
        .fetch_status_history(HistoryEntity::Order, world.order().id)
        .await
        .expect("Error fetching history");
    let matching =
        history.iter().filter(|h| h.from_status.as_deref() == Some(from.as_str()) && h.to_status == to).count();
    assert_eq!(matching, count, "History was {history:#?}");
}

#[then(expr = "{int} {word} notification(s) is/are queued")]
async fn notifications_queued(world: &mut OrderWorld, count: usize, event: String) {
    let expected = NotificationEvent::from_str(&event).expect("Not a notification event");
    let notifications = world
        .shop()
        .db
        .fetch_notifications_for_order(world.order().id)
        .await
        .expect("Error fetching notifications");
    let matching = notifications.iter().filter(|n| n.event_kind == expected).count();
    assert_eq!(matching, count);
    assert!(notifications.iter().all(|n| n.recipient == world.order().customer_email));
}

//--------------------------------------     Fulfillment       ---------------------------------------------------------
#[when("the order is shipped")]
async fn ship(world: &mut OrderWorld) {
    let id = world.order().id;
    let order = world
        .shop()
        .fulfillment
        .ship_order(id, None, Actor::admin("gudang@zvr.id"), Utc::now())
        .await
        .expect("Shipping failed");
    world.order = Some(order);
}

#[when("the courier delivers the order")]
async fn deliver(world: &mut OrderWorld) {
    let id = world.order().id;
    let order = world.shop().flow.mark_delivered(id, Actor::tracking(), Utc::now()).await.expect("Delivery failed");
    world.order = Some(order);
}

#[then("the order has a resi")]
async fn has_resi(world: &mut OrderWorld) {
    let order = world.refresh_order().await;
    let shipment = world.shop().active_shipment(order.id).await;
    assert!(order.resi.is_some());
    assert_eq!(order.resi, shipment.tracking_number);
}

//--------------------------------------       Refunds         ---------------------------------------------------------
#[when(expr = "a partial refund of {int} is requested")]
async fn partial_refund(world: &mut OrderWorld, amount: i64) {
    let request = RefundRequest {
        order_id: world.order().id,
        refund_type: RefundType::Partial,
        reason: RefundReason::DamagedItem,
        reason_detail: Some("Stitching came loose".into()),
        amount: Some(Rupiah::from(amount)),
        items: vec![],
        idempotency_key: None,
        requested_by: Actor::admin("cs@zvr.id"),
    };
    let result = world.shop().refunds.request_refund(request, Utc::now()).await;
    world.last_refund = Some(result);
    world.refresh_order().await;
}

#[then(expr = "the refund is {word}")]
async fn refund_is(world: &mut OrderWorld, status: String) {
    let expected = RefundStatus::from_str(&status).expect("Not a refund status");
    match world.last_refund.as_ref().expect("No refund was requested") {
        Ok(result) => assert_eq!(result.refund().status, expected),
        Err(e) => panic!("The refund was refused. {e}"),
    }
}

#[then(expr = "the refund is refused because only {int} is left to refund")]
async fn refund_exceeds_balance(world: &mut OrderWorld, left: i64) {
    match world.last_refund.as_ref().expect("No refund was requested") {
        Err(OrderEngineError::RefundAmountExceedsBalance { balance, .. }) => {
            assert_eq!(*balance, Rupiah::from(left))
        },
        other => panic!("Expected the refund to exceed the balance, got {other:?}"),
    }
}

#[then(expr = "{int} has been refunded on the order")]
async fn refunded_total(world: &mut OrderWorld, amount: i64) {
    let order = world.refresh_order().await;
    assert_eq!(order.refund_amount, Rupiah::from(amount));
}

//--------------------------------------    Admin actions      ---------------------------------------------------------
#[when(expr = "an admin force-cancels the order because {string}")]
async fn force_cancel(world: &mut OrderWorld, reason: String) {
    let order_id = world.order().id;
    let movements = world.shop().db.fetch_stock_movements_for_order(order_id).await.expect("Error reading stock");
    world.movements_before_admin_action = movements.len();
    let request = ForceCancelRequest {
        order: OrderRef::Id(order_id),
        reason,
        restore_stock: true,
        idempotency_key: Some(format!("cancel-{order_id}")),
    };
    let result = world.shop().admin.force_cancel(&admin(), request, Utc::now()).await;
    world.last_admin_action = Some(result);
}

#[then("the admin action is refused")]
async fn admin_action_refused(world: &mut OrderWorld) {
    match world.last_admin_action.as_ref().expect("No admin action was taken") {
        Err(AdminActionError::Rejected { audit_id, .. }) => assert!(*audit_id > 0),
        other => panic!("Expected a rejection, got {other:?}"),
    }
}

#[then("the admin action succeeded")]
async fn admin_action_succeeded(world: &mut OrderWorld) {
    match world.last_admin_action.as_ref().expect("No admin action was taken") {
        Ok(outcome) => assert!(outcome.audit().success),
        Err(e) => panic!("The admin action failed. {e}"),
    }
}

#[then(expr = "the audit log shows a {word} attempt on the order")]
async fn audit_entry(world: &mut OrderWorld, result: String) {
    let audit =
        world.shop().db.fetch_audit_log_for_target("order", world.order().id).await.expect("Error reading audit log");
    let entry = audit.last().expect("No audit entry");
    assert_eq!(entry.success, result == "successful");
    assert_eq!(entry.admin_email, "ops@zvr.id");
    assert!(entry.reason.is_some());
}

#[then("no stock moved because of the admin action")]
async fn stock_unchanged(world: &mut OrderWorld) {
    let movements =
        world.shop().db.fetch_stock_movements_for_order(world.order().id).await.expect("Error reading stock");
    assert_eq!(movements.len(), world.movements_before_admin_action);
}
