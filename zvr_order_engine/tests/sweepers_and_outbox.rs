use chrono::{Duration, Utc};
use zvr_order_engine::{
    db_types::{Actor, NotificationEvent, NotificationStatus, OrderStatusType, ShipmentStatus},
    test_utils::seeds::{backdate_delivery, backdate_order, product_stock},
    traits::OrderRef,
    OrderEngineError,
    OrderQueries,
};

use crate::support::TestShop;

mod support;

#[tokio::test]
async fn unpaid_orders_expire_and_release_their_stock() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-CAP-BEIGE", 75_000, 4).await;
    let stale = shop.checkout(&product, 2).await.order;
    let fresh = shop.checkout(&product, 1).await.order;
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 1);
    let now = Utc::now();
    backdate_order(shop.db.pool(), stale.id, now - Duration::hours(25)).await;

    let report = shop.flow.expire_orders(now, Duration::hours(24), 50).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.changed, 1);
    let stale = shop.order(stale.id).await;
    assert_eq!(stale.status, OrderStatusType::Expired);
    assert!(!stale.stock_reserved);
    assert_eq!(shop.active_shipment(stale.id).await.status, ShipmentStatus::Cancelled);
    assert_eq!(shop.order(fresh.id).await.status, OrderStatusType::Pending);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 3);

    let report = shop.flow.expire_orders(now, Duration::hours(24), 50).await.unwrap();
    assert!(report.is_idle());
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 3);
    shop.tear_down().await;
}

#[tokio::test]
async fn delivered_orders_complete_after_the_grace_period() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-CAP-BEIGE", 75_000, 4).await;
    let old = shop.delivered_order(&product, 1).await;
    let recent = shop.delivered_order(&product, 1).await;
    let now = Utc::now();
    backdate_delivery(shop.db.pool(), old.id, now - Duration::days(8)).await;

    let report = shop.flow.auto_complete(now, Duration::days(7), 50).await.unwrap();
    assert_eq!(report.changed, 1);
    let old = shop.order(old.id).await;
    assert_eq!(old.status, OrderStatusType::Completed);
    assert!(old.completed_at.is_some());
    assert_eq!(shop.order(recent.id).await.status, OrderStatusType::Delivered);
    shop.tear_down().await;
}

#[tokio::test]
async fn customers_can_only_cancel_their_own_unpaid_orders() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-CAP-BEIGE", 75_000, 4).await;
    let order = shop.checkout(&product, 2).await.order;
    let by_code = OrderRef::Code(order.order_code.clone());

    let err = shop.flow.cancel_order_by_customer(&by_code, Some(99), "Not mine", Utc::now()).await.unwrap_err();
    assert!(matches!(err, OrderEngineError::OrderNotFound(_)));
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Pending);

    let cancelled = shop.flow.cancel_order_by_customer(&by_code, Some(7), "Wrong size", Utc::now()).await.unwrap();
    assert_eq!(cancelled.status, OrderStatusType::Cancelled);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 4);

    let paid = shop.paid_order(&product, 1).await;
    let err = shop
        .flow
        .cancel_order_by_customer(&OrderRef::Id(paid.id), Some(7), "Changed my mind", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, OrderEngineError::InvalidTransition { .. }), "{err}");
    shop.tear_down().await;
}

#[tokio::test]
async fn outbox_delivers_once_and_keeps_failures_for_a_redrive() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-CAP-BEIGE", 75_000, 4).await;
    let order = shop.paid_order(&product, 1).await;

    let report = shop.notifications.publish_pending(Utc::now(), 50).await.unwrap();
    assert_eq!(report.changed, 1);
    let sent = shop.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event_kind, NotificationEvent::PaymentSuccess);
    assert_eq!(sent[0].recipient, "sari@example.com");
    assert!(shop.notifications.publish_pending(Utc::now(), 50).await.unwrap().is_idle());

    shop.transport.set_failing(true);
    shop.fulfillment.ship_order(order.id, None, Actor::admin("gudang@zvr.id"), Utc::now()).await.unwrap();
    let report = shop.notifications.publish_pending(Utc::now(), 50).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.changed, 0);
    let notifications = shop.db.fetch_notifications_for_order(order.id).await.unwrap();
    let shipped = notifications.iter().find(|n| n.event_kind == NotificationEvent::OrderShipped).unwrap();
    assert_eq!(shipped.status, NotificationStatus::Failed);
    assert!(shipped.error.is_some());
    assert!(shop.notifications.publish_pending(Utc::now(), 50).await.unwrap().is_idle());

    shop.transport.set_failing(false);
    let requeued = shop.notifications.redrive(shipped.id, Utc::now()).await.unwrap();
    assert_eq!(requeued.status, NotificationStatus::Pending);
    shop.notifications.publish_pending(Utc::now(), 50).await.unwrap();
    let sent = shop.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].event_kind, NotificationEvent::OrderShipped);
    assert!(sent[1].payload.get_str("resi").is_some());
    shop.tear_down().await;
}
