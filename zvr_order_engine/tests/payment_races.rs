use chrono::{Duration, Utc};
use zvr_order_engine::{
    admin_objects::{AdminContext, ForceCancelRequest, ReconcileAction, ReconcilePaymentRequest},
    db_types::{HistoryEntity, NotificationEvent, OrderStatusType, PaymentStatus},
    test_utils::seeds::{backdate_payment, product_stock},
    traits::{OrderRef, PaymentOutcome},
    AdminActionError,
    ErrorKind,
    OrderQueries,
};

use crate::support::TestShop;

mod support;

fn admin() -> AdminContext {
    AdminContext { admin_id: 2, admin_email: "finance@zvr.id".into(), ip_address: None, user_agent: None }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_sweeper_and_settlement_race_has_one_winner() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-SCARF-RED", 120_000, 5).await;
    let order = shop.checkout(&product, 1).await.order;
    let payment = shop.pay(&order).await;
    let now = Utc::now();
    backdate_payment(shop.db.pool(), payment.id, now - Duration::hours(25), now - Duration::minutes(1)).await;

    let webhook = shop.webhook(&payment, "settlement");
    let (swept, notified) = tokio::join!(
        shop.payments.sweep_expired_payments(now, 10),
        shop.payments.handle_webhook(webhook, now)
    );
    let swept = swept.expect("Sweeper failed");
    let notified = notified.expect("Webhook failed");
    let webhook_won = matches!(notified, PaymentOutcome::Applied { .. });
    assert_ne!(webhook_won, swept.changed == 1, "Exactly one side may win. Sweep: {swept}");

    let order = shop.order(order.id).await;
    let payment = shop.latest_payment(order.id).await;
    let sync_logs = shop.db.fetch_payment_sync_logs(payment.id).await.unwrap();
    assert_eq!(sync_logs.len(), 1);
    let history = shop.db.fetch_status_history(HistoryEntity::Order, order.id).await.unwrap();
    assert_eq!(history.iter().filter(|h| h.from_status.as_deref() == Some("PENDING")).count(), 1);
    let paid_notices = shop
        .db
        .fetch_notifications_for_order(order.id)
        .await
        .unwrap()
        .iter()
        .filter(|n| n.event_kind == NotificationEvent::PaymentSuccess)
        .count();
    if webhook_won {
        assert_eq!(order.status, OrderStatusType::Paid);
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(product_stock(shop.db.pool(), product.id).await, 4);
        assert_eq!(paid_notices, 1);
    } else {
        assert!(matches!(notified, PaymentOutcome::AlreadyFinal(_)));
        assert_eq!(order.status, OrderStatusType::Expired);
        assert_eq!(payment.status, PaymentStatus::Expired);
        assert_eq!(product_stock(shop.db.pool(), product.id).await, 5);
        assert_eq!(paid_notices, 0);
    }
    shop.tear_down().await;
}

#[tokio::test]
async fn late_settlement_is_left_for_an_admin_to_reconcile() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-SCARF-RED", 120_000, 5).await;
    let order = shop.checkout(&product, 2).await.order;
    let payment = shop.pay(&order).await;
    let now = Utc::now();
    backdate_payment(shop.db.pool(), payment.id, now - Duration::hours(25), now - Duration::minutes(1)).await;

    let report = shop.payments.sweep_expired_payments(now, 10).await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Expired);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 5);

    let late = shop.payments.handle_webhook(shop.webhook(&payment, "settlement"), now).await.unwrap();
    assert!(matches!(late, PaymentOutcome::AlreadyFinal(_)));
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Expired);

    let request = ReconcilePaymentRequest {
        order: OrderRef::Id(order.id),
        action: ReconcileAction::MarkPaid,
        reason: "Settlement confirmed on the bank statement".into(),
        idempotency_key: Some(format!("reconcile-{}", order.id)),
    };
    let outcome = shop.admin.reconcile_payment(&admin(), request.clone(), now).await.unwrap();
    assert!(outcome.audit().success);
    assert_eq!(outcome.audit().state_before.get_str("order_status"), Some("EXPIRED"));
    let order_after = shop.order(order.id).await;
    assert_eq!(order_after.status, OrderStatusType::Paid);
    assert_eq!(shop.latest_payment(order.id).await.status, PaymentStatus::Paid);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 3);

    let replay = shop.admin.reconcile_payment(&admin(), request, now).await.unwrap();
    assert!(replay.is_replayed());
    assert_eq!(replay.audit().id, outcome.audit().id);
    shop.tear_down().await;
}

#[tokio::test]
async fn status_polling_settles_a_stuck_payment() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TOTE-CANVAS", 95_000, 10).await;
    let order = shop.checkout(&product, 1).await.order;
    let payment = shop.pay(&order).await;
    let now = Utc::now();

    let pending = shop.payments.check_status(&OrderRef::Id(order.id), now).await.unwrap();
    assert!(matches!(pending, PaymentOutcome::StillPending(_)));

    backdate_payment(shop.db.pool(), payment.id, now - Duration::hours(3), now + Duration::hours(21)).await;
    shop.gateway.set_status(&payment.external_gateway_id, "settlement");
    let report = shop.payments.auto_resolve_stuck(now, Duration::hours(2), 10).await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Paid);

    let again = shop.payments.check_status(&OrderRef::Id(order.id), now).await.unwrap();
    assert!(matches!(again, PaymentOutcome::AlreadyFinal(_)));
    shop.tear_down().await;
}

#[tokio::test]
async fn forged_notifications_are_refused() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TOTE-CANVAS", 95_000, 10).await;
    let order = shop.checkout(&product, 1).await.order;
    let payment = shop.pay(&order).await;
    let mut forged = shop.webhook(&payment, "settlement");
    forged.signature_inputs.gross_amount = "1.00".into();

    let err = shop.payments.handle_webhook(forged, Utc::now()).await.unwrap_err();
    assert!(matches!(err, zvr_order_engine::OrderEngineError::InvalidSignature));
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Pending);
    assert_eq!(shop.latest_payment(order.id).await.status, PaymentStatus::Pending);
    shop.tear_down().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn customer_and_admin_cancelling_together_cancel_once() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-SCARF-RED", 120_000, 5).await;
    let order = shop.checkout(&product, 2).await.order;
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 3);
    let request = ForceCancelRequest {
        order: OrderRef::Id(order.id),
        reason: "Duplicate order".into(),
        restore_stock: true,
        idempotency_key: None,
    };
    let by_customer = OrderRef::Id(order.id);
    let now = Utc::now();
    let admin_ctx = admin();
    let (customer, forced) = tokio::join!(
        shop.flow.cancel_order_by_customer(&by_customer, Some(7), "Ordered twice", now),
        shop.admin.force_cancel(&admin_ctx, request, now)
    );
    let customer = customer.expect("A customer cancel of a cancelled order is a no-op");
    assert_eq!(customer.status, OrderStatusType::Cancelled);
    if let Err(err) = &forced {
        assert!(matches!(err, AdminActionError::Rejected { kind: ErrorKind::Validation, .. }), "{err:?}");
    }

    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Cancelled);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 5);
    let history = shop.db.fetch_status_history(HistoryEntity::Order, order.id).await.unwrap();
    assert_eq!(history.iter().filter(|h| h.to_status == "CANCELLED").count(), 1);
    let audit = shop.db.fetch_audit_log_for_target("order", order.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].success, forced.is_ok());
    shop.tear_down().await;
}
