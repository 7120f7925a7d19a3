use chrono::{Duration, Utc};
use zvr_order_engine::{
    admin_objects::{AdminContext, ForceRefundRequest},
    db_types::{
        Actor,
        MovementType,
        OrderRefundStatus,
        OrderStatusType,
        ReconciliationStatus,
        RefundReason,
        RefundStatus,
        RefundType,
        Rupiah,
        StockMovement,
    },
    test_utils::seeds::{backdate_order, backdate_payment, product_stock},
    traits::{OrderRef, RefundCompletion, RefundLine, RefundRequest},
    GatewayError,
    OrderEngineError,
    OrderQueries,
    RefundResult,
    MANUAL_REFUND_REFERENCE,
};

use crate::support::TestShop;

mod support;

fn refund_request(order_id: i64, refund_type: RefundType) -> RefundRequest {
    RefundRequest {
        order_id,
        refund_type,
        reason: RefundReason::CustomerRequest,
        reason_detail: None,
        amount: None,
        items: vec![],
        idempotency_key: None,
        requested_by: Actor::admin("cs@zvr.id"),
    }
}

#[tokio::test]
async fn full_refund_goes_through_the_gateway_and_restocks() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.delivered_order(&product, 2).await;
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 8);

    let result = shop.refunds.request_refund(refund_request(order.id, RefundType::Full), Utc::now()).await.unwrap();
    let RefundResult::Completed(completion) = result else {
        panic!("Expected the refund to complete");
    };
    assert_eq!(completion.refund.refund_amount, Rupiah::from(215_000));
    assert_eq!(completion.refund.shipping_refund, Rupiah::from(15_000));
    assert_eq!(completion.refund.items_refund, Rupiah::from(200_000));
    assert_eq!(completion.refund.gateway_refund_id, Some(format!("CB-{}", completion.refund.refund_code)));
    assert!(completion.order_refunded);
    assert_eq!(completion.order.status, OrderStatusType::Refunded);
    assert_eq!(completion.order.refund_status, OrderRefundStatus::Full);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 10);
    let restocks = shop
        .db
        .fetch_stock_movements_for_order(order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.movement_type == MovementType::Adjustment)
        .count();
    assert_eq!(restocks, 1);
    let calls = shop.gateway.refunds();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.amount, Rupiah::from(215_000));

    let err = shop.refunds.request_refund(refund_request(order.id, RefundType::ShippingOnly), Utc::now()).await;
    assert!(err.is_err());
    shop.tear_down().await;
}

#[tokio::test]
async fn closed_settlement_window_parks_the_refund_for_manual_payout() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.delivered_order(&product, 2).await;
    shop.gateway.fail_refunds_with(GatewayError::SettlementWindowClosed);

    let mut request = refund_request(order.id, RefundType::ItemOnly);
    let item = shop.db.fetch_order_items(order.id).await.unwrap().remove(0);
    request.items = vec![RefundLine { order_item_id: item.id, quantity: 1 }];
    let err = shop.refunds.request_refund(request, Utc::now()).await.unwrap_err();
    let OrderEngineError::ManualRefundRequired { refund_id } = err else {
        panic!("Expected a manual refund, got {err}");
    };
    let parked = shop.db.fetch_refund(refund_id).await.unwrap().unwrap();
    assert_eq!(parked.status, RefundStatus::Pending);
    assert!(parked.note.is_some());
    assert_eq!(shop.order(order.id).await.refund_amount, Rupiah::from(0));

    let actor = Actor::admin("finance@zvr.id");
    let completion = shop.refunds.complete_manual_refund(refund_id, Some(" "), &actor, Utc::now()).await.unwrap();
    assert_eq!(completion.refund.status, RefundStatus::Completed);
    assert_eq!(completion.refund.gateway_refund_id.as_deref(), Some(MANUAL_REFUND_REFERENCE));
    assert_eq!(completion.order.refund_amount, Rupiah::from(100_000));
    assert_eq!(completion.order.refund_status, OrderRefundStatus::Partial);
    assert_eq!(completion.order.status, OrderStatusType::Delivered);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 9);

    // Completing it again is harmless
    let again = shop.refunds.complete_manual_refund(refund_id, None, &actor, Utc::now()).await.unwrap();
    assert_eq!(again.order.refund_amount, Rupiah::from(100_000));
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 9);
    shop.tear_down().await;
}

#[tokio::test]
async fn rejected_gateway_refunds_fail_and_free_the_balance() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.delivered_order(&product, 1).await;
    shop.gateway.fail_refunds_with(GatewayError::Rejected { code: "412".into(), message: "Refund denied".into() });

    let err = shop.refunds.request_refund(refund_request(order.id, RefundType::Full), Utc::now()).await.unwrap_err();
    assert!(err.is_rejection());
    let refunds = shop.db.fetch_refunds_for_order(order.id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, RefundStatus::Failed);

    let ctx = AdminContext { admin_id: 2, admin_email: "finance@zvr.id".into(), ip_address: None, user_agent: None };
    let request = ForceRefundRequest {
        order: OrderRef::Id(order.id),
        refund_type: RefundType::Full,
        reason: RefundReason::CustomerRequest,
        reason_detail: Some("Paid back by bank transfer".into()),
        amount: None,
        items: vec![],
        skip_gateway: true,
        idempotency_key: Some(format!("force-refund-{}", order.id)),
    };
    let outcome = shop.admin.force_refund(&ctx, request.clone(), Utc::now()).await.unwrap();
    let completion = outcome.value().expect("Refund was not applied");
    assert_eq!(completion.refund.gateway_refund_id.as_deref(), Some(MANUAL_REFUND_REFERENCE));
    assert_eq!(completion.order.status, OrderStatusType::Refunded);
    assert!(outcome.audit().success);
    assert_eq!(outcome.audit().state_after.get_str("order_status"), Some("REFUNDED"));

    let replay = shop.admin.force_refund(&ctx, request, Utc::now()).await.unwrap();
    assert!(replay.is_replayed());
    assert_eq!(shop.db.fetch_refunds_for_order(order.id).await.unwrap().len(), 2);
    shop.tear_down().await;
}

fn restocks(movements: &[StockMovement]) -> Vec<&StockMovement> {
    movements.iter().filter(|m| m.movement_type == MovementType::Adjustment).collect()
}

async fn restocks_for(shop: &TestShop, order_id: i64) -> usize {
    restocks(&shop.db.fetch_stock_movements_for_order(order_id).await.unwrap()).len()
}

async fn item_refund(shop: &TestShop, order_id: i64, item_id: i64) -> RefundCompletion {
    let mut request = refund_request(order_id, RefundType::ItemOnly);
    request.items = vec![RefundLine { order_item_id: item_id, quantity: 1 }];
    match shop.refunds.request_refund(request, Utc::now()).await.unwrap() {
        RefundResult::Completed(completion) => completion,
        other => panic!("Expected the refund to complete, got {other:?}"),
    }
}

#[tokio::test]
async fn item_refunds_put_each_unit_back_once() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.delivered_order(&product, 2).await;
    let item = shop.db.fetch_order_items(order.id).await.unwrap().remove(0);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 8);

    let first = item_refund(&shop, order.id, item.id).await;
    assert_eq!(first.refund.items_refund, Rupiah::from(100_000));
    assert_eq!(first.refund.shipping_refund, Rupiah::from(0));
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 9);
    let lines = shop.db.fetch_refund_items(first.refund.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].stock_restored);

    // Settling the same refund again must not touch the shelf
    let actor = Actor::admin("finance@zvr.id");
    shop.refunds.complete_manual_refund(first.refund.id, None, &actor, Utc::now()).await.unwrap();
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 9);

    let second = item_refund(&shop, order.id, item.id).await;
    assert_eq!(second.order.refund_amount, Rupiah::from(200_000));
    assert_eq!(second.order.refund_status, OrderRefundStatus::Partial);
    assert_eq!(second.order.status, OrderStatusType::Delivered);
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 10);

    let movements = shop.db.fetch_stock_movements_for_order(order.id).await.unwrap();
    let adjustments = restocks(&movements);
    assert_eq!(adjustments.len(), 2);
    assert!(adjustments.iter().all(|m| m.quantity == 1 && m.delta == 1));
    assert_eq!(adjustments[0].refund_id, Some(first.refund.id));
    assert_eq!(adjustments[1].refund_id, Some(second.refund.id));

    // Only the shipping is left, so a third unit cannot be paid back
    let mut request = refund_request(order.id, RefundType::ItemOnly);
    request.items = vec![RefundLine { order_item_id: item.id, quantity: 1 }];
    let err = shop.refunds.request_refund(request, Utc::now()).await.unwrap_err();
    assert!(matches!(err, OrderEngineError::RefundAmountExceedsBalance { .. }), "{err}");
    assert_eq!(product_stock(shop.db.pool(), product.id).await, 10);
    assert_eq!(restocks_for(&shop, order.id).await, 2);
    shop.tear_down().await;
}

#[tokio::test]
async fn shipping_refunds_leave_the_items_alone() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.delivered_order(&product, 2).await;
    assert!(order.shipping_cost.is_positive());
    let movements_before = shop.db.fetch_stock_movements_for_order(order.id).await.unwrap().len();

    let request = refund_request(order.id, RefundType::ShippingOnly);
    let RefundResult::Completed(completion) = shop.refunds.request_refund(request, Utc::now()).await.unwrap() else {
        panic!("Expected the refund to complete");
    };
    let refund = &completion.refund;
    assert_eq!(refund.refund_type, RefundType::ShippingOnly);
    assert_eq!(refund.refund_amount, order.shipping_cost);
    assert_eq!(refund.shipping_refund, order.shipping_cost);
    assert_eq!(refund.items_refund, Rupiah::from(0));
    assert_eq!(refund.original_amount, order.total_amount);
    assert!(shop.db.fetch_refund_items(refund.id).await.unwrap().is_empty());
    assert_eq!(completion.order.refund_amount, order.shipping_cost);
    assert_eq!(completion.order.refund_status, OrderRefundStatus::Partial);
    assert_eq!(completion.order.status, OrderStatusType::Delivered);
    assert!(!completion.order_refunded);

    assert_eq!(product_stock(shop.db.pool(), product.id).await, 8);
    assert_eq!(shop.db.fetch_stock_movements_for_order(order.id).await.unwrap().len(), movements_before);
    assert_eq!(restocks_for(&shop, order.id).await, 0);
    assert_eq!(shop.gateway.refunds()[0].1.amount, order.shipping_cost);
    shop.tear_down().await;
}

#[tokio::test]
async fn refunds_need_a_delivered_order() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 10).await;
    let order = shop.paid_order(&product, 1).await;
    let err = shop.refunds.request_refund(refund_request(order.id, RefundType::Full), Utc::now()).await.unwrap_err();
    assert!(matches!(err, OrderEngineError::InvalidRefundRequest(_)), "{err}");
    assert!(shop.db.fetch_refunds_for_order(order.id).await.unwrap().is_empty());
    assert!(shop.gateway.refunds().is_empty());
    shop.tear_down().await;
}

#[tokio::test]
async fn daily_reconciliation_resolves_stuck_payments_and_lists_orphans() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-TEE-BLK-M", 100_000, 20).await;
    let now = Utc::now();
    shop.paid_order(&product, 2).await;

    let stuck = shop.checkout(&product, 2).await.order;
    let payment = shop.pay(&stuck).await;
    backdate_payment(shop.db.pool(), payment.id, now - Duration::hours(3), now + Duration::hours(21)).await;
    shop.gateway.set_status(&payment.external_gateway_id, "settlement");

    let abandoned = shop.checkout(&product, 1).await.order;
    backdate_order(shop.db.pool(), abandoned.id, now - Duration::hours(2)).await;

    let log = shop.reconciliation.run_daily(now.date_naive(), now).await.unwrap();
    assert_eq!(log.reconciliation_date, now.date_naive());
    assert_eq!(log.paid_orders, 2);
    assert_eq!(log.paid_payments, 2);
    assert_eq!(log.expected_revenue, Rupiah::from(430_000));
    assert_eq!(log.collected_revenue, Rupiah::from(430_000));
    assert!(log.revenue_variance.is_zero());
    assert_eq!(log.auto_resolved, 1);
    assert_eq!(log.stuck_payments, 0);
    assert_eq!(log.unresolved, 0);
    assert_eq!(log.orphan_orders, 1);
    assert_eq!(log.status, ReconciliationStatus::MismatchesFound);
    let orphans = log.details.get_as::<Vec<serde_json::Value>>("orphan_orders").unwrap();
    assert_eq!(orphans[0]["order_id"], abandoned.id);
    assert_eq!(shop.order(stuck.id).await.status, OrderStatusType::Paid);

    let again = shop.reconciliation.run_daily(now.date_naive(), now).await.unwrap();
    assert_eq!(again.id, log.id);
    let rerun = shop.reconciliation.reconcile(now.date_naive(), now).await.unwrap();
    assert_ne!(rerun.id, log.id);
    assert_eq!(rerun.auto_resolved, 0);
    assert_eq!(shop.db.fetch_reconciliation_logs(now.date_naive()).await.unwrap().len(), 2);
    shop.tear_down().await;
}
