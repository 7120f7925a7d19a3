use chrono::{Duration, Utc};
use zvr_order_engine::{
    admin_objects::{AdminContext, ForceReshipRequest},
    db_types::{
        Actor,
        AlertSeverity,
        AlertType,
        DisputeType,
        HistoryEntity,
        OrderStatusType,
        ShipmentStatus,
    },
    traits::TrackingInfo,
    AdminActionError,
    ErrorKind,
    OrderEngineError,
    OrderQueries,
};

use crate::support::TestShop;

mod support;

fn admin() -> AdminContext {
    AdminContext {
        admin_id: 3,
        admin_email: "logistik@zvr.id".into(),
        ip_address: Some("10.0.0.21".into()),
        user_agent: Some("admin-panel".into()),
    }
}

#[tokio::test]
async fn silent_shipments_go_to_investigation_then_lost() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-JACKET-OLV-L", 450_000, 3).await;
    let shipped_at = Utc::now();
    let order = shop.shipped_order(&product, 1, shipped_at).await;
    assert_eq!(order.status, OrderStatusType::Shipped);
    shop.shipping.take_tracking_down();

    let report = shop.fulfillment.refresh_tracking(shipped_at + Duration::days(8), 50).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.changed, 1);
    let shipment = shop.active_shipment(order.id).await;
    assert_eq!(shipment.status, ShipmentStatus::Investigation);
    assert!(shipment.requires_admin_action);
    assert_eq!(shipment.days_without_update, 8);
    let alerts = shop.db.fetch_alerts_for_shipment(shipment.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StuckShipment);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    let history = shop.db.fetch_status_history(HistoryEntity::Shipment, shipment.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.to_status, "INVESTIGATION");
    assert_eq!(last.actor, "system:monitor");

    // Still silent, but not for long enough to be given up on
    shop.fulfillment.refresh_tracking(shipped_at + Duration::days(10), 50).await.unwrap();
    assert_eq!(shop.active_shipment(order.id).await.status, ShipmentStatus::Investigation);

    shop.fulfillment.refresh_tracking(shipped_at + Duration::days(15), 50).await.unwrap();
    let shipment = shop.active_shipment(order.id).await;
    assert_eq!(shipment.status, ShipmentStatus::Lost);
    assert!(shipment.marked_lost_at.is_some());
    let alerts = shop.db.fetch_alerts_for_shipment(shipment.id).await.unwrap();
    let lost = alerts.iter().find(|a| a.alert_type == AlertType::LostShipment).expect("No lost alert");
    assert_eq!(lost.severity, AlertSeverity::Urgent);
    let disputes = shop.db.fetch_disputes_for_order(order.id).await.unwrap();
    assert_eq!(disputes.len(), 1);
    assert_eq!(disputes[0].dispute_type, DisputeType::LostPackage);
    assert_eq!(disputes[0].shipment_id, Some(shipment.id));
    assert_eq!(shop.db.fetch_courier_failures(shipment.id).await.unwrap().len(), 1);
    // The order itself is not touched by the monitor
    assert_eq!(shop.order(order.id).await.status, OrderStatusType::Shipped);
    shop.tear_down().await;
}

#[tokio::test]
async fn courier_delivery_reaches_the_order() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-JEANS-IND-30", 389_000, 8).await;
    let now = Utc::now();
    let order = shop.shipped_order(&product, 1, now).await;
    let resi = order.resi.clone().expect("Shipped without a resi");
    let info = TrackingInfo { status: "delivered".into(), last_update: Some(now + Duration::days(2)), history: vec![] };
    shop.shipping.set_tracking(&resi, info);

    shop.fulfillment.refresh_tracking(now + Duration::days(2), 50).await.unwrap();
    let shipment = shop.active_shipment(order.id).await;
    assert_eq!(shipment.status, ShipmentStatus::Delivered);
    let order = shop.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Delivered);
    assert!(order.delivered_at.is_some());
    let history = shop.db.fetch_status_history(HistoryEntity::Shipment, shipment.id).await.unwrap();
    assert_eq!(history.last().unwrap().actor, "system:tracking");

    // Delivered shipments are no longer polled
    let report = shop.fulfillment.refresh_tracking(now + Duration::days(3), 50).await.unwrap();
    assert_eq!(report.examined, 0);
    shop.tear_down().await;
}

#[tokio::test]
async fn lost_shipments_are_reshipped_once_per_key() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-JACKET-OLV-L", 450_000, 3).await;
    let shipped_at = Utc::now();
    let order = shop.shipped_order(&product, 1, shipped_at).await;
    shop.shipping.take_tracking_down();
    shop.fulfillment.refresh_tracking(shipped_at + Duration::days(8), 50).await.unwrap();
    shop.fulfillment.refresh_tracking(shipped_at + Duration::days(15), 50).await.unwrap();
    let lost = shop.active_shipment(order.id).await;
    assert_eq!(lost.status, ShipmentStatus::Lost);

    let request = ForceReshipRequest {
        shipment_id: lost.id,
        reason: "Courier confirmed the parcel is lost".into(),
        new_tracking_number: Some("JNE-REPLACE-0001".into()),
        idempotency_key: Some("reship-lost-1".into()),
    };
    let now = shipped_at + Duration::days(15);
    let outcome = shop.admin.force_reship(&admin(), request.clone(), now).await.unwrap();
    let reship = outcome.value().expect("Reship was not applied");
    assert_eq!(reship.original.status, ShipmentStatus::Replaced);
    assert_eq!(reship.original.replaced_by_shipment_id, Some(reship.replacement.id));
    assert_eq!(reship.replacement.status, ShipmentStatus::Processing);
    assert_eq!(reship.replacement.original_shipment_id, Some(lost.id));
    assert_eq!(reship.replacement.reship_count, 1);
    assert!(reship.replacement.is_replacement);
    assert_eq!(reship.replacement.tracking_number.as_deref(), Some("JNE-REPLACE-0001"));
    assert_eq!(outcome.audit().target_type, "shipment");
    assert!(outcome.audit().success);
    assert_eq!(shop.active_shipment(order.id).await.id, reship.replacement.id);

    let replay = shop.admin.force_reship(&admin(), request, now).await.unwrap();
    assert!(replay.is_replayed());
    assert_eq!(shop.db.fetch_shipments_for_order(order.id).await.unwrap().len(), 2);
    shop.tear_down().await;
}

#[tokio::test]
async fn shipments_in_transit_cannot_be_reshipped() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-JACKET-OLV-L", 450_000, 3).await;
    let order = shop.shipped_order(&product, 1, Utc::now()).await;
    let shipment = shop.active_shipment(order.id).await;
    let request = ForceReshipRequest {
        shipment_id: shipment.id,
        reason: "Customer is impatient".into(),
        new_tracking_number: None,
        idempotency_key: None,
    };
    let err = shop.admin.force_reship(&admin(), request, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AdminActionError::Rejected { kind: ErrorKind::Validation, .. }), "{err:?}");
    let audit = shop.db.fetch_audit_log_for_target("shipment", shipment.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].success);
    assert!(audit[0].error_message.is_some());
    // Nothing changed, so the row shows the same state on both sides
    assert_eq!(audit[0].state_before.get_str("order_status"), Some("SHIPPED"));
    assert_eq!(audit[0].state_after.get_str("order_status"), Some("SHIPPED"));
    assert_eq!(shop.active_shipment(order.id).await.status, ShipmentStatus::Shipped);
    shop.tear_down().await;
}

#[tokio::test]
async fn missed_pickups_are_flagged() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-SANDAL-TAN-39", 210_000, 3).await;
    let order = shop.paid_order(&product, 1).await;
    let now = Utc::now();
    let admin = admin().actor();

    let past = shop.fulfillment.schedule_pickup(order.id, now - Duration::hours(1), &admin, now).await;
    assert!(past.is_err());

    let shipment = shop.fulfillment.schedule_pickup(order.id, now + Duration::hours(4), &admin, now).await.unwrap();
    assert_eq!(shipment.status, ShipmentStatus::PickupScheduled);
    shop.fulfillment.refresh_tracking(now + Duration::hours(5), 50).await.unwrap();
    let shipment = shop.active_shipment(order.id).await;
    assert_eq!(shipment.status, ShipmentStatus::PickupFailed);
    let alerts = shop.db.fetch_alerts_for_shipment(shipment.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::PickupFailed);

    let resolved = shop.fulfillment.resolve_alert(alerts[0].id, &admin, now + Duration::hours(6)).await.unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("admin:logistik@zvr.id"));
    assert!(shop.db.fetch_open_alerts().await.unwrap().is_empty());
    shop.tear_down().await;
}

/// Tries to move `order_id` onto `resi` both ways and checks that nothing was written.
async fn assert_resi_locked(shop: &TestShop, order_id: i64, locked: &str, resi: &str) {
    let history = shop.db.fetch_status_history(HistoryEntity::Order, order_id).await.unwrap().len();
    let admin = Actor::admin("gudang@zvr.id");
    let err = shop.fulfillment.assign_resi(order_id, resi, &admin, Utc::now()).await.unwrap_err();
    assert!(matches!(&err, OrderEngineError::ResiLocked { resi, .. } if resi == locked), "{err}");
    let err = shop.fulfillment.ship_order(order_id, Some(resi), admin, Utc::now()).await.unwrap_err();
    assert!(matches!(&err, OrderEngineError::ResiLocked { resi, .. } if resi == locked), "{err}");
    assert_eq!(shop.order(order_id).await.resi.as_deref(), Some(locked));
    assert_eq!(shop.active_shipment(order_id).await.tracking_number.as_deref(), Some(locked));
    assert_eq!(shop.db.fetch_status_history(HistoryEntity::Order, order_id).await.unwrap().len(), history);
}

#[tokio::test]
async fn resi_cannot_change_once_shipped() {
    let shop = TestShop::new().await;
    let product = shop.product("ZVR-KEMEJA-WHT-M", 275_000, 4).await;
    let order = shop.paid_order(&product, 1).await;
    let admin = Actor::admin("gudang@zvr.id");
    let order = shop.fulfillment.ship_order(order.id, Some("JNE1111111111"), admin.clone(), Utc::now()).await.unwrap();
    assert_eq!(order.status, OrderStatusType::Shipped);
    assert_eq!(order.resi.as_deref(), Some("JNE1111111111"));

    assert_resi_locked(&shop, order.id, "JNE1111111111", "JNE2222222222").await;
    // Repeating the original resi is fine
    let same = shop.fulfillment.ship_order(order.id, Some("JNE1111111111"), admin.clone(), Utc::now()).await.unwrap();
    assert_eq!(same.status, OrderStatusType::Shipped);
    let same = shop.fulfillment.assign_resi(order.id, "JNE1111111111", &admin, Utc::now()).await.unwrap();
    assert_eq!(same.resi.as_deref(), Some("JNE1111111111"));

    let delivered = shop.flow.mark_delivered(order.id, Actor::tracking(), Utc::now()).await.unwrap();
    assert_eq!(delivered.status, OrderStatusType::Delivered);
    assert_resi_locked(&shop, order.id, "JNE1111111111", "JNE2222222222").await;
    shop.tear_down().await;
}
