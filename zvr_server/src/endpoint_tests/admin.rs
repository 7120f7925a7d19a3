use actix_web::{http::StatusCode, test::TestRequest};
use chrono::Utc;
use serde_json::json;
use zvr_order_engine::test_utils::seeds::product_stock;

use super::helpers::{as_admin, TestApp};
use crate::helpers::IDEMPOTENCY_KEY_HEADER;

#[actix_web::test]
async fn admin_routes_need_the_proxy_headers() {
    let app = TestApp::new().await;
    let req = TestRequest::post().uri("/admin/orders/ZVR-20240101-NOPE0000/force-cancel").set_json(json!({
        "reason": "Fraud"
    }));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("X-Admin-Id"));
}

#[actix_web::test]
async fn force_cancel_is_idempotent() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-JACKET-01", 500_000, 3).await;
    let order = app.checkout(&product, 1).await;
    let uri = format!("/admin/orders/{}/force-cancel", order["order_code"].as_str().unwrap());
    let request = || {
        as_admin(TestRequest::post().uri(&uri))
            .insert_header((IDEMPOTENCY_KEY_HEADER, "cancel-jacket-1"))
            .set_json(json!({ "reason": "Customer called to cancel" }))
    };

    let (status, body) = app.send_json(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], false);
    assert_eq!(body["result"]["status"], "CANCELLED");
    assert_eq!(body["audit"]["success"], true);
    let audit_id = body["audit"]["id"].as_i64().unwrap();
    assert_eq!(product_stock(app.db.pool(), product.id).await, 3);

    let (status, body) = app.send_json(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], true);
    assert!(body["result"].is_null());
    assert_eq!(body["audit"]["id"].as_i64().unwrap(), audit_id);
}

#[actix_web::test]
async fn shipped_orders_cannot_be_force_cancelled() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-JEANS-01", 400_000, 3).await;
    let order = app.paid_order(&product).await;
    let code = order["order_code"].as_str().unwrap();

    let (status, body) = app.send_json(as_admin(TestRequest::post().uri(&format!("/admin/orders/{code}/ship")))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "SHIPPED");
    assert!(body["resi"].is_string());

    let req = as_admin(TestRequest::post().uri(&format!("/admin/orders/{code}/force-cancel")))
        .set_json(json!({ "reason": "Fraud" }));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["audit_id"].as_i64().is_some());
}

#[actix_web::test]
async fn manual_refunds_when_the_gateway_is_skipped() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-COAT-01", 600_000, 2).await;
    let order = app.paid_order(&product).await;
    let code = order["order_code"].as_str().unwrap();
    for action in ["ship", "deliver"] {
        let req = as_admin(TestRequest::post().uri(&format!("/admin/orders/{code}/{action}")));
        let (status, body) = app.send_json(req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    let req = as_admin(TestRequest::post().uri(&format!("/admin/orders/{code}/force-refund"))).set_json(json!({
        "refund_type": "FULL",
        "reason": "DAMAGED_ITEM",
        "reason_detail": "Torn seam",
        "skip_gateway": true,
        "idempotency_key": "refund-coat-1"
    }));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"]["refund"]["status"], "COMPLETED");
    assert_eq!(body["result"]["order_refunded"], true);
    assert_eq!(body["result"]["order"]["status"], "REFUNDED");
    assert!(app.gateway.refunds().is_empty());
}

#[actix_web::test]
async fn order_progression_by_admins() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-SCARF-01", 120_000, 2).await;
    let order = app.paid_order(&product).await;
    let code = order["order_code"].as_str().unwrap();
    let step = |action: &str| as_admin(TestRequest::post().uri(&format!("/admin/orders/{code}/{action}")));

    let (status, body) = app.send_json(step("pack")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PACKING");
    let (status, body) = app.send_json(step("ship").set_json(json!({ "resi": "JNE1234567890" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["resi"], "JNE1234567890");
    let (status, body) = app.send_json(step("deliver")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DELIVERED");
    let (status, body) = app.send_json(step("complete")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
}

#[actix_web::test]
async fn reconciliation_logs_by_date() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    let req = as_admin(TestRequest::get().uri(&format!("/admin/reconciliation/{today}")));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    let (status, _) = app.send(as_admin(TestRequest::get().uri("/admin/reconciliation/yesterday"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
