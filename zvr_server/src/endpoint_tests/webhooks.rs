use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::helpers::{as_customer, webhook_body, webhook_request, TestApp, CUSTOMER};

#[actix_web::test]
async fn health() {
    let app = TestApp::new().await;
    let (status, body) = app.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn settlement_marks_the_order_paid() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-TEE-BLK-M", 200_000, 5).await;
    let order = app.checkout(&product, 1).await;
    assert_eq!(order["status"], "PENDING");
    let code = order["order_code"].as_str().unwrap();
    let payment = app.start_payment(code).await;
    assert_eq!(payment["status"], "PENDING");

    let (status, body) = app.send_json(webhook_request(&payment, "settlement")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["payment"]["status"], "PAID");
    assert_eq!(body["order"]["status"], "PAID");

    // The gateway retries. The second delivery changes nothing and is still acknowledged.
    let (status, body) = app.send_json(webhook_request(&payment, "settlement")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_final");
    assert!(body["order"].is_null());
}

#[actix_web::test]
async fn pending_notifications_leave_the_payment_open() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-CAP-01", 90_000, 3).await;
    let order = app.checkout(&product, 1).await;
    let payment = app.start_payment(order["order_code"].as_str().unwrap()).await;
    let (status, body) = app.send_json(webhook_request(&payment, "pending")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "still_pending");
}

#[actix_web::test]
async fn forged_notifications_are_forbidden() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-TEE-WHT-L", 200_000, 5).await;
    let order = app.checkout(&product, 1).await;
    let payment = app.start_payment(order["order_code"].as_str().unwrap()).await;
    let mut body = webhook_body(&payment, "settlement");
    body["gross_amount"] = json!("1000.00");

    let req = TestRequest::post().uri("/webhooks/payment").set_json(body);
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let code = order["order_code"].as_str().unwrap();
    let (status, body) = app.send_json(as_customer(TestRequest::get().uri(&format!("/orders/{code}")), CUSTOMER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "PENDING");
}

#[actix_web::test]
async fn malformed_notifications_are_bad_requests() {
    let app = TestApp::new().await;
    let req = TestRequest::post().uri("/webhooks/payment").set_json(json!({ "order_id": "ZVR-1" }));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing field"));
}
