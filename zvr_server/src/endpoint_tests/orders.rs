use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;
use zvr_order_engine::test_utils::seeds::product_stock;

use super::helpers::{as_customer, TestApp, CUSTOMER};

#[actix_web::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-DRESS-01", 350_000, 4).await;
    let order = app.checkout(&product, 2).await;
    let uri = format!("/orders/{}", order["order_code"].as_str().unwrap());

    let (status, body) = app.send_json(as_customer(TestRequest::get().uri(&uri), CUSTOMER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["quantity"], 2);
    assert!(body["latest_payment"].is_null());

    let (status, _) = app.send_json(as_customer(TestRequest::get().uri(&uri), 8)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let missing = as_customer(TestRequest::get().uri("/orders/ZVR-20240101-NOPE0000"), CUSTOMER);
    let (status, _) = app.send_json(missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn a_bad_user_header_is_refused() {
    let app = TestApp::new().await;
    let req = TestRequest::get().uri("/orders/ZVR-20240101-NOPE0000").insert_header(("X-User-Id", "seven"));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("X-User-Id"));
}

#[actix_web::test]
async fn customer_cancel_releases_stock() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-SKIRT-01", 180_000, 5).await;
    let order = app.checkout(&product, 2).await;
    assert_eq!(product_stock(app.db.pool(), product.id).await, 3);
    let uri = format!("/orders/{}/cancel", order["order_code"].as_str().unwrap());

    // Someone else's order is invisible, so it can't be cancelled either
    let (status, _) = app.send_json(as_customer(TestRequest::post().uri(&uri), 8)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = as_customer(TestRequest::post().uri(&uri), CUSTOMER).set_json(json!({ "reason": "Wrong size" }));
    let (status, body) = app.send_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(product_stock(app.db.pool(), product.id).await, 5);

    // Cancelling twice is harmless and does not put the stock back a second time
    let (status, body) = app.send_json(as_customer(TestRequest::post().uri(&uri), CUSTOMER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(product_stock(app.db.pool(), product.id).await, 5);
}

#[actix_web::test]
async fn paid_orders_are_not_cancelled_by_customers() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-SKIRT-02", 180_000, 5).await;
    let order = app.paid_order(&product).await;
    let uri = format!("/orders/{}/cancel", order["order_code"].as_str().unwrap());
    let (status, body) = app.send_json(as_customer(TestRequest::post().uri(&uri), CUSTOMER)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn checking_a_payment_asks_the_gateway() {
    let app = TestApp::new().await;
    let product = app.product("ZVR-BAG-01", 250_000, 2).await;
    let order = app.checkout(&product, 1).await;
    let code = order["order_code"].as_str().unwrap();
    let payment = app.start_payment(code).await;
    app.gateway.set_status(payment["external_gateway_id"].as_str().unwrap(), "settlement");

    let uri = format!("/orders/{code}/payment/check");
    let (status, body) = app.send_json(as_customer(TestRequest::post().uri(&uri), CUSTOMER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["order"]["status"], "PAID");
    assert_eq!(app.gateway.status_calls(), 1);
}
