use std::sync::Arc;

use actix_web::{http::StatusCode, test, test::TestRequest, web, App};
use chrono::Utc;
use log::debug;
use serde_json::{json, Value};
use zvr_common::Secret;
use zvr_order_engine::{
    checkout_objects::CheckoutConfig,
    db_types::Product,
    events::EventProducers,
    helpers::{payment_signature, SignatureInputs},
    test_utils::{
        mocks::{MockPaymentGateway, MockShippingGateway, RecordingTransport},
        prepare_env::{prepare_test_env, random_db_path},
        seeds::{seed_cart, seed_product, TEST_SERVER_KEY},
    },
    AdminApi,
    CheckoutApi,
    FulfillmentApi,
    NotificationApi,
    OrderFlowApi,
    PaymentApi,
    SqliteDatabase,
};

use crate::{
    config::ServerOptions,
    helpers::{ADMIN_EMAIL_HEADER, ADMIN_ID_HEADER, USER_ID_HEADER},
    server::configure_routes,
};

pub const CUSTOMER: i64 = 7;

/// A fresh database behind the full route table, with mock gateways.
pub struct TestApp {
    pub db: SqliteDatabase,
    pub gateway: Arc<MockPaymentGateway>,
    pub shipping: Arc<MockShippingGateway>,
    pub transport: Arc<RecordingTransport>,
    pub options: ServerOptions,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        Self {
            db,
            gateway: Arc::new(MockPaymentGateway::new()),
            shipping: Arc::new(MockShippingGateway::new()),
            transport: Arc::new(RecordingTransport::new()),
            options: ServerOptions::default(),
        }
    }

    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let producers = EventProducers::default();
        let db = &self.db;
        let key = Secret::new(TEST_SERVER_KEY.to_string());
        let app = App::new()
            .app_data(web::Data::new(self.options))
            .app_data(web::Data::new(OrderFlowApi::new(db.clone(), producers.clone())))
            .app_data(web::Data::new(PaymentApi::new(db.clone(), self.gateway.clone(), producers.clone(), key)))
            .app_data(web::Data::new(CheckoutApi::new(db.clone(), self.shipping.clone(), CheckoutConfig::default())))
            .app_data(web::Data::new(FulfillmentApi::new(db.clone(), self.shipping.clone(), producers.clone())))
            .app_data(web::Data::new(AdminApi::new(db.clone(), self.gateway.clone(), producers)))
            .app_data(web::Data::new(NotificationApi::new(db.clone(), self.transport.clone())))
            .configure(configure_routes::<SqliteDatabase>);
        let service = test::init_service(app).await;
        debug!("Making request");
        let res = test::call_service(&service, req.to_request()).await;
        let status = res.status();
        let body = test::read_body(res).await;
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn send_json(&self, req: TestRequest) -> (StatusCode, Value) {
        let (status, body) = self.send(req).await;
        let json = serde_json::from_str(&body).unwrap_or_else(|e| panic!("Not JSON ({e}): {body}"));
        (status, json)
    }

    pub async fn product(&self, sku: &str, price: i64, stock: i64) -> Product {
        seed_product(self.db.pool(), sku, price, stock, 300).await
    }

    pub async fn cart(&self, product: &Product, quantity: i64) -> i64 {
        seed_cart(self.db.pool(), Some(CUSTOMER), &[(product.id, quantity)]).await
    }

    /// Checks out through `/checkout` and returns the order JSON.
    pub async fn checkout(&self, product: &Product, quantity: i64) -> Value {
        let cart_id = self.cart(product, quantity).await;
        let request = zvr_order_engine::test_utils::seeds::checkout_request(cart_id, None);
        let req = as_customer(TestRequest::post().uri("/checkout"), CUSTOMER).set_json(request);
        let (status, body) = self.send_json(req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["order"].clone()
    }

    /// Opens a bank transfer charge for the order and returns the payment JSON.
    pub async fn start_payment(&self, order_code: &str) -> Value {
        let req = as_customer(TestRequest::post().uri(&format!("/orders/{order_code}/payment")), CUSTOMER)
            .set_json(json!({ "kind": "bank_transfer", "bank": "bca" }));
        let (status, body) = self.send_json(req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    /// Checkout, charge and a settlement notification.
    pub async fn paid_order(&self, product: &Product) -> Value {
        let order = self.checkout(product, 1).await;
        let code = order["order_code"].as_str().unwrap().to_string();
        let payment = self.start_payment(&code).await;
        let (status, body) = self.send_json(webhook_request(&payment, "settlement")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["order"]["status"], "PAID");
        body["order"].clone()
    }
}

pub fn as_customer(req: TestRequest, user_id: i64) -> TestRequest {
    req.insert_header((USER_ID_HEADER, user_id.to_string()))
}

pub fn as_admin(req: TestRequest) -> TestRequest {
    req.insert_header((ADMIN_ID_HEADER, "1")).insert_header((ADMIN_EMAIL_HEADER, "ops@zvr.id"))
}

/// The body the payment gateway would post for `payment`, signed with the test server key.
pub fn webhook_body(payment: &Value, transaction_status: &str) -> Value {
    let external_id = payment["external_gateway_id"].as_str().unwrap();
    let gross_amount = format!("{}.00", payment["amount"].as_i64().unwrap());
    let inputs =
        SignatureInputs { order_id: external_id.into(), status_code: "200".into(), gross_amount: gross_amount.clone() };
    json!({
        "order_id": external_id,
        "status_code": "200",
        "gross_amount": gross_amount,
        "signature_key": payment_signature(&inputs, TEST_SERVER_KEY),
        "transaction_status": transaction_status,
        "transaction_id": format!("TX-{external_id}"),
        "payment_type": "bank_transfer",
        "transaction_time": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

pub fn webhook_request(payment: &Value, transaction_status: &str) -> TestRequest {
    TestRequest::post().uri("/webhooks/payment").set_json(webhook_body(payment, transaction_status))
}
