//! A complete engine wired to mock gateways over a throwaway database.
#![allow(dead_code)]
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use zvr_common::Secret;
use zvr_order_engine::{
    checkout_objects::{CheckoutConfig, CheckoutResult},
    db_types::{Actor, Order, Payment, Product, Shipment},
    events::EventProducers,
    payment_objects::WebhookNotification,
    sweep_objects::RetryPolicy,
    test_utils::{
        mocks::{MockPaymentGateway, MockShippingGateway, RecordingTransport},
        prepare_env::{prepare_test_env, random_db_path},
        seeds::{checkout_request, seed_cart, seed_product, signed_webhook, TEST_SERVER_KEY},
    },
    traits::{OrderRef, PaymentMethod},
    AdminApi,
    CheckoutApi,
    FulfillmentApi,
    NotificationApi,
    OrderEngineDatabase,
    OrderFlowApi,
    OrderQueries,
    PaymentApi,
    ReconciliationApi,
    RefundApi,
    SqliteDatabase,
};

pub struct TestShop {
    pub db: SqliteDatabase,
    pub gateway: Arc<MockPaymentGateway>,
    pub shipping: Arc<MockShippingGateway>,
    pub transport: Arc<RecordingTransport>,
    pub checkout: CheckoutApi<SqliteDatabase>,
    pub payments: PaymentApi<SqliteDatabase>,
    pub flow: OrderFlowApi<SqliteDatabase>,
    pub fulfillment: FulfillmentApi<SqliteDatabase>,
    pub refunds: RefundApi<SqliteDatabase>,
    pub admin: AdminApi<SqliteDatabase>,
    pub notifications: NotificationApi<SqliteDatabase>,
    pub reconciliation: ReconciliationApi<SqliteDatabase>,
}

impl std::fmt::Debug for TestShop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestShop({})", self.db.url())
    }
}

impl TestShop {
    pub async fn new() -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        let gateway = Arc::new(MockPaymentGateway::new());
        let shipping = Arc::new(MockShippingGateway::new());
        let transport = Arc::new(RecordingTransport::new());
        let producers = EventProducers::default();
        let payments = Self::payment_api(&db, &gateway, &producers);
        Self {
            checkout: CheckoutApi::new(db.clone(), shipping.clone(), CheckoutConfig::default()),
            flow: OrderFlowApi::new(db.clone(), producers.clone()),
            fulfillment: FulfillmentApi::new(db.clone(), shipping.clone(), producers.clone()),
            refunds: RefundApi::new(db.clone(), gateway.clone(), producers.clone()),
            admin: AdminApi::new(db.clone(), gateway.clone(), producers.clone()),
            notifications: NotificationApi::new(db.clone(), transport.clone()),
            reconciliation: ReconciliationApi::new(db.clone(), Self::payment_api(&db, &gateway, &producers)),
            payments,
            db,
            gateway,
            shipping,
            transport,
        }
    }

    fn payment_api(
        db: &SqliteDatabase,
        gateway: &Arc<MockPaymentGateway>,
        producers: &EventProducers,
    ) -> PaymentApi<SqliteDatabase> {
        PaymentApi::new(db.clone(), gateway.clone(), producers.clone(), Secret::new(TEST_SERVER_KEY.to_string()))
            .with_provider("midtrans")
            .with_retry_policy(RetryPolicy::no_delay(2))
    }

    pub async fn product(&self, sku: &str, price: i64, stock: i64) -> Product {
        seed_product(self.db.pool(), sku, price, stock, 300).await
    }

    /// Checks out `quantity` of `product` for a logged-in customer.
    pub async fn checkout(&self, product: &Product, quantity: i64) -> CheckoutResult {
        let cart_id = seed_cart(self.db.pool(), Some(7), &[(product.id, quantity)]).await;
        self.checkout.checkout(checkout_request(cart_id, Some(7)), Utc::now()).await.expect("Checkout failed")
    }

    pub async fn pay(&self, order: &Order) -> Payment {
        let method = PaymentMethod::bank_transfer("bca");
        self.payments.create_charge(&OrderRef::Id(order.id), method, Utc::now()).await.expect("Charge failed")
    }

    pub fn webhook(&self, payment: &Payment, status: &str) -> WebhookNotification {
        signed_webhook(&payment.external_gateway_id, payment.amount, status)
    }

    /// Checkout, charge and settlement in one go.
    pub async fn paid_order(&self, product: &Product, quantity: i64) -> Order {
        let order = self.checkout(product, quantity).await.order;
        let payment = self.pay(&order).await;
        self.payments.handle_webhook(self.webhook(&payment, "settlement"), Utc::now()).await.expect("Webhook failed");
        self.order(order.id).await
    }

    pub async fn shipped_order(&self, product: &Product, quantity: i64, at: DateTime<Utc>) -> Order {
        let order = self.paid_order(product, quantity).await;
        let actor = Actor::admin("gudang@zvr.id");
        self.fulfillment.ship_order(order.id, None, actor, at).await.expect("Shipping failed")
    }

    pub async fn delivered_order(&self, product: &Product, quantity: i64) -> Order {
        let order = self.shipped_order(product, quantity, Utc::now()).await;
        self.flow.mark_delivered(order.id, Actor::tracking(), Utc::now()).await.expect("Delivery failed")
    }

    pub async fn order(&self, id: i64) -> Order {
        self.db.fetch_order(&OrderRef::Id(id)).await.expect("Error fetching order").expect("Order not found")
    }

    pub async fn latest_payment(&self, order_id: i64) -> Payment {
        self.db.fetch_latest_payment(order_id).await.expect("Error fetching payment").expect("No payment")
    }

    /// The shipment that has not been replaced.
    pub async fn active_shipment(&self, order_id: i64) -> Shipment {
        let shipments = self.db.fetch_shipments_for_order(order_id).await.expect("Error fetching shipments");
        shipments.into_iter().rev().find(|s| s.replaced_by_shipment_id.is_none()).expect("No active shipment")
    }

    pub async fn tear_down(self) {
        let url = self.db.url().to_string();
        self.db.pool().close().await;
        if let Err(e) = Sqlite::drop_database(&url).await {
            warn!("🗃️ Could not remove test database {url}. {e}");
        }
    }
}
