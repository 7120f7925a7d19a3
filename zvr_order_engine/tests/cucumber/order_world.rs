use std::collections::HashMap;

use cucumber::World;
use zvr_order_engine::{
    admin_objects::AdminOutcome,
    db_types::{Order, Payment, Product},
    payment_objects::WebhookNotification,
    AdminActionError,
    OrderEngineError,
    RefundResult,
};

use crate::support::TestShop;

#[derive(Default, Debug, World)]
pub struct OrderWorld {
    pub shop: Option<TestShop>,
    pub products: HashMap<String, Product>,
    pub order: Option<Order>,
    pub payment: Option<Payment>,
    pub last_webhook: Option<WebhookNotification>,
    pub last_refund: Option<Result<RefundResult, OrderEngineError>>,
    pub last_admin_action: Option<Result<AdminOutcome<Order>, AdminActionError>>,
    pub movements_before_admin_action: usize,
}

impl OrderWorld {
    pub fn shop(&self) -> &TestShop {
        self.shop.as_ref().expect("Shop not initialised")
    }

    pub fn product(&self, sku: &str) -> &Product {
        self.products.get(sku).unwrap_or_else(|| panic!("No product with SKU {sku}"))
    }

    pub fn order(&self) -> &Order {
        self.order.as_ref().expect("No order has been placed")
    }

    pub async fn refresh_order(&mut self) -> Order {
        let order = self.shop().order(self.order().id).await;
        self.order = Some(order.clone());
        order
    }
}
