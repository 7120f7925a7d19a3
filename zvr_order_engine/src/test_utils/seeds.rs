//! Seed data for tests. The catalog and carts belong to the storefront, so these write the rows directly.
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    db_types::{AddressSnapshot, Metadata, Product, Rupiah},
    helpers::{payment_signature, SignatureInputs},
    traits::CustomerDetails,
    zvr_api::{checkout_objects::CheckoutRequest, payment_objects::WebhookNotification},
};

pub const TEST_SERVER_KEY: &str = "SB-Mid-server-test-key";

pub async fn seed_product(pool: &SqlitePool, sku: &str, price: i64, stock: i64, weight_grams: i64) -> Product {
    let now = Utc::now();
    sqlx::query_as(
        r#"
        INSERT INTO products (sku, name, price, stock, weight_grams, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING *
        "#,
    )
    .bind(sku)
    .bind(format!("Product {sku}"))
    .bind(price)
    .bind(stock)
    .bind(weight_grams)
    .bind(now)
    .fetch_one(pool)
    .await
    .expect("Error seeding product")
}

/// Creates a cart holding `(product_id, quantity)` lines and returns its id.
pub async fn seed_cart(pool: &SqlitePool, user_id: Option<i64>, lines: &[(i64, i64)]) -> i64 {
    let now = Utc::now();
    let cart_id: i64 = sqlx::query_scalar(
        "INSERT INTO carts (session_id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $3) RETURNING id",
    )
    .bind(format!("session-{}", rand::random::<u32>()))
    .bind(user_id)
    .bind(now)
    .fetch_one(pool)
    .await
    .expect("Error seeding cart");
    for (product_id, quantity) in lines {
        sqlx::query("INSERT INTO cart_items (cart_id, product_id, quantity, created_at) VALUES ($1, $2, $3, $4)")
            .bind(cart_id)
            .bind(product_id)
            .bind(quantity)
            .bind(now)
            .execute(pool)
            .await
            .expect("Error seeding cart item");
    }
    cart_id
}

pub async fn product_stock(pool: &SqlitePool, product_id: i64) -> i64 {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .expect("Error reading stock")
}

pub fn jakarta_address() -> AddressSnapshot {
    AddressSnapshot {
        recipient_name: "Sari Wulandari".into(),
        phone: "081234567890".into(),
        address_line: "Jl. Kemang Raya No. 12".into(),
        district: Some("Mampang Prapatan".into()),
        city: "Jakarta Selatan".into(),
        province: "DKI Jakarta".into(),
        postal_code: "12730".into(),
        area_id: None,
    }
}

pub fn checkout_request(cart_id: i64, user_id: Option<i64>) -> CheckoutRequest {
    CheckoutRequest {
        cart_id,
        user_id,
        customer: CustomerDetails {
            name: "Sari Wulandari".into(),
            email: "sari@example.com".into(),
            phone: "081234567890".into(),
        },
        courier_code: "jne".into(),
        service_code: "reg".into(),
        address_id: None,
        address: jakarta_address(),
        tax: Rupiah::from(0),
        discount: Rupiah::from(0),
    }
}

/// A gateway notification for `external_id`, signed with [`TEST_SERVER_KEY`].
pub fn signed_webhook(external_id: &str, gross_amount: Rupiah, transaction_status: &str) -> WebhookNotification {
    let inputs = SignatureInputs {
        order_id: external_id.to_string(),
        status_code: "200".into(),
        gross_amount: format!("{}.00", gross_amount.value()),
    };
    let signature = payment_signature(&inputs, TEST_SERVER_KEY);
    WebhookNotification {
        external_id: external_id.to_string(),
        transaction_status: transaction_status.to_string(),
        fraud_status: None,
        transaction_id: Some(format!("TX-{external_id}")),
        payment_type: Some("bank_transfer".into()),
        raw: Metadata::new()
            .with("order_id", external_id)
            .with("transaction_status", transaction_status)
            .with("gross_amount", &inputs.gross_amount),
        signature_inputs: inputs,
        signature,
    }
}

/// Moves an order's creation time, so that the sweepers see it as old.
pub async fn backdate_order(pool: &SqlitePool, order_id: i64, created_at: DateTime<Utc>) {
    sqlx::query("UPDATE orders SET created_at = $1 WHERE id = $2")
        .bind(created_at)
        .bind(order_id)
        .execute(pool)
        .await
        .expect("Error backdating order");
}

/// Moves a payment's creation and expiry times.
pub async fn backdate_payment(pool: &SqlitePool, payment_id: i64, created_at: DateTime<Utc>, expiry: DateTime<Utc>) {
    sqlx::query("UPDATE payments SET created_at = $1, expiry_time = $2 WHERE id = $3")
        .bind(created_at)
        .bind(expiry)
        .bind(payment_id)
        .execute(pool)
        .await
        .expect("Error backdating payment");
}

/// Makes a shipment look as if it was handed over at `shipped_at` and has not been heard from since.
pub async fn backdate_shipment(pool: &SqlitePool, shipment_id: i64, shipped_at: DateTime<Utc>) {
    sqlx::query("UPDATE shipments SET shipped_at = $1, last_tracking_update = $1, created_at = $1 WHERE id = $2")
        .bind(shipped_at)
        .bind(shipment_id)
        .execute(pool)
        .await
        .expect("Error backdating shipment");
}

pub async fn backdate_delivery(pool: &SqlitePool, order_id: i64, delivered_at: DateTime<Utc>) {
    sqlx::query("UPDATE orders SET delivered_at = $1 WHERE id = $2")
        .bind(delivered_at)
        .bind(order_id)
        .execute(pool)
        .await
        .expect("Error backdating delivery");
}
