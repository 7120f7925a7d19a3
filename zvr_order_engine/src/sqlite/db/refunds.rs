use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;
use zvr_common::Rupiah;

use crate::{
    db_types::{NewRefund, Refund, RefundItem, RefundStatus},
    traits::OrderEngineError,
};

/// Inserts the refund row and its items. A clash on `refund_code` or `idempotency_key` surfaces as a unique
/// violation for the caller to tell apart.
pub(crate) async fn insert_refund(
    refund: &NewRefund,
    refund_code: &str,
    status: RefundStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, sqlx::Error> {
    let row: Refund = sqlx::query_as(
        r#"
        INSERT INTO refunds (
            refund_code, order_id, payment_id, refund_type, reason, reason_detail, original_amount, refund_amount,
            shipping_refund, items_refund, status, idempotency_key, requested_by, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
        RETURNING *
        "#,
    )
    .bind(refund_code)
    .bind(refund.order_id)
    .bind(refund.payment_id)
    .bind(refund.refund_type)
    .bind(refund.reason)
    .bind(&refund.reason_detail)
    .bind(refund.original_amount)
    .bind(refund.refund_amount)
    .bind(refund.shipping_refund)
    .bind(refund.items_refund)
    .bind(status)
    .bind(&refund.idempotency_key)
    .bind(&refund.requested_by)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    for item in &refund.items {
        sqlx::query(
            r#"
            INSERT INTO refund_items (refund_id, order_item_id, quantity, price, refund_amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.id)
        .bind(item.order_item_id)
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.refund_amount)
        .execute(&mut *conn)
        .await?;
    }
    debug!("🗃️ Refund {} inserted for order #{} with {} items", row.refund_code, row.order_id, refund.items.len());
    Ok(row)
}

pub async fn fetch_refund(refund_id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE id = $1").bind(refund_id).fetch_optional(conn).await
}

pub async fn fetch_refund_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE idempotency_key = $1").bind(key).fetch_optional(conn).await
}

/// Re-reads a refund row under the write lock. Call after the order has been locked.
pub(crate) async fn lock_refund(refund_id: i64, conn: &mut SqliteConnection) -> Result<Refund, OrderEngineError> {
    let refund: Option<Refund> = sqlx::query_as("UPDATE refunds SET updated_at = updated_at WHERE id = $1 RETURNING *")
        .bind(refund_id)
        .fetch_optional(conn)
        .await?;
    refund.ok_or(OrderEngineError::RefundNotFound(refund_id))
}

pub async fn fetch_refunds_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}

pub async fn fetch_refund_items(refund_id: i64, conn: &mut SqliteConnection) -> Result<Vec<RefundItem>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refund_items WHERE refund_id = $1 ORDER BY id").bind(refund_id).fetch_all(conn).await
}

/// The total held against the order's balance by refunds that are `PROCESSING` or `COMPLETED`.
pub(crate) async fn committed_total(order_id: i64, conn: &mut SqliteConnection) -> Result<Rupiah, sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(refund_amount), 0) FROM refunds \
         WHERE order_id = $1 AND status IN ('PROCESSING', 'COMPLETED')",
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    Ok(Rupiah::from(total))
}

pub(crate) async fn completed_total(order_id: i64, conn: &mut SqliteConnection) -> Result<Rupiah, sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(refund_amount), 0) FROM refunds WHERE order_id = $1 AND status = 'COMPLETED'",
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    Ok(Rupiah::from(total))
}

pub(crate) async fn update_status(
    refund_id: i64,
    status: RefundStatus,
    note: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, sqlx::Error> {
    let refund = sqlx::query_as(
        "UPDATE refunds SET status = $1, note = COALESCE($2, note), updated_at = $3 WHERE id = $4 RETURNING *",
    )
    .bind(status)
    .bind(note)
    .bind(now)
    .bind(refund_id)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Refund #{refund_id} status set to {status}");
    Ok(refund)
}

pub(crate) async fn mark_completed(
    refund_id: i64,
    gateway_refund_id: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Refund, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE refunds SET status = 'COMPLETED', gateway_refund_id = $1, completed_at = $2, updated_at = $2
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(gateway_refund_id)
    .bind(now)
    .bind(refund_id)
    .fetch_one(conn)
    .await
}

/// Sets `stock_restored` on an item that has not been restocked yet. Returns false if another completion got there
/// first.
pub(crate) async fn claim_item_restock(item_id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE refund_items SET stock_restored = 1 WHERE id = $1 AND stock_restored = 0")
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}
