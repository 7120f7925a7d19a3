use chrono::{DateTime, Utc};
use log::*;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Metadata, NewOrder, NewOrderItem, Order, OrderItem, OrderRefundStatus, OrderStatusType},
    traits::{OrderEngineError, OrderQueryFilter, OrderRef},
};
use zvr_common::Rupiah;

/// Takes the write lock and returns the current order row. Must be the first statement of a unit of transition.
pub async fn lock_order(order: &OrderRef, conn: &mut SqliteConnection) -> Result<Order, OrderEngineError> {
    let locked: Option<Order> = match order {
        OrderRef::Id(id) => {
            sqlx::query_as("UPDATE orders SET updated_at = updated_at WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_optional(conn)
                .await?
        },
        OrderRef::Code(code) => {
            sqlx::query_as("UPDATE orders SET updated_at = updated_at WHERE order_code = $1 RETURNING *")
                .bind(code)
                .fetch_optional(conn)
                .await?
        },
    };
    trace!("🗃️ Lock requested on order {order}. Found: {}", locked.is_some());
    locked.ok_or_else(|| OrderEngineError::OrderNotFound(order.to_string()))
}

pub async fn fetch_order(order: &OrderRef, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    match order {
        OrderRef::Id(id) => fetch_order_by_id(*id, conn).await,
        OrderRef::Code(code) => {
            sqlx::query_as("SELECT * FROM orders WHERE order_code = $1").bind(code).fetch_optional(conn).await
        },
    }
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_order_items(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}

/// Inserts the order row in `PENDING` with `stock_reserved` set. A clash on `order_code` surfaces as a unique
/// violation; the caller picks a new code and tries again.
pub async fn insert_order(
    order: &NewOrder,
    order_code: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO orders (
            order_code, user_id, customer_name, customer_email, customer_phone,
            subtotal, shipping_cost, tax, discount, total_amount,
            status, stock_reserved, metadata, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING', 1, $11, $12, $12)
        RETURNING *
        "#,
    )
    .bind(order_code)
    .bind(order.user_id)
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(&order.customer_phone)
    .bind(order.subtotal)
    .bind(order.shipping_cost)
    .bind(order.tax)
    .bind(order.discount)
    .bind(order.total_amount)
    .bind(order.metadata.to_json_string())
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn insert_order_item(
    order_id: i64,
    item: &NewOrderItem,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OrderItem, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO order_items (
            order_id, product_id, variant_id, product_name, product_image,
            quantity, unit_price, subtotal, weight_grams, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(item.product_id)
    .bind(item.variant_id)
    .bind(&item.product_name)
    .bind(&item.product_image)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.subtotal())
    .bind(item.weight_grams)
    .bind(now)
    .fetch_one(conn)
    .await
}

fn status_timestamp_column(status: OrderStatusType) -> Option<&'static str> {
    match status {
        OrderStatusType::Paid => Some("paid_at"),
        OrderStatusType::Shipped => Some("shipped_at"),
        OrderStatusType::Delivered => Some("delivered_at"),
        OrderStatusType::Completed => Some("completed_at"),
        OrderStatusType::Cancelled => Some("cancelled_at"),
        OrderStatusType::Refunded => Some("refunded_at"),
        _ => None,
    }
}

/// Writes the status and its timestamp column. Does not check the state machine; see [`super::transitions`].
pub(crate) async fn update_status(
    order_id: i64,
    status: OrderStatusType,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    let sql = match status_timestamp_column(status) {
        Some(col) => format!("UPDATE orders SET status = $1, {col} = $2, updated_at = $2 WHERE id = $3 RETURNING *"),
        None => "UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *".to_string(),
    };
    let order = sqlx::query_as(&sql).bind(status).bind(now).bind(order_id).fetch_one(conn).await?;
    debug!("🗃️ Order #{order_id} status set to {status}");
    Ok(order)
}

pub(crate) async fn set_resi(
    order_id: i64,
    resi: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as("UPDATE orders SET resi = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(resi)
        .bind(now)
        .bind(order_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn set_stock_reserved(
    order_id: i64,
    reserved: bool,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as("UPDATE orders SET stock_reserved = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(reserved)
        .bind(now)
        .bind(order_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn set_metadata(
    order_id: i64,
    metadata: &Metadata,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as("UPDATE orders SET metadata = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(metadata.to_json_string())
        .bind(now)
        .bind(order_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn set_refund_totals(
    order_id: i64,
    refund_amount: Rupiah,
    refund_status: OrderRefundStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as(
        "UPDATE orders SET refund_amount = $1, refund_status = $2, updated_at = $3 WHERE id = $4 RETURNING *",
    )
    .bind(refund_amount)
    .bind(refund_status)
    .bind(now)
    .bind(order_id)
    .fetch_one(conn)
    .await
}

/// Fetches orders matching the filter, newest first.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM orders ");
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if !query.statuses.is_empty() {
        let statuses = query.statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({statuses})"));
    }
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(email) = query.customer_email {
        where_clause.push("customer_email = ");
        where_clause.push_bind_unseparated(email);
    }
    if let Some(since) = query.created_since {
        where_clause.push("julianday(created_at) >= julianday(");
        where_clause.push_bind_unseparated(since);
        where_clause.push_unseparated(")");
    }
    if let Some(until) = query.created_until {
        where_clause.push("julianday(created_at) < julianday(");
        where_clause.push_bind_unseparated(until);
        where_clause.push_unseparated(")");
    }
    builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    builder.push_bind(query.limit.unwrap_or(100));
    trace!("🗃️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(conn).await?;
    Ok(orders)
}

/// `PENDING` orders created before `created_before`, oldest first.
pub async fn fetch_expirable_orders(
    created_before: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM orders WHERE status = 'PENDING' AND julianday(created_at) < julianday($1) ORDER BY id LIMIT $2",
    )
    .bind(created_before)
    .bind(limit)
    .fetch_all(conn)
    .await
}

/// `DELIVERED` orders delivered before `delivered_before`, oldest first.
pub async fn fetch_completable_orders(
    delivered_before: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT * FROM orders
        WHERE status = 'DELIVERED' AND delivered_at IS NOT NULL AND julianday(delivered_at) < julianday($1)
        ORDER BY id LIMIT $2"#,
    )
    .bind(delivered_before)
    .bind(limit)
    .fetch_all(conn)
    .await
}
