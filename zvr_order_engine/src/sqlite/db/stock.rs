//! Stock movements. Product stock is only ever changed together with a movement row in the same transaction, so the
//! movement deltas for a product always add up to its change in stock.
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{MovementType, StockMovement},
    traits::OrderEngineError,
};

#[derive(Debug, Clone, Copy)]
struct MovementDraft<'a> {
    product_id: i64,
    variant_id: Option<i64>,
    order_id: Option<i64>,
    refund_id: Option<i64>,
    movement_type: MovementType,
    quantity: i64,
    delta: i64,
    balance_after: i64,
    note: Option<&'a str>,
}

async fn insert_movement(
    m: MovementDraft<'_>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<StockMovement, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO stock_movements
            (product_id, variant_id, order_id, refund_id, movement_type, quantity, delta, balance_after, note,
            created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(m.product_id)
    .bind(m.variant_id)
    .bind(m.order_id)
    .bind(m.refund_id)
    .bind(m.movement_type)
    .bind(m.quantity)
    .bind(m.delta)
    .bind(m.balance_after)
    .bind(m.note)
    .bind(now)
    .fetch_one(conn)
    .await
}

async fn adjust_product_stock(
    product_id: i64,
    delta: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE products SET stock = stock + $1, updated_at = $2 WHERE id = $3 AND stock + $1 >= 0 RETURNING stock",
    )
    .bind(delta)
    .bind(now)
    .bind(product_id)
    .fetch_optional(conn)
    .await
}

async fn current_stock(product_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1").bind(product_id).fetch_one(conn).await
}

/// Takes `quantity` units off the product and records a `RESERVE` movement. Fails with `InsufficientStock` if the
/// product does not have that many left.
pub(crate) async fn reserve(
    product_id: i64,
    variant_id: Option<i64>,
    order_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<StockMovement, OrderEngineError> {
    let balance = match adjust_product_stock(product_id, -quantity, now, conn).await? {
        Some(b) => b,
        None => {
            let available = current_stock(product_id, conn).await?;
            return Err(OrderEngineError::InsufficientStock { product_id, requested: quantity, available });
        },
    };
    let movement = MovementDraft {
        product_id,
        variant_id,
        order_id: Some(order_id),
        refund_id: None,
        movement_type: MovementType::Reserve,
        quantity,
        delta: -quantity,
        balance_after: balance,
        note: None,
    };
    let movement = insert_movement(movement, now, conn).await?;
    trace!("🗃️ Reserved {quantity} of product #{product_id} for order #{order_id}. {balance} left");
    Ok(movement)
}

/// Net reserved quantity per product line of the order: reservations minus releases.
async fn outstanding_reservations(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<(i64, Option<i64>, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT product_id, variant_id,
            SUM(CASE WHEN movement_type = 'RESERVE' THEN quantity ELSE 0 END) -
            SUM(CASE WHEN movement_type = 'RELEASE' THEN quantity ELSE 0 END) AS outstanding
        FROM stock_movements
        WHERE order_id = $1
        GROUP BY product_id, variant_id
        ORDER BY product_id
        "#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await
}

/// Returns every outstanding reservation of the order to the shelf with one `RELEASE` movement per line. Running it
/// again releases nothing.
pub(crate) async fn release_for_order(
    order_id: i64,
    note: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<StockMovement>, OrderEngineError> {
    let mut released = vec![];
    for (product_id, variant_id, outstanding) in outstanding_reservations(order_id, conn).await? {
        if outstanding <= 0 {
            continue;
        }
        let balance = adjust_product_stock(product_id, outstanding, now, conn)
            .await?
            .ok_or_else(|| OrderEngineError::InternalError(format!("Product #{product_id} vanished")))?;
        let movement = MovementDraft {
            product_id,
            variant_id,
            order_id: Some(order_id),
            refund_id: None,
            movement_type: MovementType::Release,
            quantity: outstanding,
            delta: outstanding,
            balance_after: balance,
            note: Some(note),
        };
        released.push(insert_movement(movement, now, conn).await?);
    }
    debug!("🗃️ Released {} reservation lines for order #{order_id}", released.len());
    Ok(released)
}

/// Converts each outstanding reservation into a `DEDUCT` movement. The units already left the shelf at reservation
/// time, so the delta is zero.
pub(crate) async fn deduct_for_order(
    order_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<StockMovement>, OrderEngineError> {
    let mut deducted = vec![];
    for (product_id, variant_id, outstanding) in outstanding_reservations(order_id, conn).await? {
        if outstanding <= 0 {
            continue;
        }
        let balance = current_stock(product_id, conn).await?;
        let movement = MovementDraft {
            product_id,
            variant_id,
            order_id: Some(order_id),
            refund_id: None,
            movement_type: MovementType::Deduct,
            quantity: outstanding,
            delta: 0,
            balance_after: balance,
            note: None,
        };
        deducted.push(insert_movement(movement, now, conn).await?);
    }
    Ok(deducted)
}

/// True if stock was tracked for this product on this order, i.e. it was reserved at some point.
pub(crate) async fn was_reserved(
    order_id: i64,
    product_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM stock_movements WHERE order_id = $1 AND product_id = $2 AND movement_type = 'RESERVE'",
    )
    .bind(order_id)
    .bind(product_id)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// Puts refunded units back on the shelf with an `ADJUSTMENT` movement.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn restock_for_refund(
    product_id: i64,
    variant_id: Option<i64>,
    order_id: i64,
    refund_id: i64,
    quantity: i64,
    note: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<StockMovement, OrderEngineError> {
    let balance = adjust_product_stock(product_id, quantity, now, conn)
        .await?
        .ok_or_else(|| OrderEngineError::InternalError(format!("Product #{product_id} vanished")))?;
    let movement = MovementDraft {
        product_id,
        variant_id,
        order_id: Some(order_id),
        refund_id: Some(refund_id),
        movement_type: MovementType::Adjustment,
        quantity,
        delta: quantity,
        balance_after: balance,
        note: Some(note),
    };
    Ok(insert_movement(movement, now, conn).await?)
}

pub async fn fetch_movements_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StockMovement>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM stock_movements WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}

pub async fn fetch_movements_for_product(
    product_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StockMovement>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM stock_movements WHERE product_id = $1 ORDER BY id")
        .bind(product_id)
        .fetch_all(conn)
        .await
}
