//! The notification outbox. Rows are written inside the transaction that caused them and drained by the publisher
//! once that transaction has committed.
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::db_types::{Metadata, NewNotification, Notification, NotificationEvent, Order};

/// The payload the transport renders from. The order is snapshotted as it is at the moment of the event.
pub(crate) fn notification_for_order(order: &Order, event: NotificationEvent) -> NewNotification {
    let mut payload = Metadata::new();
    payload
        .insert("order_code", &order.order_code)
        .insert("customer_name", &order.customer_name)
        .insert("total_amount", order.total_amount)
        .insert("status", order.status);
    if let Some(resi) = &order.resi {
        payload.insert("resi", resi);
    }
    if order.refund_amount.is_positive() {
        payload.insert("refund_amount", order.refund_amount);
    }
    NewNotification { order_id: order.id, event_kind: event, recipient: order.customer_email.clone(), payload }
}

/// Queues a notification unless one already exists for the same order and event, in any state. Returns `None` when
/// the event was already queued.
pub(crate) async fn enqueue(
    notification: &NewNotification,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Notification>, sqlx::Error> {
    let row: Option<Notification> = sqlx::query_as(
        r#"
        INSERT INTO notifications (order_id, event_kind, recipient, payload, status, created_at, updated_at)
        SELECT $1, $2, $3, $4, 'PENDING', $5, $5
        WHERE NOT EXISTS (SELECT 1 FROM notifications WHERE order_id = $1 AND event_kind = $2)
        RETURNING *
        "#,
    )
    .bind(notification.order_id)
    .bind(notification.event_kind)
    .bind(&notification.recipient)
    .bind(notification.payload.to_json_string())
    .bind(now)
    .fetch_optional(conn)
    .await?;
    match &row {
        Some(n) => debug!("📬️ Queued {} notification #{} for order #{}", n.event_kind, n.id, n.order_id),
        None => debug!(
            "📬️ {} notification for order #{} was already queued. Skipping",
            notification.event_kind, notification.order_id
        ),
    }
    Ok(row)
}

pub async fn fetch_notification(id: i64, conn: &mut SqliteConnection) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notifications WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_pending(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notifications WHERE status = 'PENDING' ORDER BY id LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notifications WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}

/// Marks a `PENDING` row as sent. The partial unique index on `(order_id, event_kind) WHERE status = 'SENT'` makes a
/// second delivery of the same event fail here.
pub(crate) async fn mark_sent(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE notifications SET status = 'SENT', attempts = attempts + 1, error = NULL, sent_at = $1, updated_at = $1
        WHERE id = $2 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub(crate) async fn mark_failed(
    id: i64,
    error: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE notifications SET status = 'FAILED', attempts = attempts + 1, error = $1, updated_at = $2
        WHERE id = $3 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(error)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub(crate) async fn redrive(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as(
        "UPDATE notifications SET status = 'PENDING', error = NULL, updated_at = $1 \
         WHERE id = $2 AND status = 'FAILED' RETURNING *",
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
}
