use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Actor, Metadata, NewPayment, Payment, PaymentStatus, PaymentSyncLog, SyncType},
    traits::{ChargeUpdate, OrderEngineError},
};

/// Re-reads the payment row under the transaction's write lock. Call after the order has been locked.
pub(crate) async fn lock_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Payment, OrderEngineError> {
    let payment: Option<Payment> =
        sqlx::query_as("UPDATE payments SET updated_at = updated_at WHERE id = $1 RETURNING *")
            .bind(payment_id)
            .fetch_optional(conn)
            .await?;
    payment.ok_or_else(|| OrderEngineError::PaymentNotFound(format!("#{payment_id}")))
}

pub async fn fetch_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await
}

pub async fn fetch_payment_by_external_id(
    external_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE external_gateway_id = $1")
        .bind(external_id)
        .fetch_optional(conn)
        .await
}

pub async fn fetch_latest_payment(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1")
        .bind(order_id)
        .fetch_optional(conn)
        .await
}

pub async fn fetch_pending_payment(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM payments WHERE order_id = $1 AND status = 'PENDING' ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_payments_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at, id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}

pub(crate) async fn insert_payment(
    payment: &NewPayment,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO payments (
            order_id, payment_method, provider, bank, external_gateway_id, amount, status, expiry_time,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(payment.order_id)
    .bind(&payment.payment_method)
    .bind(&payment.provider)
    .bind(&payment.bank)
    .bind(&payment.external_gateway_id)
    .bind(payment.amount)
    .bind(payment.expiry_time)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub(crate) async fn attach_charge(
    payment_id: i64,
    update: &ChargeUpdate,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE payments SET
            transaction_id = COALESCE($1, transaction_id),
            bank = COALESCE($2, bank),
            va_number = $3,
            qr_url = $4,
            expiry_time = COALESCE($5, expiry_time),
            raw_response = $6,
            updated_at = $7
        WHERE id = $8
        RETURNING *
        "#,
    )
    .bind(&update.transaction_id)
    .bind(&update.bank)
    .bind(&update.va_number)
    .bind(&update.qr_url)
    .bind(update.expiry_time)
    .bind(update.raw.to_json_string())
    .bind(now)
    .bind(payment_id)
    .fetch_one(conn)
    .await
}

/// Writes a new status. `paid_at` is stamped on the move to `PAID`; a failure reason is kept for the other final
/// states.
pub(crate) async fn set_status(
    payment_id: i64,
    status: PaymentStatus,
    transaction_id: Option<&str>,
    raw: &Metadata,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    let paid_at = (status == PaymentStatus::Paid).then_some(now);
    let payment: Payment = sqlx::query_as(
        r#"
        UPDATE payments SET
            status = $1,
            transaction_id = COALESCE($2, transaction_id),
            raw_response = CASE WHEN $3 = '{}' THEN raw_response ELSE $3 END,
            failure_reason = $4,
            paid_at = COALESCE($5, paid_at),
            updated_at = $6
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(transaction_id)
    .bind(raw.to_json_string())
    .bind(failure_reason)
    .bind(paid_at)
    .bind(now)
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payment #{payment_id} status set to {status}");
    Ok(payment)
}

/// A status check that still says pending: keep the latest gateway view, leave the status alone.
pub(crate) async fn refresh_pending(
    payment_id: i64,
    transaction_id: Option<&str>,
    raw: &Metadata,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE payments SET
            transaction_id = COALESCE($1, transaction_id),
            raw_response = CASE WHEN $2 = '{}' THEN raw_response ELSE $2 END,
            updated_at = $3
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(raw.to_json_string())
    .bind(now)
    .bind(payment_id)
    .fetch_one(conn)
    .await
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_sync_log(
    payment_id: i64,
    sync_type: SyncType,
    previous_status: PaymentStatus,
    new_status: PaymentStatus,
    gateway_status: Option<&str>,
    actor: &Actor,
    note: Option<&str>,
    raw: &Metadata,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentSyncLog, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO payment_sync_logs (
            payment_id, sync_type, previous_status, new_status, gateway_status, actor, note, raw_response, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(payment_id)
    .bind(sync_type)
    .bind(previous_status)
    .bind(new_status)
    .bind(gateway_status)
    .bind(actor.as_str())
    .bind(note)
    .bind(raw.to_json_string())
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_sync_logs(payment_id: i64, conn: &mut SqliteConnection) -> Result<Vec<PaymentSyncLog>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_sync_logs WHERE payment_id = $1 ORDER BY id")
        .bind(payment_id)
        .fetch_all(conn)
        .await
}

/// `PENDING` payments whose expiry has passed, on orders that are still waiting for payment.
pub async fn fetch_expired_payments(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT p.* FROM payments p JOIN orders o ON o.id = p.order_id
        WHERE p.status = 'PENDING' AND o.status = 'PENDING' AND julianday(p.expiry_time) < julianday($1)
        ORDER BY p.expiry_time, p.id
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await
}

pub async fn fetch_stuck_payments(
    created_before: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM payments WHERE status = 'PENDING' AND julianday(created_at) < julianday($1) \
         ORDER BY id LIMIT $2",
    )
    .bind(created_before)
    .bind(limit)
    .fetch_all(conn)
    .await
}
