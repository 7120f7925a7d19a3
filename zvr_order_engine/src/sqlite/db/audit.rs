use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use super::{is_unique_violation, orders, payments, shipments};
use crate::{
    db_types::{AuditDraft, AuditLogEntry, Metadata},
    traits::{OrderEngineError, OrderRef},
};

/// The state an admin action is judged against: the order plus its latest payment and active shipment.
pub(crate) async fn order_snapshot(order_id: i64, conn: &mut SqliteConnection) -> Result<Metadata, sqlx::Error> {
    let mut state = Metadata::new();
    let order = match orders::fetch_order(&OrderRef::Id(order_id), conn).await? {
        Some(o) => o,
        None => return Ok(state),
    };
    state
        .insert("order_id", order.id)
        .insert("order_code", &order.order_code)
        .insert("order_status", order.status)
        .insert("stock_reserved", order.stock_reserved)
        .insert("refund_status", order.refund_status)
        .insert("refund_amount", order.refund_amount)
        .insert("resi", &order.resi);
    if let Some(payment) = payments::fetch_latest_payment(order_id, conn).await? {
        state.insert("payment_id", payment.id).insert("payment_status", payment.status);
    }
    if let Some(shipment) = shipments::fetch_active_shipment(order_id, conn).await? {
        state.insert("shipment_id", shipment.id).insert("shipment_status", shipment.status);
    }
    Ok(state)
}

/// Resolves the order that an audit target belongs to.
pub(crate) async fn target_order_id(
    draft: &AuditDraft,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, sqlx::Error> {
    match draft.target_type.as_str() {
        "order" => Ok(Some(draft.target_id)),
        "shipment" => Ok(shipments::fetch_shipment(draft.target_id, conn).await?.map(|s| s.order_id)),
        "payment" => Ok(payments::fetch_payment(draft.target_id, conn).await?.map(|p| p.order_id)),
        "refund" => Ok(super::refunds::fetch_refund(draft.target_id, conn).await?.map(|r| r.order_id)),
        _ => Ok(None),
    }
}

pub(crate) async fn target_snapshot(draft: &AuditDraft, conn: &mut SqliteConnection) -> Result<Metadata, sqlx::Error> {
    match target_order_id(draft, conn).await? {
        Some(order_id) => order_snapshot(order_id, conn).await,
        None => Ok(Metadata::new()),
    }
}

/// Appends an audit row. A reused idempotency key is reported as `IdempotencyConflict`.
pub(crate) async fn insert_audit(
    draft: &AuditDraft,
    state_before: &Metadata,
    state_after: &Metadata,
    error_message: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<AuditLogEntry, OrderEngineError> {
    let result: Result<AuditLogEntry, sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO admin_audit_log (
            admin_id, admin_email, ip_address, user_agent, action_type, target_type, target_id, target_code,
            state_before, state_after, reason, success, error_message, idempotency_key, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(draft.admin_id)
    .bind(&draft.admin_email)
    .bind(&draft.ip_address)
    .bind(&draft.user_agent)
    .bind(draft.action_type)
    .bind(&draft.target_type)
    .bind(draft.target_id)
    .bind(&draft.target_code)
    .bind(state_before.to_json_string())
    .bind(state_after.to_json_string())
    .bind(&draft.reason)
    .bind(error_message.is_none())
    .bind(error_message)
    .bind(&draft.idempotency_key)
    .bind(now)
    .fetch_one(conn)
    .await;
    match result {
        Ok(entry) => {
            info!(
                "🛡️ Audit #{}: {} {} on {} #{} by {}",
                entry.id,
                entry.action_type,
                if entry.success { "succeeded" } else { "failed" },
                entry.target_type,
                entry.target_id,
                entry.admin_email
            );
            Ok(entry)
        },
        Err(e) if is_unique_violation(&e) => {
            Err(OrderEngineError::IdempotencyConflict(draft.idempotency_key.clone().unwrap_or_default()))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<AuditLogEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM admin_audit_log WHERE idempotency_key = $1").bind(key).fetch_optional(conn).await
}

pub async fn fetch_for_target(
    target_type: &str,
    target_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM admin_audit_log WHERE target_type = $1 AND target_id = $2 ORDER BY id")
        .bind(target_type)
        .bind(target_id)
        .fetch_all(conn)
        .await
}
