use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{
        AlertSeverity,
        AlertType,
        CourierFailure,
        Dispute,
        DisputeType,
        NewShipment,
        Shipment,
        ShipmentAlert,
        ShipmentStatus,
    },
    traits::OrderEngineError,
};

//--------------------------------------      Shipments        ---------------------------------------------------------
pub(crate) async fn insert_shipment(
    order_id: i64,
    shipment: &NewShipment,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO shipments (
            order_id, provider_code, provider_name, service_code, service_name, cost, etd, weight_grams, status,
            origin_postal_code, destination_postal_code, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9, $10, $11, $11)
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(&shipment.provider_code)
    .bind(&shipment.provider_name)
    .bind(&shipment.service_code)
    .bind(&shipment.service_name)
    .bind(shipment.cost)
    .bind(&shipment.etd)
    .bind(shipment.weight_grams)
    .bind(&shipment.origin_postal_code)
    .bind(&shipment.destination_postal_code)
    .bind(now)
    .fetch_one(conn)
    .await
}

/// Copies the courier details of `original` into a new `PROCESSING` shipment that points back at it. The reship
/// counter is carried over, so the loop guard holds along the whole chain of replacements.
pub(crate) async fn insert_replacement(
    original: &Shipment,
    tracking_number: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO shipments (
            order_id, provider_code, provider_name, service_code, service_name, cost, etd, weight_grams,
            tracking_number, status, origin_postal_code, destination_postal_code, reship_count, is_replacement,
            original_shipment_id, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PROCESSING', $10, $11, $12, 1, $13, $14, $14)
        RETURNING *
        "#,
    )
    .bind(original.order_id)
    .bind(&original.provider_code)
    .bind(&original.provider_name)
    .bind(&original.service_code)
    .bind(&original.service_name)
    .bind(original.cost)
    .bind(&original.etd)
    .bind(original.weight_grams)
    .bind(tracking_number)
    .bind(&original.origin_postal_code)
    .bind(&original.destination_postal_code)
    .bind(original.reship_count + 1)
    .bind(original.id)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_shipment(shipment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipments WHERE id = $1").bind(shipment_id).fetch_optional(conn).await
}

/// Re-reads a shipment row under the write lock. Call after the order has been locked.
pub(crate) async fn lock_shipment(shipment_id: i64, conn: &mut SqliteConnection) -> Result<Shipment, OrderEngineError> {
    let shipment: Option<Shipment> =
        sqlx::query_as("UPDATE shipments SET updated_at = updated_at WHERE id = $1 RETURNING *")
            .bind(shipment_id)
            .fetch_optional(conn)
            .await?;
    shipment.ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("#{shipment_id}")))
}

/// The shipment currently carrying the order: the newest one that has not been replaced or cancelled, or failing
/// that, the newest one.
pub async fn fetch_active_shipment(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM shipments WHERE order_id = $1
        ORDER BY CASE WHEN status IN ('REPLACED', 'CANCELLED') THEN 1 ELSE 0 END, id DESC
        LIMIT 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_shipments_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Shipment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipments WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}

fn status_columns(status: ShipmentStatus) -> &'static str {
    match status {
        ShipmentStatus::Shipped => ", shipped_at = COALESCE(shipped_at, $2)",
        ShipmentStatus::Delivered => ", delivered_at = $2",
        ShipmentStatus::Investigation => ", investigation_opened_at = $2, requires_admin_action = 1",
        ShipmentStatus::Lost => ", marked_lost_at = $2, requires_admin_action = 1",
        ShipmentStatus::DeliveryFailed => ", delivery_attempts = delivery_attempts + 1",
        ShipmentStatus::PickupFailed => ", pickup_attempts = pickup_attempts + 1",
        _ => "",
    }
}

/// Writes the status and whatever bookkeeping goes with it. Does not check the state machine.
pub(crate) async fn update_status(
    shipment_id: i64,
    status: ShipmentStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    let sql = format!(
        "UPDATE shipments SET status = $1, updated_at = $2{} WHERE id = $3 RETURNING *",
        status_columns(status)
    );
    let shipment = sqlx::query_as(&sql).bind(status).bind(now).bind(shipment_id).fetch_one(conn).await?;
    debug!("🗃️ Shipment #{shipment_id} status set to {status}");
    Ok(shipment)
}

pub(crate) async fn set_tracking_number(
    shipment_id: i64,
    tracking_number: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as("UPDATE shipments SET tracking_number = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(tracking_number)
        .bind(now)
        .bind(shipment_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn set_draft_order_id(
    shipment_id: i64,
    draft_order_id: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as("UPDATE shipments SET draft_order_id = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(draft_order_id)
        .bind(now)
        .bind(shipment_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn set_pickup_deadline(
    shipment_id: i64,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as("UPDATE shipments SET pickup_deadline = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(deadline)
        .bind(now)
        .bind(shipment_id)
        .fetch_one(conn)
        .await
}

/// Stores the derived tracking figures. `last_update` only ever moves forward.
pub(crate) async fn record_tracking(
    shipment_id: i64,
    last_update: Option<DateTime<Utc>>,
    days_without_update: i64,
    stale: bool,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE shipments SET
            last_tracking_update = CASE
                WHEN $1 IS NULL THEN last_tracking_update
                WHEN last_tracking_update IS NULL OR julianday($1) > julianday(last_tracking_update) THEN $1
                ELSE last_tracking_update END,
            days_without_update = $2,
            tracking_stale = $3,
            updated_at = $4
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(last_update)
    .bind(days_without_update)
    .bind(stale)
    .bind(now)
    .bind(shipment_id)
    .fetch_one(conn)
    .await
}

pub(crate) async fn flag_for_admin(
    shipment_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as("UPDATE shipments SET requires_admin_action = 1, updated_at = $1 WHERE id = $2 RETURNING *")
        .bind(now)
        .bind(shipment_id)
        .fetch_one(conn)
        .await
}

/// Closes `original` as `REPLACED` and links it to its replacement.
pub(crate) async fn mark_replaced(
    original_id: i64,
    replacement_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE shipments SET
            status = 'REPLACED',
            reship_count = reship_count + 1,
            replaced_by_shipment_id = $1,
            updated_at = $2
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(replacement_id)
    .bind(now)
    .bind(original_id)
    .fetch_one(conn)
    .await
}

/// Shipments the tracking sweeper should look at, least recently touched first.
pub async fn fetch_trackable_shipments(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<Shipment>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM shipments
        WHERE status IN ('PICKUP_SCHEDULED', 'SHIPPED', 'IN_TRANSIT', 'OUT_FOR_DELIVERY', 'INVESTIGATION')
        ORDER BY updated_at, id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(conn)
    .await
}

//--------------------------------------        Alerts         ---------------------------------------------------------
pub(crate) async fn insert_alert(
    shipment: &Shipment,
    alert_type: AlertType,
    severity: AlertSeverity,
    message: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ShipmentAlert, sqlx::Error> {
    let alert: ShipmentAlert = sqlx::query_as(
        r#"
        INSERT INTO shipment_alerts (shipment_id, order_id, alert_type, severity, message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(shipment.id)
    .bind(shipment.order_id)
    .bind(alert_type)
    .bind(severity)
    .bind(message)
    .bind(now)
    .fetch_one(conn)
    .await?;
    warn!("🚚️ {severity} alert on shipment #{}: {message}", shipment.id);
    Ok(alert)
}

pub(crate) async fn has_open_alert(
    shipment_id: i64,
    alert_type: AlertType,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM shipment_alerts WHERE shipment_id = $1 AND alert_type = $2 AND resolved = 0",
    )
    .bind(shipment_id)
    .bind(alert_type)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

pub(crate) async fn resolve_alert(
    alert_id: i64,
    resolved_by: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<ShipmentAlert>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE shipment_alerts SET
            resolved = 1,
            resolved_by = COALESCE(resolved_by, $1),
            resolved_at = COALESCE(resolved_at, $2)
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(resolved_by)
    .bind(now)
    .bind(alert_id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_alerts_for_shipment(
    shipment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ShipmentAlert>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipment_alerts WHERE shipment_id = $1 ORDER BY id")
        .bind(shipment_id)
        .fetch_all(conn)
        .await
}

/// Unresolved alerts, most severe first.
pub async fn fetch_open_alerts(conn: &mut SqliteConnection) -> Result<Vec<ShipmentAlert>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM shipment_alerts WHERE resolved = 0
        ORDER BY CASE severity WHEN 'URGENT' THEN 0 WHEN 'CRITICAL' THEN 1 WHEN 'HIGH' THEN 2 ELSE 3 END, id
        "#,
    )
    .fetch_all(conn)
    .await
}

//--------------------------------------  Failures & disputes  ---------------------------------------------------------
pub(crate) async fn insert_courier_failure(
    shipment: &Shipment,
    failure_type: &str,
    description: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CourierFailure, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO courier_failures (shipment_id, provider_code, failure_type, description, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(shipment.id)
    .bind(&shipment.provider_code)
    .bind(failure_type)
    .bind(description)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_courier_failures(
    shipment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<CourierFailure>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM courier_failures WHERE shipment_id = $1 ORDER BY id")
        .bind(shipment_id)
        .fetch_all(conn)
        .await
}

pub(crate) async fn open_dispute(
    shipment: &Shipment,
    dispute_type: DisputeType,
    description: &str,
    opened_by: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Dispute, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO disputes (order_id, shipment_id, dispute_type, status, description, opened_by, created_at)
        VALUES ($1, $2, $3, 'OPEN', $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(shipment.order_id)
    .bind(shipment.id)
    .bind(dispute_type)
    .bind(description)
    .bind(opened_by)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_disputes_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Dispute>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM disputes WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await
}
