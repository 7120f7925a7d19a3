use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqliteConnection;
use zvr_common::Rupiah;

use super::payments;
use crate::{
    db_types::{Order, Payment, ReconciliationLog, ReconciliationStatus},
    traits::{NewReconciliationLog, ReconciliationFigures},
};

const ORPHAN_ORDER_AGE_HOURS: i64 = 1;
const STUCK_PAYMENT_AGE_HOURS: i64 = 2;
const MAX_LISTED: i64 = 500;

async fn count_in_window(
    sql: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as(sql).bind(from).bind(to).fetch_one(conn).await
}

/// Counts and sums for `[from, to)`, plus the orphan and stuck lists as they stand at `now`.
pub async fn figures(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ReconciliationFigures, sqlx::Error> {
    let (total_orders, _) = count_in_window(
        "SELECT COUNT(*), 0 FROM orders WHERE julianday(created_at) >= julianday($1) AND julianday(created_at) < \
         julianday($2)",
        from,
        to,
        conn,
    )
    .await?;
    let (paid_orders, expected) = count_in_window(
        "SELECT COUNT(*), COALESCE(SUM(total_amount), 0) FROM orders WHERE paid_at IS NOT NULL AND \
         julianday(paid_at) >= julianday($1) AND julianday(paid_at) < julianday($2)",
        from,
        to,
        conn,
    )
    .await?;
    let (total_payments, _) = count_in_window(
        "SELECT COUNT(*), 0 FROM payments WHERE julianday(created_at) >= julianday($1) AND julianday(created_at) < \
         julianday($2)",
        from,
        to,
        conn,
    )
    .await?;
    let (paid_payments, collected) = count_in_window(
        "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM payments WHERE status = 'PAID' AND paid_at IS NOT NULL AND \
         julianday(paid_at) >= julianday($1) AND julianday(paid_at) < julianday($2)",
        from,
        to,
        conn,
    )
    .await?;
    let (completed_refunds, refunded) = count_in_window(
        "SELECT COUNT(*), COALESCE(SUM(refund_amount), 0) FROM refunds WHERE status = 'COMPLETED' AND completed_at \
         IS NOT NULL AND julianday(completed_at) >= julianday($1) AND julianday(completed_at) < julianday($2)",
        from,
        to,
        conn,
    )
    .await?;
    let orphan_orders: Vec<Order> = sqlx::query_as(
        r#"
        SELECT * FROM orders o
        WHERE o.status = 'PENDING' AND julianday(o.created_at) < julianday($1)
            AND NOT EXISTS (SELECT 1 FROM payments p WHERE p.order_id = o.id)
        ORDER BY o.id
        LIMIT $2
        "#,
    )
    .bind(now - Duration::hours(ORPHAN_ORDER_AGE_HOURS))
    .bind(MAX_LISTED)
    .fetch_all(&mut *conn)
    .await?;
    let orphan_payments: Vec<Payment> = sqlx::query_as(
        r#"
        SELECT p.* FROM payments p JOIN orders o ON o.id = p.order_id
        WHERE p.status = 'PAID' AND o.status IN ('CANCELLED', 'EXPIRED', 'FAILED')
        ORDER BY p.id
        LIMIT $1
        "#,
    )
    .bind(MAX_LISTED)
    .fetch_all(&mut *conn)
    .await?;
    let stuck_payments =
        payments::fetch_stuck_payments(now - Duration::hours(STUCK_PAYMENT_AGE_HOURS), MAX_LISTED, conn).await?;
    Ok(ReconciliationFigures {
        total_orders,
        paid_orders,
        total_payments,
        paid_payments,
        completed_refunds,
        expected_revenue: Rupiah::from(expected),
        collected_revenue: Rupiah::from(collected),
        refunded_amount: Rupiah::from(refunded),
        orphan_orders,
        orphan_payments,
        stuck_payments,
    })
}

pub(crate) async fn insert_log(
    log: &NewReconciliationLog,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ReconciliationLog, sqlx::Error> {
    let status =
        if log.has_mismatches() { ReconciliationStatus::MismatchesFound } else { ReconciliationStatus::Balanced };
    let f = &log.figures;
    sqlx::query_as(
        r#"
        INSERT INTO reconciliation_logs (
            reconciliation_date, status, total_orders, paid_orders, total_payments, paid_payments, completed_refunds,
            expected_revenue, collected_revenue, revenue_variance, orphan_orders, orphan_payments, stuck_payments,
            auto_resolved, unresolved, details, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(log.reconciliation_date)
    .bind(status)
    .bind(f.total_orders)
    .bind(f.paid_orders)
    .bind(f.total_payments)
    .bind(f.paid_payments)
    .bind(f.completed_refunds)
    .bind(f.expected_revenue)
    .bind(f.collected_revenue)
    .bind(log.revenue_variance())
    .bind(f.orphan_orders.len() as i64)
    .bind(f.orphan_payments.len() as i64)
    .bind(f.stuck_payments.len() as i64)
    .bind(log.auto_resolved)
    .bind(log.unresolved)
    .bind(log.details.to_json_string())
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_logs(date: NaiveDate, conn: &mut SqliteConnection) -> Result<Vec<ReconciliationLog>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM reconciliation_logs WHERE reconciliation_date = $1 ORDER BY id")
        .bind(date)
        .fetch_all(conn)
        .await
}
