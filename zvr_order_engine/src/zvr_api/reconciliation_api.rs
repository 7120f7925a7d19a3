use std::fmt::Debug;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use log::*;
use serde_json::json;

use crate::{
    db_types::{Metadata, ReconciliationLog},
    traits::{NewReconciliationLog, OrderEngineDatabase, OrderEngineError, ReconciliationFigures},
    zvr_api::{payment_api::PaymentApi, sweep_objects::SweepReport},
};

/// Payments still pending this long after creation are asked about at the gateway before the figures are taken.
pub const STUCK_PAYMENT_HOURS: i64 = 2;
const STUCK_PAYMENT_BATCH: i64 = 100;

/// `ReconciliationApi` compares what the shop expected to collect on a given day with what the payment gateway says
/// was collected, and writes one reconciliation log row per run.
pub struct ReconciliationApi<B> {
    db: B,
    payments: PaymentApi<B>,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi")
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(db: B, payments: PaymentApi<B>) -> Self {
        Self { db, payments }
    }
}

impl<B> ReconciliationApi<B>
where B: OrderEngineDatabase
{
    /// The daily sweeper entry point. A day that has been reconciled already is not reconciled again; the latest log
    /// for it is returned instead.
    pub async fn run_daily(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<ReconciliationLog, OrderEngineError> {
        if let Some(log) = self.db.fetch_reconciliation_logs(date).await?.pop() {
            debug!("🕰️ {date} was reconciled already (log #{})", log.id);
            return Ok(log);
        }
        self.reconcile(date, now).await
    }

    /// Reconciles the UTC day `date`, whether or not it has been done before.
    ///
    /// Stuck payments are first resolved against the gateway, so the figures reflect everything the gateway knows.
    /// Whatever is still stuck afterwards, plus any paid payment on a dead order, counts as unresolved.
    pub async fn reconcile(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<ReconciliationLog, OrderEngineError> {
        let resolved = self
            .payments
            .auto_resolve_stuck(now, Duration::hours(STUCK_PAYMENT_HOURS), STUCK_PAYMENT_BATCH)
            .await?;
        let from = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let to = from + Duration::days(1);
        let figures = self.db.reconciliation_figures(from, to, now).await?;
        let unresolved = (figures.stuck_payments.len() + figures.orphan_payments.len()) as i64;
        let details = mismatch_details(&figures, &resolved);
        let auto_resolved = resolved.changed as i64;
        let new_log = NewReconciliationLog { reconciliation_date: date, figures, auto_resolved, unresolved, details };
        if new_log.has_mismatches() {
            warn!(
                "🕰️ Reconciliation for {date} found mismatches: {} unresolved, {} orphan orders, variance {}",
                new_log.unresolved,
                new_log.figures.orphan_orders.len(),
                new_log.revenue_variance()
            );
        }
        let log = self.db.insert_reconciliation_log(new_log, now).await?;
        info!(
            "🕰️ Reconciliation for {date}: {} orders, {} paid, expected {} collected {} ({})",
            log.total_orders, log.paid_orders, log.expected_revenue, log.collected_revenue, log.status
        );
        Ok(log)
    }
}

fn mismatch_details(figures: &ReconciliationFigures, resolved: &SweepReport) -> Metadata {
    let orphan_orders = figures
        .orphan_orders
        .iter()
        .map(|o| json!({ "order_id": o.id, "order_code": o.order_code, "total_amount": o.total_amount }))
        .collect::<Vec<_>>();
    let orphan_payments = figures
        .orphan_payments
        .iter()
        .map(|p| json!({ "payment_id": p.id, "order_id": p.order_id, "external_id": p.external_gateway_id }))
        .collect::<Vec<_>>();
    let stuck_payments = figures
        .stuck_payments
        .iter()
        .map(|p| json!({ "payment_id": p.id, "order_id": p.order_id, "created_at": p.created_at }))
        .collect::<Vec<_>>();
    Metadata::new()
        .with("orphan_orders", orphan_orders)
        .with("orphan_payments", orphan_payments)
        .with("stuck_payments", stuck_payments)
        .with("refunded_amount", figures.refunded_amount)
        .with("revenue_variance", figures.collected_revenue - figures.expected_revenue)
        .with("auto_resolve", resolved)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::Rupiah;

    #[test]
    fn details_carry_the_variance_and_sweep_report() {
        let figures = ReconciliationFigures {
            expected_revenue: Rupiah::from(430_000),
            collected_revenue: Rupiah::from(215_000),
            ..Default::default()
        };
        let report = SweepReport { examined: 2, changed: 1, errors: 1 };
        let details = mismatch_details(&figures, &report);
        assert_eq!(details.get_i64("revenue_variance"), Some(-215_000));
        assert_eq!(details.get_as::<SweepReport>("auto_resolve"), Some(report));
        assert_eq!(details.get_as::<Vec<serde_json::Value>>("orphan_orders"), Some(vec![]));
    }
}
