//! Background workers: the four sweepers and the notification outbox publisher.
//!
//! Every worker is a single task driven by one timer. A tick that overruns its period makes the worker skip the
//! ticks it missed rather than queue them, so two passes of the same sweeper never overlap. A pass may take at most
//! one period; one that takes longer is abandoned with a warning and the next tick starts afresh.
//! [`WorkerHandle::stop`] lets the pass in flight finish, then ends the task.
use std::{sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, NaiveDate, Timelike, Utc};
use log::*;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use zvr_order_engine::{
    FulfillmentApi,
    NotificationApi,
    OrderFlowApi,
    PaymentApi,
    ReconciliationApi,
    SqliteDatabase,
};

/// Items handled per pass.
pub const SWEEP_BATCH: i64 = 100;
pub const PAYMENT_EXPIRY_PERIOD: StdDuration = StdDuration::from_secs(60);
pub const ORDER_EXPIRY_PERIOD: StdDuration = StdDuration::from_secs(5 * 60);
pub const TRACKING_REFRESH_PERIOD: StdDuration = StdDuration::from_secs(30 * 60);
/// The daily run is attempted every hour, and goes ahead once the configured hour has passed.
pub const RECONCILIATION_PERIOD: StdDuration = StdDuration::from_secs(60 * 60);
pub const OUTBOX_PERIOD: StdDuration = StdDuration::from_secs(15);

#[async_trait]
pub trait SweepJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>);
}

/// A running worker.
pub struct WorkerHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Asks the worker to stop and waits for it. Calling this more than once is harmless.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("🕰️ The {} worker did not shut down cleanly. {e}", self.name);
            }
            info!("🕰️ {} worker stopped", self.name);
        }
    }
}

/// Starts `job` on its own task. The first pass runs straight away. When `wake` is given, notifying it triggers an
/// extra pass without waiting for the timer.
pub fn start_worker<J: SweepJob>(job: J, period: StdDuration, wake: Option<Arc<Notify>>) -> WorkerHandle {
    let name = job.name();
    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let wake = wake.unwrap_or_default();
        info!("🕰️ {name} worker started. Runs every {}s", period.as_secs());
        loop {
            tokio::select! {
                biased;
                _ = stopped.changed() => break,
                _ = timer.tick() => trace!("🕰️ {name} tick"),
                _ = wake.notified() => trace!("🕰️ {name} woken up"),
            }
            if tokio::time::timeout(period, job.run(Utc::now())).await.is_err() {
                warn!("🕰️ {name} pass took longer than {period:?} and was abandoned");
            }
        }
    });
    WorkerHandle { name, stop, task: Mutex::new(Some(task)) }
}

/// Stops every worker in turn.
pub async fn stop_all(workers: &[WorkerHandle]) {
    for worker in workers {
        worker.stop().await;
    }
}

//----------------------------------------------   Jobs   -------------------------------------------------------------
pub struct PaymentExpiryJob {
    pub api: PaymentApi<SqliteDatabase>,
}

#[async_trait]
impl SweepJob for PaymentExpiryJob {
    fn name(&self) -> &'static str {
        "Payment expiry"
    }

    async fn run(&self, now: DateTime<Utc>) {
        if let Err(e) = self.api.sweep_expired_payments(now, SWEEP_BATCH).await {
            error!("🕰️ Error running the payment expiry sweep. {e}");
        }
    }
}

/// Expires unpaid orders and completes delivered ones that have sat long enough.
pub struct OrderExpiryJob {
    pub api: OrderFlowApi<SqliteDatabase>,
    pub order_expiry: Duration,
    pub auto_complete_after: Duration,
}

#[async_trait]
impl SweepJob for OrderExpiryJob {
    fn name(&self) -> &'static str {
        "Order expiry"
    }

    async fn run(&self, now: DateTime<Utc>) {
        if let Err(e) = self.api.expire_orders(now, self.order_expiry, SWEEP_BATCH).await {
            error!("🕰️ Error running the order expiry sweep. {e}");
        }
        if let Err(e) = self.api.auto_complete(now, self.auto_complete_after, SWEEP_BATCH).await {
            error!("🕰️ Error running the auto-complete sweep. {e}");
        }
    }
}

pub struct TrackingRefreshJob {
    pub api: FulfillmentApi<SqliteDatabase>,
}

#[async_trait]
impl SweepJob for TrackingRefreshJob {
    fn name(&self) -> &'static str {
        "Tracking refresh"
    }

    async fn run(&self, now: DateTime<Utc>) {
        if let Err(e) = self.api.refresh_tracking(now, SWEEP_BATCH).await {
            error!("🕰️ Error refreshing shipment tracking. {e}");
        }
    }
}

pub struct ReconciliationJob {
    pub api: ReconciliationApi<SqliteDatabase>,
    /// UTC hour from which the previous day may be reconciled.
    pub hour: u32,
}

/// The day to reconcile at `now`, or `None` if it is still earlier than `hour`.
pub fn reconciliation_due_date(hour: u32, now: DateTime<Utc>) -> Option<NaiveDate> {
    if now.hour() < hour {
        return None;
    }
    now.date_naive().checked_sub_days(Days::new(1))
}

#[async_trait]
impl SweepJob for ReconciliationJob {
    fn name(&self) -> &'static str {
        "Daily reconciliation"
    }

    async fn run(&self, now: DateTime<Utc>) {
        let Some(date) = reconciliation_due_date(self.hour, now) else {
            trace!("🕰️ Too early to reconcile yesterday");
            return;
        };
        if let Err(e) = self.api.run_daily(date, now).await {
            error!("🕰️ Error reconciling {date}. {e}");
        }
    }
}

pub struct OutboxJob {
    pub api: NotificationApi<SqliteDatabase>,
}

#[async_trait]
impl SweepJob for OutboxJob {
    fn name(&self) -> &'static str {
        "Notification outbox"
    }

    async fn run(&self, now: DateTime<Utc>) {
        if let Err(e) = self.api.publish_pending(now, SWEEP_BATCH).await {
            error!("📬️ Error publishing notifications. {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;

    use super::*;

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl SweepJob for Counter {
        fn name(&self) -> &'static str {
            "Counter"
        }

        async fn run(&self, _now: DateTime<Utc>) {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn stop_waits_for_the_pass_in_flight_and_is_idempotent() {
        let runs = Arc::new(AtomicU32::new(0));
        let worker = start_worker(Counter(Arc::clone(&runs)), StdDuration::from_secs(3600), None);
        // The first tick fires immediately
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        worker.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        worker.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(worker.name(), "Counter");
    }

    #[tokio::test]
    async fn wake_triggers_an_extra_pass() {
        let runs = Arc::new(AtomicU32::new(0));
        let wake = Arc::new(Notify::new());
        let worker = start_worker(Counter(Arc::clone(&runs)), StdDuration::from_secs(3600), Some(Arc::clone(&wake)));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        wake.notify_one();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        stop_all(&[worker]).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    struct Stuck(Arc<AtomicU32>);

    #[async_trait]
    impl SweepJob for Stuck {
        fn name(&self) -> &'static str {
            "Stuck"
        }

        async fn run(&self, _now: DateTime<Utc>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_secs(3600)).await;
        }
    }

    #[tokio::test]
    async fn a_stuck_pass_is_abandoned_after_one_period() {
        let starts = Arc::new(AtomicU32::new(0));
        let worker = start_worker(Stuck(Arc::clone(&starts)), StdDuration::from_millis(40), None);
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        tokio::time::timeout(StdDuration::from_secs(1), worker.stop()).await.expect("Worker did not stop");
        assert!(starts.load(Ordering::SeqCst) >= 2, "The worker stalled on its first pass");
    }

    #[test]
    fn reconciliation_waits_for_the_configured_hour() {
        let early = Utc.with_ymd_and_hms(2024, 6, 11, 1, 30, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 11, 2, 0, 0).unwrap();
        assert_eq!(reconciliation_due_date(2, early), None);
        assert_eq!(reconciliation_due_date(2, late), NaiveDate::from_ymd_opt(2024, 6, 10));
        assert_eq!(reconciliation_due_date(0, early), NaiveDate::from_ymd_opt(2024, 6, 10));
    }
}
