use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;
use tokio::time::Duration;

use crate::{
    db_types::Notification,
    traits::{NotificationTransport, OrderEngineDatabase, OrderEngineError, TransportError},
    zvr_api::sweep_objects::SweepReport,
};

pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// `NotificationApi` drains the notification outbox.
///
/// Rows are written by the order transitions themselves, at most one per order and event. This API only delivers
/// them: each pending row is sent once and marked `SENT` or `FAILED`. Failed rows stay put until an admin re-drives
/// them.
pub struct NotificationApi<B> {
    db: B,
    transport: Arc<dyn NotificationTransport>,
}

impl<B> Debug for NotificationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NotificationApi")
    }
}

impl<B> NotificationApi<B> {
    pub fn new(db: B, transport: Arc<dyn NotificationTransport>) -> Self {
        Self { db, transport }
    }
}

impl<B> NotificationApi<B>
where B: OrderEngineDatabase
{
    /// Sends up to `limit` pending notifications. `changed` in the report counts the ones that went out.
    pub async fn publish_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<SweepReport, OrderEngineError> {
        let pending = self.db.fetch_pending_notifications(limit).await?;
        let mut report = SweepReport::default();
        for notification in pending {
            match self.deliver(&notification, now).await {
                Ok(sent) => report.record_change(sent),
                Err(e) => {
                    error!("📬️ Could not update notification #{}. {e}", notification.id);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("📬️ Outbox pass: {report}");
        }
        Ok(report)
    }

    /// Puts a failed notification back in the queue. The next outbox pass sends it again.
    pub async fn redrive(&self, id: i64, now: DateTime<Utc>) -> Result<Notification, OrderEngineError> {
        let notification = self.db.redrive_notification(id, now).await?;
        info!("📬️ Notification #{id} ({}) re-queued", notification.event_kind);
        Ok(notification)
    }

    async fn deliver(&self, notification: &Notification, now: DateTime<Utc>) -> Result<bool, OrderEngineError> {
        let result = tokio::time::timeout(SEND_TIMEOUT, self.transport.send(notification))
            .await
            .unwrap_or_else(|_| Err(TransportError("Timed out".into())));
        match result {
            Ok(()) => {
                debug!(
                    "📬️ {} for order #{} sent to {}",
                    notification.event_kind, notification.order_id, notification.recipient
                );
                self.db.mark_notification_sent(notification.id, now).await?;
                Ok(true)
            },
            Err(e) => {
                warn!("📬️ {} for order #{} was not delivered. {e}", notification.event_kind, notification.order_id);
                self.db.mark_notification_failed(notification.id, &e.to_string(), now).await?;
                Ok(false)
            },
        }
    }
}
