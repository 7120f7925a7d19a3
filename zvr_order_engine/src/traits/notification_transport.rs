use async_trait::async_trait;
use thiserror::Error;

use crate::db_types::Notification;

#[derive(Debug, Clone, Error)]
#[error("Notification could not be delivered. {0}")]
pub struct TransportError(pub String);

/// Delivers one outbox row to the customer (email, push, whatever the server wires in). Template rendering is the
/// transport's business.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), TransportError>;
}
