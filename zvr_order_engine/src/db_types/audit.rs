use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db_enum;
use crate::db_types::Metadata;

db_enum! {
    AdminActionType {
        ForceCancel => "FORCE_CANCEL",
        ForceRefund => "FORCE_REFUND",
        ForceReship => "FORCE_RESHIP",
        ReconcilePayment => "RECONCILE_PAYMENT",
    }
}

db_enum! {
    HistoryEntity {
        Order => "order",
        Shipment => "shipment",
        Refund => "refund",
    }
}

/// One row of the append-only admin audit log.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub admin_id: i64,
    pub admin_email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub action_type: AdminActionType,
    pub target_type: String,
    pub target_id: i64,
    pub target_code: Option<String>,
    #[sqlx(try_from = "String")]
    pub state_before: Metadata,
    #[sqlx(try_from = "String")]
    pub state_after: Metadata,
    pub reason: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The parts of an audit row that are known before the action runs. The backend fills in the state maps and the
/// outcome.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub admin_id: i64,
    pub admin_email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub action_type: AdminActionType,
    pub target_type: String,
    pub target_id: i64,
    pub target_code: Option<String>,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: i64,
    pub entity_type: HistoryEntity,
    pub entity_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: String,
    pub reason: Option<String>,
    #[sqlx(try_from = "String")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}
