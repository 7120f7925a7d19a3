use serde::{Deserialize, Serialize};
use zvr_common::Rupiah;

use crate::{
    db_types::{Actor, AdminActionType, AuditDraft, AuditLogEntry, RefundReason, RefundType},
    traits::{OrderRef, RefundLine},
};

/// Who is acting, and from where. Taken from the authenticated admin session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminContext {
    pub admin_id: i64,
    pub admin_email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AdminContext {
    pub fn actor(&self) -> Actor {
        Actor::admin(&self.admin_email)
    }

    pub fn audit_draft(
        &self,
        action_type: AdminActionType,
        target_type: &str,
        target_id: i64,
        target_code: Option<String>,
        reason: &str,
        idempotency_key: Option<String>,
    ) -> AuditDraft {
        AuditDraft {
            admin_id: self.admin_id,
            admin_email: self.admin_email.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            action_type,
            target_type: target_type.to_string(),
            target_id,
            target_code,
            reason: Some(reason.to_string()),
            idempotency_key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceCancelRequest {
    pub order: OrderRef,
    pub reason: String,
    /// Put reserved stock back on the shelf.
    pub restore_stock: bool,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceRefundRequest {
    pub order: OrderRef,
    pub refund_type: RefundType,
    pub reason: RefundReason,
    pub reason_detail: Option<String>,
    pub amount: Option<Rupiah>,
    #[serde(default)]
    pub items: Vec<RefundLine>,
    /// Settle the refund by bank transfer instead of through the payment gateway.
    #[serde(default)]
    pub skip_gateway: bool,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceReshipRequest {
    pub shipment_id: i64,
    pub reason: String,
    pub new_tracking_number: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileAction {
    MarkPaid,
    MarkFailed,
    MarkExpired,
    /// Ask the gateway and apply whatever it says.
    SyncGateway,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilePaymentRequest {
    pub order: OrderRef,
    pub action: ReconcileAction,
    pub reason: String,
    pub idempotency_key: Option<String>,
}

/// The result of an admin force-action.
#[derive(Debug, Clone)]
pub enum AdminOutcome<T> {
    /// The action ran now. `audit` holds the before and after state.
    Applied { value: T, audit: AuditLogEntry },
    /// The idempotency key had been used for this action before. Nothing was done; this is the earlier audit row.
    Replayed(AuditLogEntry),
}

impl<T> AdminOutcome<T> {
    pub fn audit(&self) -> &AuditLogEntry {
        match self {
            AdminOutcome::Applied { audit, .. } | AdminOutcome::Replayed(audit) => audit,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            AdminOutcome::Applied { value, .. } => Some(value),
            AdminOutcome::Replayed(_) => None,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, AdminOutcome::Replayed(_))
    }
}
