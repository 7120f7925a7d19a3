use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{AdminActionType, AuditDraft, AuditLogEntry, Order, OrderStatusType, PaymentStatus, SyncType},
    events::EventProducers,
    helpers::{map_gateway_status, with_gateway_timeout},
    traits::{
        ErrorKind,
        OrderEngineDatabase,
        OrderEngineError,
        OrderRef,
        OrderTransition,
        PaymentGateway,
        PaymentOutcome,
        PaymentResolution,
        RefundCompletion,
        RefundRequest,
        ReshipOutcome,
        ReshipRequest,
    },
    zvr_api::{
        admin_objects::{
            AdminContext,
            AdminOutcome,
            ForceCancelRequest,
            ForceRefundRequest,
            ForceReshipRequest,
            ReconcileAction,
            ReconcilePaymentRequest,
        },
        errors::AdminActionError,
        refund_api::{RefundApi, RefundResult, Settlement},
    },
};

/// `AdminApi` carries out the four admin force-actions.
///
/// Every call is guarded by an optional idempotency key and leaves exactly one audit row behind:
/// * A key that was used before for the same action and target replays the earlier result without doing anything.
///   If that earlier attempt was refused, the refusal is returned again.
/// * A key that was used for something else is an `IdempotencyConflict`.
/// * A request that is refused (bad input, missing target, state that does not allow it) is committed as an audit row
///   with `success = false` and comes back as [`AdminActionError::Rejected`].
pub struct AdminApi<B> {
    db: B,
    gateway: Arc<dyn PaymentGateway>,
    refunds: RefundApi<B>,
    producers: EventProducers,
}

impl<B> Debug for AdminApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AdminApi")
    }
}

impl<B: Clone> AdminApi<B> {
    pub fn new(db: B, gateway: Arc<dyn PaymentGateway>, producers: EventProducers) -> Self {
        let refunds = RefundApi::new(db.clone(), Arc::clone(&gateway), producers.clone());
        Self { db, gateway, refunds, producers }
    }
}

impl<B> AdminApi<B>
where B: OrderEngineDatabase
{
    /// Cancels an order that has not shipped yet. Stock goes back on the shelf unless `restore_stock` is off.
    pub async fn force_cancel(
        &self,
        ctx: &AdminContext,
        request: ForceCancelRequest,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome<Order>, AdminActionError> {
        let order = self.fetch_order(&request.order).await?;
        let draft = order_draft(ctx, AdminActionType::ForceCancel, &order, &request.reason, request.idempotency_key);
        if let Some(previous) = self.replay(&draft).await? {
            return Ok(AdminOutcome::Replayed(previous));
        }
        if let Err(e) = require_reason(&request.reason) {
            return Err(self.reject(draft, e, now).await);
        }
        let mut transition = OrderTransition::new(OrderStatusType::Cancelled, ctx.actor())
            .with_reason(format!("Force cancelled by admin: {}", request.reason.trim()));
        if !request.restore_stock {
            transition = transition.keep_stock();
        }
        match self.db.admin_transition_order(order.id, transition, draft.clone(), now).await {
            Ok((outcome, audit)) => {
                info!("🛡️ {} force cancelled order {} (audit #{})", ctx.admin_email, order.order_code, audit.id);
                self.producers.publish_transition(&outcome, None).await;
                Ok(AdminOutcome::Applied { value: outcome.into_order(), audit })
            },
            Err(e) => Err(self.reject(draft, e, now).await),
        }
    }

    /// Refunds an order. The refund goes through the payment gateway unless `skip_gateway` is set or the order has
    /// no paid payment, in which case it is completed as a manual refund.
    pub async fn force_refund(
        &self,
        ctx: &AdminContext,
        request: ForceRefundRequest,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome<RefundCompletion>, AdminActionError> {
        let order = self.fetch_order(&request.order).await?;
        let reason = request.reason_detail.clone().unwrap_or_else(|| request.reason.to_string());
        let key = request.idempotency_key.clone();
        let draft = order_draft(ctx, AdminActionType::ForceRefund, &order, &reason, key.clone());
        if let Some(previous) = self.replay(&draft).await? {
            return Ok(AdminOutcome::Replayed(previous));
        }
        let has_paid_payment = match self.db.fetch_payments_for_order(order.id).await {
            Ok(payments) => payments.iter().any(|p| p.status == PaymentStatus::Paid),
            Err(e) => return Err(self.reject(draft, e, now).await),
        };
        let settlement =
            if request.skip_gateway || !has_paid_payment { Settlement::Manual } else { Settlement::Gateway };
        let refund_request = RefundRequest {
            order_id: order.id,
            refund_type: request.refund_type,
            reason: request.reason,
            reason_detail: request.reason_detail,
            amount: request.amount,
            items: request.items,
            idempotency_key: key,
            requested_by: ctx.actor(),
        };
        match self.refunds.process(refund_request, settlement, Some(draft.clone()), now).await {
            Ok(RefundResult::Completed(mut completion)) => match completion.audit.take() {
                Some(audit) => {
                    info!(
                        "🛡️ {} force refunded {} on order {} (audit #{})",
                        ctx.admin_email, completion.refund.refund_amount, order.order_code, audit.id
                    );
                    Ok(AdminOutcome::Applied { value: completion, audit })
                },
                // An already completed refund does not write a new audit row
                None => Err(self.reject(draft, already_settled(&completion.refund.refund_code), now).await),
            },
            Ok(RefundResult::Existing(refund)) | Ok(RefundResult::Pending(refund)) => {
                Err(self.reject(draft, already_settled(&refund.refund_code), now).await)
            },
            Err(e) => Err(self.reject(draft, e, now).await),
        }
    }

    /// Replaces a lost or returned shipment with a new one.
    pub async fn force_reship(
        &self,
        ctx: &AdminContext,
        request: ForceReshipRequest,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome<ReshipOutcome>, AdminActionError> {
        let shipment = self
            .db
            .fetch_shipment(request.shipment_id)
            .await?
            .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("#{}", request.shipment_id)))?;
        let draft = ctx.audit_draft(
            AdminActionType::ForceReship,
            "shipment",
            shipment.id,
            shipment.tracking_number.clone(),
            &request.reason,
            request.idempotency_key,
        );
        if let Some(previous) = self.replay(&draft).await? {
            return Ok(AdminOutcome::Replayed(previous));
        }
        if let Err(e) = require_reason(&request.reason) {
            return Err(self.reject(draft, e, now).await);
        }
        let reship = ReshipRequest {
            reason: request.reason.trim().to_string(),
            new_tracking_number: request.new_tracking_number,
            actor: ctx.actor(),
        };
        match self.db.reship(shipment.id, reship, Some(draft.clone()), now).await {
            Ok(mut outcome) => match outcome.audit.take() {
                Some(audit) => {
                    info!(
                        "🛡️ {} reshipped shipment #{} as #{} (audit #{})",
                        ctx.admin_email, outcome.original.id, outcome.replacement.id, audit.id
                    );
                    Ok(AdminOutcome::Applied { value: outcome, audit })
                },
                None => Err(OrderEngineError::InternalError("Reship did not write its audit row".into()).into()),
            },
            Err(e) => Err(self.reject(draft, e, now).await),
        }
    }

    /// Sets the status of the latest payment of an order by hand, or asks the gateway for it. The order follows the
    /// payment the same way it does for webhooks, including the admin override out of `EXPIRED`, `CANCELLED` and
    /// `FAILED` when the payment turns out to be paid.
    pub async fn reconcile_payment(
        &self,
        ctx: &AdminContext,
        request: ReconcilePaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome<PaymentOutcome>, AdminActionError> {
        let order = self.fetch_order(&request.order).await?;
        let draft = ctx.audit_draft(
            AdminActionType::ReconcilePayment,
            "order",
            order.id,
            Some(order.order_code.clone()),
            &request.reason,
            request.idempotency_key,
        );
        if let Some(previous) = self.replay(&draft).await? {
            return Ok(AdminOutcome::Replayed(previous));
        }
        let resolution = match self.admin_resolution(ctx, &order, &request.action, &request.reason).await {
            Ok(resolution) => resolution,
            Err(e) => return Err(self.reject(draft, e, now).await),
        };
        match self.db.admin_resolve_payment(resolution, draft.clone(), now).await {
            Ok((outcome, audit)) => {
                info!(
                    "🛡️ {} reconciled payment {} of order {} to {} (audit #{})",
                    ctx.admin_email,
                    outcome.payment().external_gateway_id,
                    order.order_code,
                    outcome.payment().status,
                    audit.id
                );
                if let PaymentOutcome::Applied { payment, order, .. } = &outcome {
                    self.producers.publish_transition(order, Some(payment)).await;
                }
                Ok(AdminOutcome::Applied { value: outcome, audit })
            },
            Err(e) => Err(self.reject(draft, e, now).await),
        }
    }

    async fn admin_resolution(
        &self,
        ctx: &AdminContext,
        order: &Order,
        action: &ReconcileAction,
        reason: &str,
    ) -> Result<PaymentResolution, OrderEngineError> {
        require_reason(reason)?;
        let target = OrderRef::Id(order.id);
        let status = match action {
            ReconcileAction::MarkPaid => PaymentStatus::Paid,
            ReconcileAction::MarkFailed => PaymentStatus::Failed,
            ReconcileAction::MarkExpired => PaymentStatus::Expired,
            ReconcileAction::SyncGateway => {
                let payment = self
                    .db
                    .fetch_latest_payment(order.id)
                    .await?
                    .ok_or_else(|| OrderEngineError::PaymentNotFound(format!("for order {}", order.order_code)))?;
                let status = with_gateway_timeout(self.gateway.get_status(&payment.external_gateway_id)).await?;
                let mapped = map_gateway_status(&status.transaction_status, status.fraud_status.as_deref())
                    .ok_or_else(|| {
                        OrderEngineError::ValidationError(format!(
                            "The gateway reports '{}', which does not map to a payment status",
                            status.transaction_status
                        ))
                    })?;
                debug!("🛡️ Gateway says {} for {}", status.transaction_status, payment.external_gateway_id);
                return Ok(PaymentResolution::new(target, mapped, SyncType::Admin, ctx.actor())
                    .for_external_id(payment.external_gateway_id)
                    .with_gateway_status(status.transaction_status)
                    .with_transaction_id(status.transaction_id)
                    .with_raw(status.raw)
                    .with_note(reason.trim())
                    .forced());
            },
        };
        Ok(PaymentResolution::new(target, status, SyncType::Admin, ctx.actor()).with_note(reason.trim()).forced())
    }

    /// Looks for an earlier attempt under the same idempotency key.
    async fn replay(&self, draft: &AuditDraft) -> Result<Option<AuditLogEntry>, AdminActionError> {
        let Some(key) = draft.idempotency_key.as_deref() else {
            return Ok(None);
        };
        let Some(previous) = self.db.fetch_audit_by_idempotency_key(key).await? else {
            return Ok(None);
        };
        let same_request = previous.action_type == draft.action_type &&
            previous.target_type == draft.target_type &&
            previous.target_id == draft.target_id;
        if !same_request {
            warn!("🛡️ Idempotency key {key} was already used for {} on {}", previous.action_type, previous.target_type);
            return Err(OrderEngineError::IdempotencyConflict(key.to_string()).into());
        }
        if previous.success {
            info!("🛡️ Replaying {} (audit #{}) for idempotency key {key}", previous.action_type, previous.id);
            Ok(Some(previous))
        } else {
            let reason = previous.error_message.unwrap_or_default();
            Err(AdminActionError::Rejected { audit_id: previous.id, reason, kind: ErrorKind::Conflict })
        }
    }

    /// Commits a `success = false` audit row for a refused request. Failures that say nothing about the request
    /// itself (database errors, key clashes) are passed through without an audit row.
    async fn reject(&self, draft: AuditDraft, error: OrderEngineError, now: DateTime<Utc>) -> AdminActionError {
        if !error.is_rejection() || matches!(error, OrderEngineError::IdempotencyConflict(_)) {
            error!("🛡️ {} on {} #{} failed. {error}", draft.action_type, draft.target_type, draft.target_id);
            return error.into();
        }
        let reason = error.to_string();
        let (action, target, id) = (draft.action_type, draft.target_type.clone(), draft.target_id);
        match self.db.record_failed_admin_action(draft, &reason, now).await {
            Ok(entry) => {
                warn!("🛡️ {action} on {target} #{id} was rejected (audit #{}). {reason}", entry.id);
                AdminActionError::Rejected { audit_id: entry.id, reason, kind: error.kind() }
            },
            Err(e) => {
                error!("🛡️ Could not record the rejected {action} on {target} #{id}. {e}");
                error.into()
            },
        }
    }

    async fn fetch_order(&self, order: &OrderRef) -> Result<Order, OrderEngineError> {
        self.db.fetch_order(order).await?.ok_or_else(|| OrderEngineError::OrderNotFound(order.to_string()))
    }
}

fn order_draft(
    ctx: &AdminContext,
    action: AdminActionType,
    order: &Order,
    reason: &str,
    idempotency_key: Option<String>,
) -> AuditDraft {
    ctx.audit_draft(action, "order", order.id, Some(order.order_code.clone()), reason, idempotency_key)
}

fn require_reason(reason: &str) -> Result<(), OrderEngineError> {
    if reason.trim().is_empty() {
        return Err(OrderEngineError::ValidationError("Admin actions need a reason".into()));
    }
    Ok(())
}

fn already_settled(refund_code: &str) -> OrderEngineError {
    OrderEngineError::ValidationError(format!("Refund {refund_code} has already been booked"))
}
