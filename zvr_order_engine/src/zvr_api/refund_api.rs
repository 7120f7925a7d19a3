use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{Actor, AuditDraft, HistoryEntity, Payment, Refund, RefundStatus},
    events::{EventProducers, RefundCompletedEvent},
    helpers::with_gateway_timeout,
    traits::{
        CreateRefundResult,
        GatewayError,
        GatewayRefundRequest,
        OrderEngineDatabase,
        OrderEngineError,
        PaymentGateway,
        RefundCompletion,
        RefundRequest,
    },
};

/// The reference stored on refunds that were settled outside the payment gateway.
pub const MANUAL_REFUND_REFERENCE: &str = "MANUAL_REFUND";

#[derive(Debug, Clone)]
pub enum RefundResult {
    /// The money went back and the ledger is updated.
    Completed(RefundCompletion),
    /// The refund is booked but waits for someone to settle it by hand.
    Pending(Refund),
    /// A refund with the same idempotency key was booked earlier. It is returned as it stands.
    Existing(Refund),
}

impl RefundResult {
    pub fn refund(&self) -> &Refund {
        match self {
            RefundResult::Completed(c) => &c.refund,
            RefundResult::Pending(r) | RefundResult::Existing(r) => r,
        }
    }
}

/// How a refund should be settled once it is booked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Settlement {
    /// Through the payment gateway when the order has a paid payment. Otherwise the refund is left pending.
    #[default]
    Gateway,
    /// The refund is booked and completed immediately with [`MANUAL_REFUND_REFERENCE`].
    Manual,
}

/// `RefundApi` books refunds against the refundable balance of an order and settles them.
pub struct RefundApi<B> {
    db: B,
    gateway: Arc<dyn PaymentGateway>,
    producers: EventProducers,
}

impl<B> Debug for RefundApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundApi")
    }
}

impl<B> RefundApi<B> {
    pub fn new(db: B, gateway: Arc<dyn PaymentGateway>, producers: EventProducers) -> Self {
        Self { db, gateway, producers }
    }
}

impl<B> RefundApi<B>
where B: OrderEngineDatabase
{
    /// Books a refund and sends it to the payment gateway straight away.
    pub async fn request_refund(
        &self,
        request: RefundRequest,
        now: DateTime<Utc>,
    ) -> Result<RefundResult, OrderEngineError> {
        self.process(request, Settlement::Gateway, None, now).await
    }

    /// Books a refund and settles it as `settlement` asks. When `audit` is given, the completion writes the audit
    /// entry in the same transaction.
    ///
    /// A gateway that cannot refund yet (settlement window still closed) parks the refund in `PENDING` and fails with
    /// `ManualRefundRequired`. Any other gateway failure marks the refund `FAILED`.
    pub async fn process(
        &self,
        request: RefundRequest,
        settlement: Settlement,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<RefundResult, OrderEngineError> {
        let actor = request.requested_by.clone();
        let via_gateway = settlement == Settlement::Gateway;
        let (refund, payment) = match self.db.create_refund(request, via_gateway, now).await? {
            CreateRefundResult::Existing(refund) => {
                info!("↩️ Refund {} was already booked under this idempotency key", refund.refund_code);
                return Ok(RefundResult::Existing(refund));
            },
            CreateRefundResult::Created { refund, payment } => (refund, payment),
        };
        info!(
            "↩️ Refund {} booked for order #{}: {} ({})",
            refund.refund_code, refund.order_id, refund.refund_amount, refund.status
        );
        match (refund.status, payment) {
            (RefundStatus::Processing, Some(payment)) => {
                self.refund_via_gateway(refund, &payment, &actor, audit, now).await.map(RefundResult::Completed)
            },
            (RefundStatus::Pending, _) if settlement == Settlement::Manual => {
                let completion = self.complete(refund.id, MANUAL_REFUND_REFERENCE, &actor, audit, now).await?;
                Ok(RefundResult::Completed(completion))
            },
            (RefundStatus::Processing, None) => Err(OrderEngineError::InternalError(format!(
                "Refund {} is processing without a payment to refund against",
                refund.refund_code
            ))),
            _ => {
                info!("↩️ Refund {} is waiting for manual settlement", refund.refund_code);
                Ok(RefundResult::Pending(refund))
            },
        }
    }

    /// Completes a `PENDING` refund that was paid out by hand, e.g. by bank transfer.
    pub async fn complete_manual_refund(
        &self,
        refund_id: i64,
        reference: Option<&str>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<RefundCompletion, OrderEngineError> {
        let refund = self.db.fetch_refund(refund_id).await?.ok_or(OrderEngineError::RefundNotFound(refund_id))?;
        if refund.status != RefundStatus::Pending && refund.status != RefundStatus::Completed {
            return Err(OrderEngineError::InvalidTransition {
                entity: HistoryEntity::Refund,
                id: refund.id,
                from: refund.status.to_string(),
                to: RefundStatus::Completed.to_string(),
            });
        }
        let reference = reference.map(str::trim).filter(|r| !r.is_empty()).unwrap_or(MANUAL_REFUND_REFERENCE);
        self.complete(refund_id, reference, actor, None, now).await
    }

    async fn refund_via_gateway(
        &self,
        refund: Refund,
        payment: &Payment,
        actor: &Actor,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<RefundCompletion, OrderEngineError> {
        let request = GatewayRefundRequest {
            refund_key: refund.refund_code.clone(),
            amount: refund.refund_amount,
            reason: refund.reason_detail.clone().unwrap_or_else(|| refund.reason.to_string()),
        };
        match with_gateway_timeout(self.gateway.refund(&payment.external_gateway_id, request)).await {
            Ok(response) => {
                debug!("↩️ Gateway accepted refund {} ({})", refund.refund_code, response.status);
                self.complete(refund.id, &response.chargeback_id, actor, audit, now).await
            },
            Err(GatewayError::SettlementWindowClosed) => {
                warn!("↩️ Refund {} cannot go through the gateway yet. Parking it for manual processing", refund.id);
                let note = "Settlement window closed. Manual processing required";
                self.db.defer_refund(refund.id, note, actor, now).await?;
                Err(OrderEngineError::ManualRefundRequired { refund_id: refund.id })
            },
            Err(e) => {
                error!("↩️ Gateway refund for {} failed. {e}", refund.refund_code);
                if let Err(fail_err) = self.db.fail_refund(refund.id, &e.to_string(), actor, now).await {
                    error!("↩️ Could not mark refund {} as failed. {fail_err}", refund.refund_code);
                }
                Err(e.into())
            },
        }
    }

    async fn complete(
        &self,
        refund_id: i64,
        reference: &str,
        actor: &Actor,
        audit: Option<AuditDraft>,
        now: DateTime<Utc>,
    ) -> Result<RefundCompletion, OrderEngineError> {
        let completion = self.db.complete_refund(refund_id, reference, actor, audit, now).await?;
        info!(
            "↩️ Refund {} completed with reference {reference}. Order {} has {} refunded",
            completion.refund.refund_code, completion.order.order_code, completion.order.refund_amount
        );
        let event = RefundCompletedEvent { refund: completion.refund.clone(), order: completion.order.clone() };
        self.producers.publish_refund_completed(event).await;
        Ok(completion)
    }
}
