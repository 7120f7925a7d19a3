use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::*;
use zvr_common::Secret;

use crate::{
    db_types::{Actor, NewPayment, Order, OrderStatusType, Payment, PaymentStatus, SyncType},
    events::EventProducers,
    helpers::{map_gateway_status, new_external_gateway_id, verify_payment_signature, with_gateway_timeout},
    traits::{
        ChargeRequest,
        ChargeUpdate,
        CreatePaymentResult,
        CustomerDetails,
        GatewayError,
        GatewayStatus,
        OrderEngineDatabase,
        OrderEngineError,
        OrderRef,
        PaymentGateway,
        PaymentMethod,
        PaymentOutcome,
        PaymentResolution,
    },
    zvr_api::{
        payment_objects::WebhookNotification,
        sweep_objects::{RetryPolicy, SweepReport},
    },
};

/// How long a customer has to complete a charge.
pub const PAYMENT_WINDOW_HOURS: i64 = 24;
/// A webhook can beat the checkout commit by a few hundred milliseconds. It is retried this many times.
const WEBHOOK_ORDER_RETRIES: u32 = 3;
const WEBHOOK_RETRY_DELAY: tokio::time::Duration = tokio::time::Duration::from_millis(500);

/// `PaymentApi` owns every path by which a payment changes state: charge creation, gateway webhooks, manual status
/// checks, the payment-expiry sweep and the stuck-payment auto-resolver.
///
/// All of them end in [`OrderEngineDatabase::resolve_payment`], so they all obey the same rule: the first verdict to
/// reach a `PENDING` payment wins, and everything after it is a no-op.
pub struct PaymentApi<B> {
    db: B,
    gateway: Arc<dyn PaymentGateway>,
    producers: EventProducers,
    server_key: Secret<String>,
    provider: Option<String>,
    retry_policy: RetryPolicy,
}

impl<B> Debug for PaymentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentApi ({:?})", self.provider)
    }
}

impl<B> PaymentApi<B> {
    pub fn new(db: B, gateway: Arc<dyn PaymentGateway>, producers: EventProducers, server_key: Secret<String>) -> Self {
        Self { db, gateway, producers, server_key, provider: None, retry_policy: RetryPolicy::default() }
    }

    /// The provider name stored on new payment rows.
    pub fn with_provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl<B> PaymentApi<B>
where B: OrderEngineDatabase
{
    /// Starts a charge for a `PENDING` order.
    ///
    /// If the order already has a `PENDING` payment, that payment is returned and the gateway is not called again. If
    /// the gateway refuses the charge, the payment is marked `FAILED` and the order stays `PENDING`, so the customer
    /// can pick another method.
    pub async fn create_charge(
        &self,
        order: &OrderRef,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Payment, OrderEngineError> {
        if !method.is_supported() {
            return Err(OrderEngineError::UnsupportedPaymentMethod(method.kind));
        }
        let order = self.fetch_order(order).await?;
        if order.status != OrderStatusType::Pending {
            return Err(OrderEngineError::OrderAlreadyFinal { order_id: order.id, status: order.status });
        }
        let new_payment = NewPayment {
            order_id: order.id,
            payment_method: method.kind.clone(),
            provider: self.provider.clone(),
            bank: method.bank.clone(),
            external_gateway_id: new_external_gateway_id(&order.order_code, now),
            amount: order.total_amount,
            expiry_time: now + Duration::hours(PAYMENT_WINDOW_HOURS),
        };
        let payment = match self.db.begin_payment(new_payment, now).await? {
            CreatePaymentResult::Existing(payment) => return Ok(payment),
            CreatePaymentResult::Created(payment) => payment,
        };
        let request = ChargeRequest {
            external_id: payment.external_gateway_id.clone(),
            amount: payment.amount,
            method,
            customer: CustomerDetails {
                name: order.customer_name.clone(),
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
            },
        };
        match with_gateway_timeout(self.gateway.charge(request)).await {
            Ok(charge) => {
                let update = ChargeUpdate {
                    transaction_id: Some(charge.transaction_id),
                    bank: charge.bank,
                    va_number: charge.va_number,
                    qr_url: charge.qr_url,
                    expiry_time: charge.expiry_time,
                    raw: charge.raw,
                };
                let payment = self.db.attach_charge(payment.id, update, now).await?;
                let (external_id, amount) = (&payment.external_gateway_id, payment.amount);
                info!("💰️ Charge {external_id} created for order {} ({amount})", order.order_code);
                Ok(payment)
            },
            Err(e) => {
                if let Err(db_err) = self.db.fail_payment_attempt(payment.id, &e.to_string(), now).await {
                    error!("💰️ Could not mark payment #{} as failed. {db_err}", payment.id);
                }
                Err(e.into())
            },
        }
    }

    /// Applies a gateway notification.
    ///
    /// The signature is checked before anything else is read. Notifications for payments that are already final are
    /// accepted and ignored, which makes redelivery harmless.
    pub async fn handle_webhook(
        &self,
        notification: WebhookNotification,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, OrderEngineError> {
        let key = self.server_key.reveal();
        if !verify_payment_signature(&notification.signature_inputs, key, &notification.signature) {
            warn!("💰️ Rejected a webhook for {} with a bad signature", notification.external_id);
            return Err(OrderEngineError::InvalidSignature);
        }
        let status = map_gateway_status(&notification.transaction_status, notification.fraud_status.as_deref())
            .ok_or_else(|| {
                OrderEngineError::ValidationError(format!(
                    "Transaction status '{}' is not handled",
                    notification.transaction_status
                ))
            })?;
        let order_code = notification.order_code().to_string();
        let mut resolution =
            PaymentResolution::new(OrderRef::Code(order_code.clone()), status, SyncType::Webhook, Actor::webhook())
                .with_gateway_status(notification.transaction_status.clone())
                .with_transaction_id(notification.transaction_id.clone())
                .with_raw(notification.raw.clone());
        if order_code != notification.external_id {
            resolution = resolution.for_external_id(notification.external_id.clone());
        }
        let mut attempt = 0;
        let outcome = loop {
            match self.db.resolve_payment(resolution.clone(), now).await {
                Err(OrderEngineError::OrderNotFound(code)) if attempt < WEBHOOK_ORDER_RETRIES => {
                    attempt += 1;
                    debug!("💰️ Webhook for unknown order {code}. Retrying ({attempt}/{WEBHOOK_ORDER_RETRIES})");
                    tokio::time::sleep(WEBHOOK_RETRY_DELAY).await;
                },
                result => break result?,
            }
        };
        self.publish(&outcome).await;
        Ok(outcome)
    }

    /// Asks the gateway for the status of the order's latest payment and applies it. A gateway failure leaves the
    /// stored status as it was.
    pub async fn check_status(&self, order: &OrderRef, now: DateTime<Utc>) -> Result<PaymentOutcome, OrderEngineError> {
        let order = self.fetch_order(order).await?;
        let payment = self
            .db
            .fetch_latest_payment(order.id)
            .await?
            .ok_or_else(|| OrderEngineError::PaymentNotFound(format!("for order {}", order.order_code)))?;
        if payment.status.is_final() {
            return Ok(PaymentOutcome::AlreadyFinal(payment));
        }
        match with_gateway_timeout(self.gateway.get_status(&payment.external_gateway_id)).await {
            Ok(status) => {
                let actor = Actor::system("status_check");
                self.apply_gateway_status(&order, &payment, status, SyncType::ManualCheck, actor, now).await
            },
            Err(e) => {
                warn!("💰️ Status check for {} failed. Keeping {}. {e}", payment.external_gateway_id, payment.status);
                Ok(PaymentOutcome::StillPending(payment))
            },
        }
    }

    /// Expires `PENDING` payments whose window has closed, and their orders with them.
    pub async fn sweep_expired_payments(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<SweepReport, OrderEngineError> {
        let payments = self.db.fetch_expired_payments(now, limit).await?;
        let mut report = SweepReport::default();
        for payment in payments {
            let resolution = PaymentResolution::new(
                OrderRef::Id(payment.order_id),
                PaymentStatus::Expired,
                SyncType::ExpirySweeper,
                Actor::system("payment_expiry"),
            )
            .for_external_id(payment.external_gateway_id.clone())
            .with_note("Payment window closed");
            match self.db.resolve_payment(resolution, now).await {
                Ok(outcome) => {
                    report.record_change(matches!(outcome, PaymentOutcome::Applied { .. }));
                    self.publish(&outcome).await;
                },
                Err(e) => {
                    error!("🕰️ Could not expire payment #{}. {e}", payment.id);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("🕰️ Payment expiry pass: {report}");
        }
        Ok(report)
    }

    /// Polls the gateway for payments that have been `PENDING` for longer than `stuck_after`, and applies any final
    /// verdict it gives. Transient gateway failures are retried with exponential backoff.
    pub async fn auto_resolve_stuck(
        &self,
        now: DateTime<Utc>,
        stuck_after: Duration,
        limit: i64,
    ) -> Result<SweepReport, OrderEngineError> {
        let payments = self.db.fetch_stuck_payments(now - stuck_after, limit).await?;
        let mut report = SweepReport::default();
        for payment in payments {
            let status = match self.poll_with_backoff(&payment.external_gateway_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("🕰️ Gave up polling {} for now. {e}", payment.external_gateway_id);
                    report.record_error();
                    continue;
                },
            };
            let order = match self.db.fetch_order(&OrderRef::Id(payment.order_id)).await {
                Ok(Some(order)) => order,
                Ok(None) | Err(_) => {
                    error!("🕰️ Payment #{} points at order #{}, which cannot be read", payment.id, payment.order_id);
                    report.record_error();
                    continue;
                },
            };
            let actor = Actor::system("reconciliation");
            match self.apply_gateway_status(&order, &payment, status, SyncType::AutoResolve, actor, now).await {
                Ok(outcome) => report.record_change(matches!(outcome, PaymentOutcome::Applied { .. })),
                Err(e) => {
                    error!("🕰️ Could not apply the gateway status to payment #{}. {e}", payment.id);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("🕰️ Stuck payment pass: {report}");
        }
        Ok(report)
    }

    async fn poll_with_backoff(&self, external_id: &str) -> Result<GatewayStatus, GatewayError> {
        let mut attempt = 1;
        loop {
            match with_gateway_timeout(self.gateway.get_status(external_id)).await {
                Err(e) if e.is_transient() && attempt < self.retry_policy.max_attempts => {
                    let delay = self.retry_policy.delay_for(attempt);
                    debug!("💰️ Status poll for {external_id} failed ({e}). Retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                result => return result,
            }
        }
    }

    async fn apply_gateway_status(
        &self,
        order: &Order,
        payment: &Payment,
        status: GatewayStatus,
        sync_type: SyncType,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, OrderEngineError> {
        let Some(mapped) = map_gateway_status(&status.transaction_status, status.fraud_status.as_deref()) else {
            debug!(
                "💰️ Gateway status '{}' for {} means nothing to us. Leaving it",
                status.transaction_status, payment.external_gateway_id
            );
            return Ok(PaymentOutcome::StillPending(payment.clone()));
        };
        let resolution = PaymentResolution::new(OrderRef::Id(order.id), mapped, sync_type, actor)
            .for_external_id(payment.external_gateway_id.clone())
            .with_gateway_status(status.transaction_status)
            .with_transaction_id(status.transaction_id)
            .with_raw(status.raw);
        let outcome = self.db.resolve_payment(resolution, now).await?;
        self.publish(&outcome).await;
        Ok(outcome)
    }

    async fn fetch_order(&self, order: &OrderRef) -> Result<Order, OrderEngineError> {
        self.db.fetch_order(order).await?.ok_or_else(|| OrderEngineError::OrderNotFound(order.to_string()))
    }

    async fn publish(&self, outcome: &PaymentOutcome) {
        if let PaymentOutcome::Applied { payment, order, .. } = outcome {
            self.producers.publish_transition(order, Some(payment)).await;
        }
    }
}
