use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    db_types::{Actor, Order, OrderStatusType},
    events::EventProducers,
    traits::{OrderEngineDatabase, OrderEngineError, OrderRef, OrderTransition, TransitionOutcome},
    zvr_api::sweep_objects::SweepReport,
};

/// `OrderFlowApi` moves orders along their lifecycle outside of the payment and shipping flows: customer cancellation,
/// packing, delivery, completion, and the two order sweeps.
pub struct OrderFlowApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> OrderFlowApi<B>
where B: OrderEngineDatabase
{
    pub async fn fetch_order(&self, order: &OrderRef) -> Result<Order, OrderEngineError> {
        self.db.fetch_order(order).await?.ok_or_else(|| OrderEngineError::OrderNotFound(order.to_string()))
    }

    /// Applies a transition and publishes the matching engine event once it has committed.
    pub async fn transition(
        &self,
        order_id: i64,
        transition: OrderTransition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, OrderEngineError> {
        let outcome = self.db.transition_order(order_id, transition, now).await?;
        self.producers.publish_transition(&outcome, None).await;
        Ok(outcome)
    }

    /// A customer may cancel their own order while it is still waiting for payment. Orders of other customers are
    /// reported as not found.
    pub async fn cancel_order_by_customer(
        &self,
        order: &OrderRef,
        user_id: Option<i64>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let current = self.fetch_order(order).await?;
        if current.user_id.is_some() && current.user_id != user_id {
            warn!("🔄️ Customer {user_id:?} tried to cancel order {}, which is not theirs", current.order_code);
            return Err(OrderEngineError::OrderNotFound(order.to_string()));
        }
        if !current.status.can_be_cancelled_by_customer() && current.status != OrderStatusType::Cancelled {
            return Err(OrderEngineError::invalid_order_transition(
                current.id,
                current.status,
                OrderStatusType::Cancelled,
            ));
        }
        let transition = OrderTransition::new(OrderStatusType::Cancelled, Actor::customer(current.user_id))
            .with_reason(format!("Cancelled by customer: {reason}"));
        let outcome = self.transition(current.id, transition, now).await?;
        Ok(outcome.into_order())
    }

    pub async fn pack_order(&self, order_id: i64, actor: Actor, now: DateTime<Utc>) -> Result<Order, OrderEngineError> {
        let transition = OrderTransition::new(OrderStatusType::Packing, actor).with_reason("Packing started");
        Ok(self.transition(order_id, transition, now).await?.into_order())
    }

    /// Marks a shipped order delivered by hand, for couriers that never report delivery.
    pub async fn mark_delivered(
        &self,
        order_id: i64,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let transition = OrderTransition::new(OrderStatusType::Delivered, actor).with_reason("Delivery confirmed");
        Ok(self.transition(order_id, transition, now).await?.into_order())
    }

    pub async fn complete_order(
        &self,
        order_id: i64,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let transition = OrderTransition::new(OrderStatusType::Completed, actor).with_reason("Order completed");
        Ok(self.transition(order_id, transition, now).await?.into_order())
    }

    /// Expires `PENDING` orders older than `max_age` and releases their stock. One transaction per order.
    pub async fn expire_orders(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
        limit: i64,
    ) -> Result<SweepReport, OrderEngineError> {
        let orders = self.db.fetch_expirable_orders(now - max_age, limit).await?;
        let mut report = SweepReport::default();
        let hours = max_age.num_hours();
        for order in orders {
            let transition = OrderTransition::new(OrderStatusType::Expired, Actor::system("order_expiry"))
                .with_reason(format!("Not paid within {hours} hours"));
            match self.transition(order.id, transition, now).await {
                Ok(outcome) => report.record_change(outcome.is_changed()),
                // A payment may have landed since the order was selected
                Err(OrderEngineError::InvalidTransition { .. }) => report.record_change(false),
                Err(e) => {
                    error!("🕰️ Could not expire order {}. {e}", order.order_code);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("🕰️ Order expiry pass: {report}");
        }
        Ok(report)
    }

    /// Completes orders that were delivered more than `grace` ago.
    pub async fn auto_complete(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        limit: i64,
    ) -> Result<SweepReport, OrderEngineError> {
        let orders = self.db.fetch_completable_orders(now - grace, limit).await?;
        let mut report = SweepReport::default();
        let days = grace.num_days();
        for order in orders {
            let transition = OrderTransition::new(OrderStatusType::Completed, Actor::system("auto_complete"))
                .with_reason(format!("Delivered more than {days} days ago"));
            match self.transition(order.id, transition, now).await {
                Ok(outcome) => report.record_change(outcome.is_changed()),
                Err(OrderEngineError::InvalidTransition { .. }) => report.record_change(false),
                Err(e) => {
                    error!("🕰️ Could not complete order {}. {e}", order.order_code);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("🕰️ Auto-complete pass: {report}");
        }
        Ok(report)
    }
}
