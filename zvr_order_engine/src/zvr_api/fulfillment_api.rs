use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{metadata_keys as keys, Actor, Metadata, Order, OrderStatusType, Shipment, ShipmentAlert},
    events::{EventProducers, ShipmentFlaggedEvent},
    helpers::{map_tracking_status, new_resi, validate_resi_input, with_gateway_timeout, MAX_CODE_ATTEMPTS},
    traits::{
        OrderEngineDatabase,
        OrderEngineError,
        OrderRef,
        OrderTransition,
        ShipmentMonitorPolicy,
        ShippingGateway,
        TrackingObservation,
        TrackingOutcome,
    },
    zvr_api::sweep_objects::SweepReport,
};

/// Where the resi of a shipped order came from. Stored on the order as a breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResiSource {
    /// Typed in by the admin who shipped the order.
    Admin,
    /// Set earlier with [`FulfillmentApi::assign_resi`].
    Assigned,
    /// The waybill returned when the draft order was confirmed.
    ShippingGateway,
    /// Generated here, because there was no draft order or it could not be confirmed.
    Local,
}

impl ResiSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResiSource::Admin => "admin",
            ResiSource::Assigned => "assigned",
            ResiSource::ShippingGateway => "shipping_gateway",
            ResiSource::Local => "local",
        }
    }
}

/// `FulfillmentApi` gets paid orders out of the door and keeps an eye on them afterwards: shipping with a resi,
/// pickup scheduling, courier tracking and the stuck/lost shipment monitor.
pub struct FulfillmentApi<B> {
    db: B,
    shipping: Arc<dyn ShippingGateway>,
    producers: EventProducers,
    policy: ShipmentMonitorPolicy,
}

impl<B> Debug for FulfillmentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FulfillmentApi ({:?})", self.policy)
    }
}

impl<B> FulfillmentApi<B> {
    pub fn new(db: B, shipping: Arc<dyn ShippingGateway>, producers: EventProducers) -> Self {
        Self { db, shipping, producers, policy: ShipmentMonitorPolicy::default() }
    }

    pub fn with_policy(mut self, policy: ShipmentMonitorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<B> FulfillmentApi<B>
where B: OrderEngineDatabase
{
    /// Ships a paid or packing order.
    ///
    /// The resi is, in order of preference: the one the admin typed in, one assigned earlier, the waybill from
    /// confirming the checkout draft order, or a locally generated one. Re-shipping an order that has already shipped
    /// with the same (or no) resi is a no-op. A different resi on any order at or past `SHIPPED` fails with
    /// `ResiLocked`.
    pub async fn ship_order(
        &self,
        order_id: i64,
        resi: Option<&str>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let requested = resi.map(validate_resi_input).transpose()?;
        let order = self.fetch_order(order_id).await?;
        // Delivered, completed and refunded orders never move back, so their resi cannot change under us
        if order.status.resi_is_locked() && order.status != OrderStatusType::Shipped {
            if let (Some(requested), Some(current)) = (&requested, &order.resi) {
                if requested != current {
                    return Err(OrderEngineError::ResiLocked { order_id, resi: current.clone() });
                }
            }
        }
        if order.status == OrderStatusType::Shipped {
            let mut transition = OrderTransition::new(OrderStatusType::Shipped, actor);
            if let Some(resi) = requested {
                transition = transition.with_resi(resi);
            }
            return Ok(self.db.transition_order(order_id, transition, now).await?.into_order());
        }
        if !matches!(order.status, OrderStatusType::Paid | OrderStatusType::Packing) {
            return Err(OrderEngineError::invalid_order_transition(order.id, order.status, OrderStatusType::Shipped));
        }
        let (mut resi, source, mut breadcrumbs) = self.choose_resi(&order, requested, now).await?;
        if order.status == OrderStatusType::Paid {
            let packing =
                OrderTransition::new(OrderStatusType::Packing, actor.clone()).with_reason("Packed for shipping");
            self.db.transition_order(order_id, packing, now).await?;
        }
        breadcrumbs.insert(keys::RESI_SOURCE, source.as_str());
        let mut attempts = 0;
        let outcome = loop {
            let transition = OrderTransition::new(OrderStatusType::Shipped, actor.clone())
                .with_resi(resi.clone())
                .with_reason(format!("Shipped with resi {resi}"))
                .with_metadata(breadcrumbs.clone());
            match self.db.transition_order(order_id, transition, now).await {
                Err(OrderEngineError::ValidationError(msg))
                    if source == ResiSource::Local && attempts < MAX_CODE_ATTEMPTS =>
                {
                    attempts += 1;
                    warn!("🚚️ Local resi {resi} was rejected ({msg}). Generating another");
                    resi = new_resi(&courier_of(&order), order.id, now);
                },
                result => break result?,
            }
        };
        self.producers.publish_transition(&outcome, None).await;
        Ok(outcome.into_order())
    }

    async fn choose_resi(
        &self,
        order: &Order,
        requested: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(String, ResiSource, Metadata), OrderEngineError> {
        if let Some(resi) = requested {
            return Ok((resi, ResiSource::Admin, Metadata::new()));
        }
        if let Some(resi) = &order.resi {
            return Ok((resi.clone(), ResiSource::Assigned, Metadata::new()));
        }
        let shipment = self.active_shipment(order).await?;
        let reason = match shipment.draft_order_id.as_deref() {
            Some(draft_id) => match with_gateway_timeout(self.shipping.confirm_draft_order(draft_id)).await {
                Ok(confirmed) => match validate_resi_input(&confirmed.waybill_id) {
                    Ok(waybill) => return Ok((waybill, ResiSource::ShippingGateway, Metadata::new())),
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            },
            None => "No draft order was registered at checkout".to_string(),
        };
        warn!("🚚️ Falling back to a local resi for order {}. {reason}", order.order_code);
        let fallback = Metadata::new().with("reason", reason).with("at", now);
        let breadcrumbs = Metadata::new().with(keys::RESI_FALLBACK, fallback);
        Ok((new_resi(&shipment.provider_code, order.id, now), ResiSource::Local, breadcrumbs))
    }

    /// Sets the resi ahead of shipping, for couriers that hand out waybills at pickup booking.
    pub async fn assign_resi(
        &self,
        order_id: i64,
        resi: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderEngineError> {
        let resi = validate_resi_input(resi)?;
        self.db.assign_resi(order_id, &resi, actor, now).await
    }

    pub async fn schedule_pickup(
        &self,
        order_id: i64,
        deadline: DateTime<Utc>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Shipment, OrderEngineError> {
        if deadline <= now {
            return Err(OrderEngineError::ValidationError("The pickup deadline must be in the future".into()));
        }
        let shipment = self.db.schedule_pickup(order_id, deadline, actor, now).await?;
        info!("🚚️ Pickup for shipment #{} booked before {deadline}", shipment.id);
        Ok(shipment)
    }

    /// One pass of the tracking refresh: polls the courier for every shipment in transit and runs the monitor.
    pub async fn refresh_tracking(&self, now: DateTime<Utc>, limit: i64) -> Result<SweepReport, OrderEngineError> {
        let shipments = self.db.fetch_trackable_shipments(limit).await?;
        let mut report = SweepReport::default();
        for shipment in shipments {
            match self.refresh_shipment(&shipment, now).await {
                Ok(outcome) => {
                    let changed = outcome.shipment.status != shipment.status || !outcome.alerts.is_empty();
                    report.record_change(changed);
                },
                Err(e) => {
                    error!("🕰️ Could not refresh tracking for shipment #{}. {e}", shipment.id);
                    report.record_error();
                },
            }
        }
        if !report.is_idle() {
            info!("🕰️ Tracking refresh pass: {report}");
        }
        Ok(report)
    }

    /// Polls the courier for one shipment. When the courier cannot be reached the monitor still runs, on the
    /// information already stored.
    pub async fn refresh_shipment(
        &self,
        shipment: &Shipment,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome, OrderEngineError> {
        let observation = match shipment.tracking_number.as_deref() {
            Some(waybill) => match with_gateway_timeout(self.shipping.track(waybill)).await {
                Ok(info) => Some(TrackingObservation {
                    status: map_tracking_status(&info.status),
                    courier_status: info.status,
                    last_update: info.last_update,
                }),
                Err(e) => {
                    warn!("🚚️ Tracking lookup for {waybill} failed. {e}");
                    None
                },
            },
            None => None,
        };
        let outcome = self.db.apply_tracking(shipment.id, observation, self.policy, now).await?;
        for alert in &outcome.alerts {
            warn!("🚚️ Shipment #{} flagged: {} ({})", shipment.id, alert.alert_type, alert.message);
            let event = ShipmentFlaggedEvent { shipment: outcome.shipment.clone(), alert: alert.alert_type };
            self.producers.publish_shipment_flagged(event).await;
        }
        Ok(outcome)
    }

    pub async fn resolve_alert(
        &self,
        alert_id: i64,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ShipmentAlert, OrderEngineError> {
        self.db.resolve_alert(alert_id, actor, now).await
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Order, OrderEngineError> {
        self.db
            .fetch_order(&OrderRef::Id(order_id))
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(format!("#{order_id}")))
    }

    async fn active_shipment(&self, order: &Order) -> Result<Shipment, OrderEngineError> {
        self.db
            .fetch_shipments_for_order(order.id)
            .await?
            .into_iter()
            .rev()
            .find(|s| s.replaced_by_shipment_id.is_none())
            .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("for order {}", order.order_code)))
    }
}

fn courier_of(order: &Order) -> String {
    order.metadata.courier().map(|c| c.courier_code).unwrap_or_default()
}
