//! Tracking updates, the stuck/lost/pickup detectors, and reships.
//!
//! As with [`super::transitions`], each function expects the order to be locked already, and takes the shipment
//! lock itself.
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use super::{history, shipments, transitions};
use crate::{
    db_types::{
        Actor,
        AlertSeverity,
        AlertType,
        DisputeType,
        HistoryEntity,
        Metadata,
        Order,
        OrderStatusType,
        Shipment,
        ShipmentAlert,
        ShipmentStatus,
    },
    state_machine::ShipmentActor,
    traits::{
        OrderEngineError,
        OrderTransition,
        ReshipRequest,
        ShipmentMonitorPolicy,
        TrackingObservation,
        TrackingOutcome,
    },
};

/// The loop guard on replacements of replacements.
pub const MAX_RESHIPS: i64 = 3;

/// Whole days since the last sign of life. Never negative.
pub fn days_without_update(shipment: &Shipment, now: DateTime<Utc>) -> i64 {
    (now - shipment.last_activity()).num_days().max(0)
}

/// Applies a courier lookup to a locked order's shipment and runs the detectors.
pub(crate) async fn apply_tracking_locked(
    order: Order,
    shipment_id: i64,
    observation: Option<TrackingObservation>,
    policy: ShipmentMonitorPolicy,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TrackingOutcome, OrderEngineError> {
    let mut shipment = shipments::lock_shipment(shipment_id, conn).await?;
    let mut outcome = TrackingOutcome { shipment: shipment.clone(), alerts: vec![], delivered_order: None };
    if !shipment.status.is_trackable() {
        debug!("🚚️ Shipment #{shipment_id} is {}. Not tracking it", shipment.status);
        return Ok(outcome);
    }
    let mut last_update = None;
    if let Some(observation) = observation {
        last_update = observation.last_update;
        if let Some(status) = observation.status.filter(|s| *s != shipment.status) {
            if ShipmentActor::Tracking.permits(shipment.status, status) {
                let reason = format!("Courier reported '{}'", observation.courier_status);
                let actor = Actor::tracking();
                let by = ShipmentActor::Tracking;
                shipment = transitions::move_shipment(&shipment, status, by, &actor, Some(&reason), now, conn).await?;
                last_update = last_update.or(Some(now));
                if status == ShipmentStatus::Delivered && order.status == OrderStatusType::Shipped {
                    let transition = OrderTransition::new(OrderStatusType::Delivered, actor).with_reason(reason);
                    let order = transitions::transition_locked_order(order, &transition, now, conn).await?;
                    outcome.delivered_order = Some(order.into_order());
                }
            } else {
                debug!(
                    "🚚️ Courier says shipment #{shipment_id} is {status}, which cannot follow {}. Ignoring",
                    shipment.status
                );
            }
        }
    }
    if let Some(at) = last_update {
        shipment.last_tracking_update = Some(shipment.last_tracking_update.map_or(at, |t| t.max(at)));
    }
    let days = days_without_update(&shipment, now);
    let stale = shipment.status.is_post_shipped() && days >= policy.stale_after_days;
    shipment = shipments::record_tracking(shipment.id, last_update, days, stale, now, conn).await?;
    run_detectors(&mut shipment, &mut outcome.alerts, days, policy, now, conn).await?;
    outcome.shipment = shipment;
    Ok(outcome)
}

async fn raise(
    shipment: &Shipment,
    alert_type: AlertType,
    severity: AlertSeverity,
    message: &str,
    alerts: &mut Vec<ShipmentAlert>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    if shipments::has_open_alert(shipment.id, alert_type, conn).await? {
        trace!("🚚️ Shipment #{} already has an open {alert_type} alert", shipment.id);
        return Ok(());
    }
    alerts.push(shipments::insert_alert(shipment, alert_type, severity, message, now, conn).await?);
    Ok(())
}

/// One step per pass: a shipment that has been silent for long enough goes to `INVESTIGATION` on one pass and to
/// `LOST` on a later one.
async fn run_detectors(
    shipment: &mut Shipment,
    alerts: &mut Vec<ShipmentAlert>,
    days: i64,
    policy: ShipmentMonitorPolicy,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), OrderEngineError> {
    let monitor = Actor::monitor();
    match shipment.status {
        ShipmentStatus::Shipped | ShipmentStatus::InTransit if days >= policy.investigate_after_days => {
            let reason = format!("No tracking update for {days} days");
            *shipment = transitions::move_shipment(
                shipment,
                ShipmentStatus::Investigation,
                ShipmentActor::Monitor,
                &monitor,
                Some(&reason),
                now,
                conn,
            )
            .await?;
            let message = format!("Shipment is stuck: {reason}. Contact the courier");
            raise(shipment, AlertType::StuckShipment, AlertSeverity::Critical, &message, alerts, now, conn).await?;
        },
        ShipmentStatus::Investigation if days >= policy.lost_after_days => {
            let reason = format!("No tracking update for {days} days while under investigation");
            *shipment = transitions::move_shipment(
                shipment,
                ShipmentStatus::Lost,
                ShipmentActor::Monitor,
                &monitor,
                Some(&reason),
                now,
                conn,
            )
            .await?;
            let message = format!("Shipment presumed lost: {reason}. Reship or refund");
            raise(shipment, AlertType::LostShipment, AlertSeverity::Urgent, &message, alerts, now, conn).await?;
            shipments::insert_courier_failure(shipment, "LOST", &reason, now, conn).await?;
            shipments::open_dispute(shipment, DisputeType::LostPackage, &reason, monitor.as_str(), now, conn).await?;
        },
        ShipmentStatus::PickupScheduled if shipment.pickup_deadline.is_some_and(|d| d < now) => {
            *shipment = transitions::move_shipment(
                shipment,
                ShipmentStatus::PickupFailed,
                ShipmentActor::Monitor,
                &monitor,
                Some("Courier missed the pickup deadline"),
                now,
                conn,
            )
            .await?;
            let attempts = shipment.pickup_attempts;
            let severity = if attempts >= policy.max_pickup_attempts {
                *shipment = shipments::flag_for_admin(shipment.id, now, conn).await?;
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            let message = format!("Pickup failed ({attempts} of {} attempts)", policy.max_pickup_attempts);
            shipments::insert_courier_failure(shipment, "PICKUP_FAILED", &message, now, conn).await?;
            let alert_type = AlertType::PickupFailed;
            alerts.push(shipments::insert_alert(shipment, alert_type, severity, &message, now, conn).await?);
        },
        status if status.is_post_shipped() && days >= policy.stale_after_days => {
            let message = format!("No tracking update for {days} days");
            raise(shipment, AlertType::TrackingStale, AlertSeverity::Info, &message, alerts, now, conn).await?;
        },
        _ => {},
    }
    Ok(())
}

/// Replaces a lost, returned or investigated shipment with a new `PROCESSING` one.
pub(crate) async fn reship_locked(
    shipment_id: i64,
    request: &ReshipRequest,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(Shipment, Shipment), OrderEngineError> {
    let original = shipments::lock_shipment(shipment_id, conn).await?;
    if !original.status.can_be_reshipped() {
        let reason =
            format!("Only lost, returned or investigated shipments can be reshipped. This one is {}", original.status);
        return Err(OrderEngineError::ReshipNotAllowed { id: shipment_id, reason });
    }
    if original.reship_count >= MAX_RESHIPS {
        let reason = format!("It has already been reshipped {} times", original.reship_count);
        return Err(OrderEngineError::ReshipNotAllowed { id: shipment_id, reason });
    }
    if !ShipmentActor::Admin.permits(original.status, ShipmentStatus::Replaced) {
        return Err(OrderEngineError::InvalidTransition {
            entity: HistoryEntity::Shipment,
            id: original.id,
            from: original.status.to_string(),
            to: ShipmentStatus::Replaced.to_string(),
        });
    }
    let tracking_number = request.new_tracking_number.as_deref();
    let replacement = match shipments::insert_replacement(&original, tracking_number, now, conn).await {
        Ok(s) => s,
        Err(e) if super::is_unique_violation(&e) => {
            return Err(OrderEngineError::ValidationError(format!(
                "Tracking number {} is already used by another shipment",
                tracking_number.unwrap_or_default()
            )))
        },
        Err(e) => return Err(e.into()),
    };
    let replaced = shipments::mark_replaced(original.id, replacement.id, now, conn).await?;
    let metadata = Metadata::new().with("replacement_shipment_id", replacement.id);
    history::record(
        HistoryEntity::Shipment,
        original.id,
        Some(original.status.as_str()),
        ShipmentStatus::Replaced.as_str(),
        &request.actor,
        Some(&request.reason),
        &metadata,
        now,
        conn,
    )
    .await?;
    let metadata = Metadata::new().with("original_shipment_id", original.id);
    history::record(
        HistoryEntity::Shipment,
        replacement.id,
        None,
        replacement.status.as_str(),
        &request.actor,
        Some(&request.reason),
        &metadata,
        now,
        conn,
    )
    .await?;
    info!(
        "🚚️ Shipment #{} replaced by #{} (reship {} of {MAX_RESHIPS}) by {}",
        original.id, replacement.id, replacement.reship_count, request.actor
    );
    Ok((replaced, replacement))
}

/// Books a courier pickup for the order's shipment.
pub(crate) async fn schedule_pickup_locked(
    order: &Order,
    deadline: DateTime<Utc>,
    actor: &Actor,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, OrderEngineError> {
    if !matches!(order.status, OrderStatusType::Paid | OrderStatusType::Packing) {
        return Err(OrderEngineError::ValidationError(format!(
            "A pickup can only be scheduled for paid or packing orders. Order {} is {}",
            order.order_code, order.status
        )));
    }
    let active = shipments::fetch_active_shipment(order.id, conn)
        .await?
        .ok_or_else(|| OrderEngineError::ShipmentNotFound(format!("for order {}", order.order_code)))?;
    let shipment = shipments::lock_shipment(active.id, conn).await?;
    let shipment = if shipment.status == ShipmentStatus::PickupScheduled {
        shipment
    } else {
        let to = ShipmentStatus::PickupScheduled;
        transitions::move_shipment(&shipment, to, ShipmentActor::Admin, actor, None, now, conn).await?
    };
    Ok(shipments::set_pickup_deadline(shipment.id, deadline, now, conn).await?)
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::db_types::Rupiah;

    fn shipment(created_at: DateTime<Utc>) -> Shipment {
        Shipment {
            id: 7,
            order_id: 3,
            provider_code: "sicepat".into(),
            provider_name: "SiCepat".into(),
            service_code: "best".into(),
            service_name: "BEST".into(),
            cost: Rupiah::from(20_000),
            etd: "1".into(),
            weight_grams: 1500,
            tracking_number: Some("SCP123456789".into()),
            draft_order_id: None,
            status: ShipmentStatus::Shipped,
            origin_postal_code: "40115".into(),
            destination_postal_code: "12190".into(),
            pickup_attempts: 0,
            delivery_attempts: 0,
            reship_count: 0,
            days_without_update: 0,
            requires_admin_action: false,
            is_replacement: false,
            tracking_stale: false,
            original_shipment_id: None,
            replaced_by_shipment_id: None,
            pickup_deadline: None,
            investigation_opened_at: None,
            marked_lost_at: None,
            last_tracking_update: None,
            shipped_at: None,
            delivered_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn silent_days_count_from_the_last_sign_of_life() {
        let now = Utc::now();
        let mut s = shipment(now - Duration::days(20));
        assert_eq!(days_without_update(&s, now), 20);
        s.shipped_at = Some(now - Duration::days(9));
        assert_eq!(days_without_update(&s, now), 9);
        s.last_tracking_update = Some(now - Duration::hours(30));
        assert_eq!(days_without_update(&s, now), 1);
        s.last_tracking_update = Some(now + Duration::hours(1));
        assert_eq!(days_without_update(&s, now), 0);
    }
}
