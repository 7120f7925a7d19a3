use serde::{Deserialize, Serialize};

use crate::db_types::ShipmentStatus::{self, *};

/// The origin of a shipment status change. The same move can be legal for one actor and forbidden for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentActor {
    /// Side effect of an order transition (payment, ship, cancel).
    Cascade,
    /// A courier tracking update.
    Tracking,
    /// The stuck/lost/pickup detectors.
    Monitor,
    Admin,
}

pub fn is_valid_shipment_transition(from: ShipmentStatus, to: ShipmentStatus) -> bool {
    match from {
        Pending => matches!(to, Processing | Cancelled),
        Processing => matches!(to, PickupScheduled | Shipped | Cancelled),
        PickupScheduled => matches!(to, Shipped | PickupFailed | Cancelled),
        PickupFailed => matches!(to, PickupScheduled | Shipped | Cancelled),
        Shipped | InTransit => {
            from != to &&
                matches!(
                    to,
                    InTransit | OutForDelivery | Delivered | DeliveryFailed | Investigation | ReturnedToSender | Lost
                )
        },
        OutForDelivery => matches!(to, InTransit | Delivered | DeliveryFailed | Investigation | ReturnedToSender),
        DeliveryFailed => matches!(to, OutForDelivery | InTransit | ReturnedToSender | Investigation),
        Delivered => matches!(to, Investigation),
        Investigation => matches!(to, InTransit | Delivered | Lost | ReturnedToSender | Replaced),
        Lost => matches!(to, Delivered | Replaced),
        ReturnedToSender => matches!(to, Replaced | Cancelled),
        Replaced | Cancelled => false,
    }
}

/// Moves that only an admin may make: anything out of `Delivered`, `Lost` or `ReturnedToSender`, and cancelling a
/// shipment that has not been paid for (unless it is the order's own cancellation cascading down).
pub fn requires_admin(from: ShipmentStatus, to: ShipmentStatus) -> bool {
    matches!(from, Delivered | Lost | ReturnedToSender) || (from == Pending && to == Cancelled)
}

impl ShipmentStatus {
    /// The parcel has left the warehouse and is the courier's problem now.
    pub fn is_post_shipped(&self) -> bool {
        matches!(self, Shipped | InTransit | OutForDelivery | DeliveryFailed | Investigation)
    }

    /// States the tracking sweeper looks at.
    pub fn is_trackable(&self) -> bool {
        matches!(self, Shipped | InTransit | OutForDelivery | Investigation | PickupScheduled)
    }

    pub fn can_be_reshipped(&self) -> bool {
        matches!(self, Lost | ReturnedToSender | Investigation)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Replaced | Cancelled)
    }
}

impl ShipmentActor {
    pub fn permits(&self, from: ShipmentStatus, to: ShipmentStatus) -> bool {
        if !is_valid_shipment_transition(from, to) {
            return false;
        }
        match self {
            ShipmentActor::Admin => true,
            ShipmentActor::Tracking | ShipmentActor::Monitor => !requires_admin(from, to),
            ShipmentActor::Cascade => {
                (from == Pending && to == Cancelled) || (!requires_admin(from, to) && !from.is_post_shipped())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admin_only_moves() {
        assert!(!ShipmentActor::Tracking.permits(Delivered, Investigation));
        assert!(ShipmentActor::Admin.permits(Delivered, Investigation));
        assert!(!ShipmentActor::Monitor.permits(Lost, Replaced));
        assert!(ShipmentActor::Admin.permits(Lost, Replaced));
        assert!(!ShipmentActor::Tracking.permits(Pending, Cancelled));
    }

    #[test]
    fn order_cascades() {
        assert!(ShipmentActor::Cascade.permits(Pending, Processing));
        assert!(ShipmentActor::Cascade.permits(Pending, Cancelled));
        assert!(ShipmentActor::Cascade.permits(Processing, Shipped));
        assert!(ShipmentActor::Cascade.permits(Processing, Cancelled));
        // Once the courier has it, only tracking or an admin may move it
        assert!(!ShipmentActor::Cascade.permits(Shipped, Delivered));
        assert!(ShipmentActor::Tracking.permits(Shipped, Delivered));
    }

    #[test]
    fn monitor_moves() {
        assert!(ShipmentActor::Monitor.permits(Shipped, Investigation));
        assert!(ShipmentActor::Monitor.permits(InTransit, Investigation));
        assert!(ShipmentActor::Monitor.permits(Investigation, Lost));
        assert!(ShipmentActor::Monitor.permits(PickupScheduled, PickupFailed));
    }

    #[test]
    fn sinks() {
        for to in ShipmentStatus::ALL {
            assert!(!is_valid_shipment_transition(Replaced, *to));
            assert!(!is_valid_shipment_transition(Cancelled, *to));
            assert!(!is_valid_shipment_transition(*to, *to), "{to} -> {to}");
        }
    }
}
