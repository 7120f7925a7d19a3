use crate::db_types::{PaymentStatus, ShipmentStatus};

/// Maps a payment gateway `transaction_status` to a local payment status.
///
/// A card `capture` only counts as paid once the fraud screen has accepted it (or did not run at all). Statuses the
/// engine does not act on, such as `authorize` or `refund`, map to `None`.
pub fn map_gateway_status(transaction_status: &str, fraud_status: Option<&str>) -> Option<PaymentStatus> {
    match transaction_status.trim().to_ascii_lowercase().as_str() {
        "settlement" => Some(PaymentStatus::Paid),
        "capture" => match fraud_status.map(|s| s.trim().to_ascii_lowercase()) {
            None => Some(PaymentStatus::Paid),
            Some(s) if s == "accept" => Some(PaymentStatus::Paid),
            Some(_) => Some(PaymentStatus::Pending),
        },
        "pending" => Some(PaymentStatus::Pending),
        "expire" | "expired" => Some(PaymentStatus::Expired),
        "cancel" => Some(PaymentStatus::Cancelled),
        "deny" | "failure" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

/// Maps a courier tracking status to a shipment status. Pre-pickup statuses (`confirmed`, `allocated`,
/// `picking_up`) and anything unrecognised return `None`, which leaves the shipment status alone.
pub fn map_tracking_status(courier_status: &str) -> Option<ShipmentStatus> {
    let normalised: String =
        courier_status.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_lowercase()).collect();
    match normalised.as_str() {
        "picked" | "intransit" => Some(ShipmentStatus::InTransit),
        "droppingoff" | "outfordelivery" => Some(ShipmentStatus::OutForDelivery),
        "delivered" => Some(ShipmentStatus::Delivered),
        "onhold" | "rejected" | "deliveryfailed" => Some(ShipmentStatus::DeliveryFailed),
        "returnintransit" | "returned" => Some(ShipmentStatus::ReturnedToSender),
        _ => None,
    }
}
