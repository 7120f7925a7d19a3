//! Pure transition rules for orders, payments, shipments and refunds.
//!
//! Nothing in here touches the database. The backends consult these functions before every status write, so a
//! transition that the engine accepts is always one that [`is_valid_order_transition`] (and friends) accepts.
mod order;
mod payment;
mod refund;
mod shipment;

pub use order::is_valid_order_transition;
pub use payment::is_valid_payment_transition;
pub use refund::is_valid_refund_transition;
pub use shipment::{is_valid_shipment_transition, requires_admin, ShipmentActor};
