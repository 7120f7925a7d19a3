use serde::{Deserialize, Serialize};

use crate::db_types::{AlertType, Order, OrderStatusType, Payment, Refund, Shipment};

/// An order moved to `PAID`, whoever triggered it (webhook, status poll, reconciliation or an admin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    pub order: Order,
    pub payment: Option<Payment>,
}

/// An order left the active flow without being fulfilled: `CANCELLED`, `EXPIRED` or `FAILED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub status: OrderStatusType,
    pub stock_released: bool,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order, stock_released: bool) -> Self {
        let status = order.status;
        Self { order, status, stock_released }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShippedEvent {
    pub order: Order,
    pub resi: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCompletedEvent {
    pub refund: Refund,
    pub order: Order,
}

/// The shipment monitor raised an alert that somebody should look at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentFlaggedEvent {
    pub shipment: Shipment,
    pub alert: AlertType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    OrderPaid,
    OrderAnnulled,
    OrderShipped,
    RefundCompleted,
    ShipmentFlagged,
}

/// Everything the engine announces, as it travels over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    OrderPaid(OrderPaidEvent),
    OrderAnnulled(OrderAnnulledEvent),
    OrderShipped(OrderShippedEvent),
    RefundCompleted(RefundCompletedEvent),
    ShipmentFlagged(ShipmentFlaggedEvent),
}

impl EngineEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::OrderPaid(_) => EventType::OrderPaid,
            Self::OrderAnnulled(_) => EventType::OrderAnnulled,
            Self::OrderShipped(_) => EventType::OrderShipped,
            Self::RefundCompleted(_) => EventType::RefundCompleted,
            Self::ShipmentFlagged(_) => EventType::ShipmentFlagged,
        }
    }

    /// The order the event is about.
    pub fn order_id(&self) -> i64 {
        match self {
            Self::OrderPaid(ev) => ev.order.id,
            Self::OrderAnnulled(ev) => ev.order.id,
            Self::OrderShipped(ev) => ev.order.id,
            Self::RefundCompleted(ev) => ev.order.id,
            Self::ShipmentFlagged(ev) => ev.shipment.order_id,
        }
    }
}
