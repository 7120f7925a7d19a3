use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::{
    db_types::{OrderStatusType, Payment},
    events::{
        EngineEvent,
        EventDispatcher,
        EventPublisher,
        OrderAnnulledEvent,
        OrderPaidEvent,
        OrderShippedEvent,
        RefundCompletedEvent,
        ShipmentFlaggedEvent,
    },
    traits::TransitionOutcome,
};

pub type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler<E> = Arc<dyn Fn(E) -> BoxedFuture + Send + Sync>;

/// The engine APIs hold a clone of this and publish after each commit. The default has no bus behind it, and
/// publishing to it does nothing.
#[derive(Default, Clone)]
pub struct EventProducers {
    publisher: Option<EventPublisher>,
}

impl EventProducers {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher: Some(publisher) }
    }

    /// Publishes the event that goes with an order transition, if there is one. Unchanged outcomes publish nothing.
    pub async fn publish_transition(&self, outcome: &TransitionOutcome, payment: Option<&Payment>) {
        let TransitionOutcome::Changed { order, .. } = outcome else {
            return;
        };
        match order.status {
            OrderStatusType::Paid => {
                let event = OrderPaidEvent { order: order.clone(), payment: payment.cloned() };
                self.publish_order_paid(event).await;
            },
            OrderStatusType::Shipped => match &order.resi {
                Some(resi) => {
                    let event = OrderShippedEvent { order: order.clone(), resi: resi.clone() };
                    self.publish_order_shipped(event).await;
                },
                None => warn!("📬️ Order {} shipped without a resi. No event published", order.order_code),
            },
            OrderStatusType::Cancelled | OrderStatusType::Expired | OrderStatusType::Failed => {
                let event = OrderAnnulledEvent::new(order.clone(), !order.stock_reserved);
                self.publish_order_annulled(event).await;
            },
            _ => {},
        }
    }

    pub async fn publish(&self, event: EngineEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }

    pub async fn publish_order_paid(&self, event: OrderPaidEvent) {
        self.publish(EngineEvent::OrderPaid(event)).await;
    }

    pub async fn publish_order_annulled(&self, event: OrderAnnulledEvent) {
        self.publish(EngineEvent::OrderAnnulled(event)).await;
    }

    pub async fn publish_order_shipped(&self, event: OrderShippedEvent) {
        self.publish(EngineEvent::OrderShipped(event)).await;
    }

    pub async fn publish_refund_completed(&self, event: RefundCompletedEvent) {
        self.publish(EngineEvent::RefundCompleted(event)).await;
    }

    pub async fn publish_shipment_flagged(&self, event: ShipmentFlaggedEvent) {
        self.publish(EngineEvent::ShipmentFlagged(event)).await;
    }
}

/// The bus, wired to a set of hooks but not yet running.
pub struct EventHandlers {
    dispatcher: EventDispatcher,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self { dispatcher: EventDispatcher::new(buffer_size, hooks) }
    }

    pub fn producers(&self) -> EventProducers {
        EventProducers::new(self.dispatcher.publisher())
    }

    /// Spawns the dispatcher. It stops on its own once every producer has been dropped.
    pub async fn start_handlers(self) {
        tokio::spawn(self.dispatcher.run());
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_paid: Option<Handler<OrderPaidEvent>>,
    pub on_order_annulled: Option<Handler<OrderAnnulledEvent>>,
    pub on_order_shipped: Option<Handler<OrderShippedEvent>>,
    pub on_refund_completed: Option<Handler<RefundCompletedEvent>>,
    pub on_shipment_flagged: Option<Handler<ShipmentFlaggedEvent>>,
}

impl EventHooks {
    pub fn on_order_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderPaidEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_order_paid = Some(Arc::new(f));
        self
    }

    pub fn on_order_annulled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderAnnulledEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_order_annulled = Some(Arc::new(f));
        self
    }

    pub fn on_order_shipped<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderShippedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_order_shipped = Some(Arc::new(f));
        self
    }

    pub fn on_refund_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RefundCompletedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_refund_completed = Some(Arc::new(f));
        self
    }

    pub fn on_shipment_flagged<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ShipmentFlaggedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_shipment_flagged = Some(Arc::new(f));
        self
    }

    /// The hook call for `event`, or `None` when nobody subscribed to its kind.
    pub(crate) fn job_for(&self, event: EngineEvent) -> Option<BoxedFuture> {
        match event {
            EngineEvent::OrderPaid(ev) => self.on_order_paid.as_ref().map(|hook| hook(ev)),
            EngineEvent::OrderAnnulled(ev) => self.on_order_annulled.as_ref().map(|hook| hook(ev)),
            EngineEvent::OrderShipped(ev) => self.on_order_shipped.as_ref().map(|hook| hook(ev)),
            EngineEvent::RefundCompleted(ev) => self.on_refund_completed.as_ref().map(|hook| hook(ev)),
            EngineEvent::ShipmentFlagged(ev) => self.on_shipment_flagged.as_ref().map(|hook| hook(ev)),
        }
    }
}
