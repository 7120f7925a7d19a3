//! ZVR Order Engine
//!
//! The order engine owns the lifecycle of a storefront order, from checkout to completion or refund. It is
//! provider-agnostic: the payment gateway, the shipping aggregator and the notification channel are ports
//! ([`PaymentGateway`], [`ShippingGateway`], [`NotificationTransport`]) that the server wires up.
//!
//! The library is divided into these sections:
//! 1. Persistence ([`mod@traits`] and the `sqlite` backend). Every mutating database call is one atomic unit of
//!    transition: it locks the order, checks the state machine, writes the status change together with its side
//!    effects (stock, history, notification outbox) and commits. SQLite is the only backend shipped here.
//! 2. The transition rules ([`mod@state_machine`]) for orders, payments, shipments and refunds. Pure functions.
//! 3. The public API (`zvr_api`). Checkout, the payment webhook and status polling, fulfillment and tracking,
//!    refunds, admin force-actions, reconciliation and the outbox publisher. Gateway calls are made here, never while a
//!    transaction is open.
//!
//! The engine also publishes events after each committed change (an order was paid, shipped or annulled, a refund
//! completed, a shipment was flagged). See [`mod@events`] for how to hook into them.
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod state_machine;
pub mod traits;
mod zvr_api;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    ErrorKind,
    GatewayError,
    NotificationTransport,
    OrderEngineDatabase,
    OrderEngineError,
    OrderQueries,
    PaymentGateway,
    ShippingGateway,
};
pub use zvr_api::{
    admin_api::AdminApi,
    admin_objects,
    checkout_api::CheckoutApi,
    checkout_objects,
    errors::AdminActionError,
    fulfillment_api::{FulfillmentApi, ResiSource},
    notification_api::NotificationApi,
    order_flow_api::OrderFlowApi,
    payment_api::PaymentApi,
    payment_objects,
    reconciliation_api::ReconciliationApi,
    refund_api::{RefundApi, RefundResult, Settlement, MANUAL_REFUND_REFERENCE},
    sweep_objects,
};
