//! The seams of the order engine.
//!
//! * [`OrderEngineDatabase`] and [`OrderQueries`] are the persistence port. Every mutating method is one atomic
//!   unit of transition; the SQLite backend is the only implementation shipped here.
//! * [`PaymentGateway`], [`ShippingGateway`] and [`NotificationTransport`] are the outbound ports. The engine never
//!   calls them while it holds a transaction.
mod data_objects;
mod gateway_error;
mod notification_transport;
mod order_engine_database;
mod order_queries;
mod payment_gateway;
mod shipping_gateway;

pub use data_objects::*;
pub use gateway_error::GatewayError;
pub use notification_transport::{NotificationTransport, TransportError};
pub use order_engine_database::{ErrorKind, OrderEngineDatabase, OrderEngineError};
pub use order_queries::OrderQueries;
pub use payment_gateway::{
    ChargeRequest,
    ChargeResponse,
    CustomerDetails,
    GatewayRefundRequest,
    GatewayRefundResponse,
    GatewayStatus,
    PaymentGateway,
    PaymentMethod,
};
pub use shipping_gateway::{
    ConfirmedDraft,
    DraftOrder,
    DraftOrderRequest,
    RateItem,
    RateRequest,
    ShippingGateway,
    ShippingRate,
    TrackingEvent,
    TrackingInfo,
};
