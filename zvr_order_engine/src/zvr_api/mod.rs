//! # Order engine public API
//!
//! The `zvr_api` module is the programmatic face of the order engine. Each API covers one part of the order
//! lifecycle, so that the server (or a test) only wires up what it needs.
//!
//! * [`checkout_api`] turns a cart into a `PENDING` order, with its stock reservations and shipment.
//! * [`order_flow_api`] moves orders along their lifecycle and runs the order-expiry and auto-complete sweeps.
//! * [`payment_api`] creates gateway charges, applies webhooks and status polls, and runs the payment sweeps.
//! * [`fulfillment_api`] ships orders, refreshes courier tracking and manages shipment alerts.
//! * [`refund_api`] prices, sends and completes refunds.
//! * [`admin_api`] holds the audited admin force-actions.
//! * [`reconciliation_api`] runs the daily books check.
//! * [`notification_api`] drains the notification outbox.
//!
//! # API usage
//!
//! Every API is created from a database backend that implements [`OrderEngineDatabase`], plus whatever gateway
//! ports it talks to. The APIs never call a gateway while a database transaction is open, and they publish engine
//! events only after the transaction that caused them has committed.
//!
//! ```rust,ignore
//! use zvr_order_engine::{events::EventProducers, OrderFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url("sqlite://data/zvr.db", 10).await?;
//! let api = OrderFlowApi::new(db, EventProducers::default());
//! let report = api.expire_orders(Utc::now(), Duration::hours(24), 100).await?;
//! ```
//!
//! [`OrderEngineDatabase`]: crate::traits::OrderEngineDatabase
pub mod admin_api;
pub mod admin_objects;
pub mod checkout_api;
pub mod checkout_objects;
pub mod errors;
pub mod fulfillment_api;
pub mod notification_api;
pub mod order_flow_api;
pub mod payment_api;
pub mod payment_objects;
pub mod reconciliation_api;
pub mod refund_api;
pub mod sweep_objects;
