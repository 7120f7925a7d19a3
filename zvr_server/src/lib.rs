//! # ZVR server
//! This crate hosts the HTTP adapter and background workers for the ZVR order engine. It is responsible for:
//! Receiving payment notifications from the payment gateway and handing them to the engine.
//! Exposing thin customer and admin endpoints over the engine APIs.
//! Running the sweepers (payment expiry, order expiry and auto-complete, tracking refresh, daily reconciliation)
//! and the notification outbox publisher.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhooks/payment`: Payment gateway notifications.
//! * `/checkout`, `/orders/{code}/...`: Customer routes. The customer is identified by the `X-User-Id` header.
//! * `/admin/...`: Admin routes. The admin is identified by the `X-Admin-Id` and `X-Admin-Email` headers, which the
//!   authenticating proxy in front of this server sets.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod gateways;
pub mod helpers;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
