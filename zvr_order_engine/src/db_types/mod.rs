//! Data types that are persisted by the order engine backends.
//!
//! Status enums are stored as upper-case TEXT, which is what the `CHECK` constraints in the migrations expect. Money
//! is always [`Rupiah`], and schema-flexible JSON columns are carried by [`Metadata`].
use thiserror::Error;
pub use zvr_common::Rupiah;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(pub String);

/// Declares a status-like enum that is stored as TEXT, serialised with the same literal, and parsed back with
/// `FromStr`.
#[macro_export]
macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[sqlx(rename = $s)]
                #[serde(rename = $s)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::db_types::ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err($crate::db_types::ConversionError(format!(
                        "{other} is not a valid {}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

mod audit;
mod catalog;
mod metadata;
mod notification;
mod order;
mod payment;
mod reconciliation;
mod refund;
mod shipment;
mod stock;

pub use audit::{AdminActionType, AuditDraft, AuditLogEntry, StatusHistory, HistoryEntity};
pub use catalog::{Cart, CartLine, Product};
pub use metadata::{keys as metadata_keys, AddressSnapshot, CourierSelection, Metadata};
pub use notification::{NewNotification, Notification, NotificationEvent, NotificationStatus};
pub use order::{Actor, NewOrder, NewOrderItem, Order, OrderItem, OrderRefundStatus, OrderStatusType};
pub use payment::{NewPayment, Payment, PaymentStatus, PaymentSyncLog, SyncType};
pub use reconciliation::{ReconciliationLog, ReconciliationStatus};
pub use refund::{NewRefund, NewRefundItem, Refund, RefundItem, RefundReason, RefundStatus, RefundType};
pub use shipment::{
    AlertSeverity,
    AlertType,
    CourierFailure,
    Dispute,
    DisputeStatus,
    DisputeType,
    NewShipment,
    Shipment,
    ShipmentAlert,
    ShipmentStatus,
};
pub use stock::{MovementType, StockMovement};
