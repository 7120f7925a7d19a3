use chrono::NaiveDate;

use crate::{
    db_types::{
        AuditLogEntry,
        CourierFailure,
        Dispute,
        HistoryEntity,
        Notification,
        Order,
        OrderItem,
        Payment,
        PaymentSyncLog,
        Product,
        ReconciliationLog,
        Refund,
        RefundItem,
        Shipment,
        ShipmentAlert,
        StatusHistory,
        StockMovement,
    },
    traits::{OrderEngineError, OrderQueryFilter, OrderRef},
};

/// Read-only access to everything the engine writes. None of these take locks.
#[allow(async_fn_in_trait)]
pub trait OrderQueries: Clone {
    async fn fetch_order(&self, order: &OrderRef) -> Result<Option<Order>, OrderEngineError>;

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, OrderEngineError>;

    /// Newest first. An empty filter returns the most recent orders, up to the filter's limit.
    async fn search_orders(&self, filter: OrderQueryFilter) -> Result<Vec<Order>, OrderEngineError>;

    async fn fetch_product(&self, product_id: i64) -> Result<Option<Product>, OrderEngineError>;

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<Payment>, OrderEngineError>;

    /// The payment with the latest `created_at` (ties broken by id).
    async fn fetch_latest_payment(&self, order_id: i64) -> Result<Option<Payment>, OrderEngineError>;

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, OrderEngineError>;

    async fn fetch_payment_sync_logs(&self, payment_id: i64) -> Result<Vec<PaymentSyncLog>, OrderEngineError>;

    async fn fetch_shipment(&self, shipment_id: i64) -> Result<Option<Shipment>, OrderEngineError>;

    /// Oldest first. The active shipment is the last one that has not been replaced.
    async fn fetch_shipments_for_order(&self, order_id: i64) -> Result<Vec<Shipment>, OrderEngineError>;

    async fn fetch_alerts_for_shipment(&self, shipment_id: i64) -> Result<Vec<ShipmentAlert>, OrderEngineError>;

    async fn fetch_open_alerts(&self) -> Result<Vec<ShipmentAlert>, OrderEngineError>;

    async fn fetch_courier_failures(&self, shipment_id: i64) -> Result<Vec<CourierFailure>, OrderEngineError>;

    async fn fetch_disputes_for_order(&self, order_id: i64) -> Result<Vec<Dispute>, OrderEngineError>;

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, OrderEngineError>;

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, OrderEngineError>;

    async fn fetch_refund_items(&self, refund_id: i64) -> Result<Vec<RefundItem>, OrderEngineError>;

    async fn fetch_status_history(
        &self,
        entity: HistoryEntity,
        entity_id: i64,
    ) -> Result<Vec<StatusHistory>, OrderEngineError>;

    async fn fetch_stock_movements_for_order(&self, order_id: i64) -> Result<Vec<StockMovement>, OrderEngineError>;

    async fn fetch_stock_movements_for_product(&self, product_id: i64)
        -> Result<Vec<StockMovement>, OrderEngineError>;

    async fn fetch_notifications_for_order(&self, order_id: i64) -> Result<Vec<Notification>, OrderEngineError>;

    async fn fetch_audit_log_for_target(
        &self,
        target_type: &str,
        target_id: i64,
    ) -> Result<Vec<AuditLogEntry>, OrderEngineError>;

    async fn fetch_audit_by_idempotency_key(&self, key: &str) -> Result<Option<AuditLogEntry>, OrderEngineError>;

    async fn fetch_reconciliation_logs(&self, date: NaiveDate) -> Result<Vec<ReconciliationLog>, OrderEngineError>;
}
