use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use futures::future::BoxFuture;
use log::*;
use tokio::sync::Notify;
use zvr_order_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    AdminApi,
    CheckoutApi,
    FulfillmentApi,
    NotificationApi,
    OrderEngineDatabase,
    OrderFlowApi,
    PaymentApi,
    ReconciliationApi,
    SqliteDatabase,
};

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    gateways::Gateways,
    routes::*,
    workers::*,
};

pub const EVENT_BUFFER_SIZE: usize = 50;

pub async fn run_server(config: ServerConfig, gateways: Gateways) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_options(&config.database_url, config.db_max_connections, config.db_busy_timeout)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let outbox_wake = Arc::new(Notify::new());
    let handlers = create_event_handlers(Arc::clone(&outbox_wake));
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let workers = start_workers(&config, &db, &gateways, &producers, outbox_wake);
    let srv = create_server_instance(config, db, gateways, producers)?;
    let result = srv.await.map_err(ServerError::from);
    info!("🕰️ Server has stopped. Stopping {} background workers", workers.len());
    stop_all(&workers).await;
    result
}

fn wake_outbox(wake: &Arc<Notify>) -> BoxFuture<'static, ()> {
    wake.notify_one();
    Box::pin(async {})
}

/// Every engine event can leave a notification in the outbox, so each one wakes the publisher early.
pub fn create_event_handlers(outbox_wake: Arc<Notify>) -> EventHandlers {
    let mut hooks = EventHooks::default();
    let wake = Arc::clone(&outbox_wake);
    hooks.on_order_paid(move |ev| {
        info!("📬️ Order {} has been paid", ev.order.order_code);
        wake_outbox(&wake)
    });
    let wake = Arc::clone(&outbox_wake);
    hooks.on_order_annulled(move |ev| {
        info!("📬️ Order {} is {}. Stock released: {}", ev.order.order_code, ev.status, ev.stock_released);
        wake_outbox(&wake)
    });
    let wake = Arc::clone(&outbox_wake);
    hooks.on_order_shipped(move |ev| {
        info!("📬️ Order {} has shipped with resi {}", ev.order.order_code, ev.resi);
        wake_outbox(&wake)
    });
    let wake = Arc::clone(&outbox_wake);
    hooks.on_refund_completed(move |ev| {
        info!("📬️ Refund {} on order {} is complete", ev.refund.refund_code, ev.order.order_code);
        wake_outbox(&wake)
    });
    hooks.on_shipment_flagged(|ev| {
        warn!("📬️ Shipment #{} was flagged: {}", ev.shipment.id, ev.alert);
        Box::pin(async {})
    });
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

/// Starts the sweepers and the outbox publisher. The tracking refresh is skipped when `ENABLE_TRACKING_JOB` is off.
pub fn start_workers(
    config: &ServerConfig,
    db: &SqliteDatabase,
    gateways: &Gateways,
    producers: &EventProducers,
    outbox_wake: Arc<Notify>,
) -> Vec<WorkerHandle> {
    let payments = || {
        PaymentApi::new(
            db.clone(),
            Arc::clone(&gateways.payment),
            producers.clone(),
            config.payment_server_key.clone(),
        )
    };
    let mut workers = vec![
        start_worker(PaymentExpiryJob { api: payments() }, PAYMENT_EXPIRY_PERIOD, None),
        start_worker(
            OrderExpiryJob {
                api: OrderFlowApi::new(db.clone(), producers.clone()),
                order_expiry: config.order_expiry,
                auto_complete_after: config.auto_complete_after,
            },
            ORDER_EXPIRY_PERIOD,
            None,
        ),
        start_worker(
            ReconciliationJob { api: ReconciliationApi::new(db.clone(), payments()), hour: config.reconciliation_hour },
            RECONCILIATION_PERIOD,
            None,
        ),
        start_worker(
            OutboxJob { api: NotificationApi::new(db.clone(), Arc::clone(&gateways.transport)) },
            OUTBOX_PERIOD,
            Some(outbox_wake),
        ),
    ];
    if config.enable_tracking_job {
        let api = FulfillmentApi::new(db.clone(), Arc::clone(&gateways.shipping), producers.clone());
        workers.push(start_worker(TrackingRefreshJob { api }, TRACKING_REFRESH_PERIOD, None));
    } else {
        info!("🕰️ Tracking refresh is disabled");
    }
    workers
}

/// Registers every route. The engine APIs must already be in the app data.
pub fn configure_routes<B: OrderEngineDatabase + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(PaymentWebhookRoute::<B>::new())
        .service(CheckoutRoute::<B>::new())
        .service(OrderStatusRoute::<B>::new())
        .service(CancelOrderRoute::<B>::new())
        .service(StartPaymentRoute::<B>::new())
        .service(CheckPaymentRoute::<B>::new())
        .service(PackOrderRoute::<B>::new())
        .service(ShipOrderRoute::<B>::new())
        .service(MarkDeliveredRoute::<B>::new())
        .service(CompleteOrderRoute::<B>::new())
        .service(ForceCancelRoute::<B>::new())
        .service(ForceRefundRoute::<B>::new())
        .service(ForceReshipRoute::<B>::new())
        .service(ReconcilePaymentRoute::<B>::new())
        .service(RedriveNotificationRoute::<B>::new())
        .service(ResolveAlertRoute::<B>::new())
        .service(ReconciliationLogsRoute::<B>::new());
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateways: Gateways,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let options = ServerOptions::from_config(&config);
    let checkout_config = config.checkout_config();
    let server_key = config.payment_server_key.clone();
    let srv = HttpServer::new(move || {
        let orders_api = OrderFlowApi::new(db.clone(), producers.clone());
        let payments_api =
            PaymentApi::new(db.clone(), Arc::clone(&gateways.payment), producers.clone(), server_key.clone());
        let checkout_api = CheckoutApi::new(db.clone(), Arc::clone(&gateways.shipping), checkout_config.clone());
        let fulfillment_api = FulfillmentApi::new(db.clone(), Arc::clone(&gateways.shipping), producers.clone());
        let admin_api = AdminApi::new(db.clone(), Arc::clone(&gateways.payment), producers.clone());
        let notification_api = NotificationApi::new(db.clone(), Arc::clone(&gateways.transport));
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("zvr::access_log"))
            .app_data(web::Data::new(options))
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(payments_api))
            .app_data(web::Data::new(checkout_api))
            .app_data(web::Data::new(fulfillment_api))
            .app_data(web::Data::new(admin_api))
            .app_data(web::Data::new(notification_api))
            .configure(configure_routes::<SqliteDatabase>)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
