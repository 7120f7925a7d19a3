//! Request handler definitions
//!
//! Define each route and its handler here. Handlers stay thin: they read the request, call one engine API, and
//! translate the result. Anything longer belongs in the engine.
//!
//! Every handler is async. Database calls and gateway calls are awaited, so a slow gateway never blocks a worker
//! thread.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::{NaiveDate, Utc};
use log::*;
use serde_json::Value;
use zvr_order_engine::{
    admin_objects::{ForceCancelRequest, ForceRefundRequest, ForceReshipRequest, ReconcilePaymentRequest},
    checkout_objects::CheckoutRequest,
    db_types::{Actor, HistoryEntity, Order},
    traits::{OrderRef, PaymentMethod},
    AdminApi,
    CheckoutApi,
    FulfillmentApi,
    NotificationApi,
    OrderEngineDatabase,
    OrderEngineError,
    OrderFlowApi,
    OrderQueries,
    PaymentApi,
};

use crate::{
    config::ServerOptions,
    data_objects::{
        AdminActionResponse,
        CancelOrderParams,
        ForceCancelParams,
        ForceRefundParams,
        ForceReshipParams,
        GatewayNotificationBody,
        JsonResponse,
        OrderStatusView,
        PaymentOutcomeView,
        ReconcilePaymentParams,
        RefundView,
        ReshipView,
        ShipOrderParams,
    },
    errors::ServerError,
    helpers::{idempotency_key, AdminSession, CustomerSession},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Payment webhook  ----------------------------------------------------
route!(payment_webhook => Post "/webhooks/payment" impl OrderEngineDatabase);
/// Route handler for the payment gateway's notifications.
///
/// The body is normalised and handed to the engine, which checks the signature before anything else. The gateway
/// retries on any non-2xx response, so repeated and late notifications for payments that are already settled are
/// answered with 200. A bad signature is answered with 403 and is never retried into success.
pub async fn payment_webhook<B: OrderEngineDatabase>(
    body: web::Json<Value>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let raw = body.into_inner();
    let parsed = serde_json::from_value::<GatewayNotificationBody>(raw.clone()).map_err(|e| {
        debug!("💻️ Could not read payment notification. {e}");
        ServerError::InvalidRequestBody(e.to_string())
    })?;
    info!("💻️ Payment notification for {} ({})", parsed.order_id, parsed.transaction_status);
    let notification = parsed.into_notification(raw);
    match api.handle_webhook(notification, Utc::now()).await {
        Ok(outcome) => {
            let view = PaymentOutcomeView::from(outcome);
            debug!("💻️ Payment notification for {} was {}", view.payment.external_gateway_id, view.outcome);
            Ok(HttpResponse::Ok().json(view))
        },
        Err(OrderEngineError::InvalidSignature) => {
            Ok(HttpResponse::Forbidden().json(JsonResponse::failure("Invalid signature")))
        },
        Err(e) => Err(e.into()),
    }
}

//----------------------------------------------   Customer  ----------------------------------------------------------
route!(checkout => Post "/checkout" impl OrderEngineDatabase);
/// Turns the customer's cart into a PENDING order. The user id on the request is always the session's.
pub async fn checkout<B: OrderEngineDatabase>(
    session: CustomerSession,
    body: web::Json<CheckoutRequest>,
    api: web::Data<CheckoutApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let mut request = body.into_inner();
    request.user_id = session.user_id;
    info!("💻️ Checkout of cart #{} for customer {:?}", request.cart_id, session.user_id);
    let result = api.checkout(request, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// Orders belonging to another customer are reported as not found.
async fn fetch_own_order<B: OrderEngineDatabase>(
    api: &OrderFlowApi<B>,
    code: &str,
    session: CustomerSession,
) -> Result<Order, ServerError> {
    let order = api.fetch_order(&OrderRef::from(code)).await?;
    if order.user_id.is_some() && order.user_id != session.user_id {
        debug!("💻️ Customer {:?} asked for order {code}, which is not theirs", session.user_id);
        return Err(OrderEngineError::OrderNotFound(code.to_string()).into());
    }
    Ok(order)
}

route!(order_status => Get "/orders/{code}" impl OrderEngineDatabase);
/// The order with its items, latest payment, shipments, refunds and status history.
pub async fn order_status<B: OrderEngineDatabase>(
    path: web::Path<String>,
    session: CustomerSession,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    trace!("💻️ GET order status for {code}");
    let order = fetch_own_order(&api, &code, session).await?;
    let db = api.db();
    let view = OrderStatusView {
        items: db.fetch_order_items(order.id).await?,
        latest_payment: db.fetch_latest_payment(order.id).await?,
        shipments: db.fetch_shipments_for_order(order.id).await?,
        refunds: db.fetch_refunds_for_order(order.id).await?,
        history: db.fetch_status_history(HistoryEntity::Order, order.id).await?,
        order,
    };
    Ok(HttpResponse::Ok().json(view))
}

route!(cancel_order => Post "/orders/{code}/cancel" impl OrderEngineDatabase);
/// A customer cancels their own unpaid order. Reserved stock goes back on the shelf.
pub async fn cancel_order<B: OrderEngineDatabase>(
    path: web::Path<String>,
    session: CustomerSession,
    body: Option<web::Json<CancelOrderParams>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let params = body.map(|b| b.into_inner()).unwrap_or_default();
    let reason = params.reason.unwrap_or_else(|| "Cancelled by customer".to_string());
    info!("💻️ Customer {:?} is cancelling order {code}", session.user_id);
    let order_ref = OrderRef::from(code.as_str());
    let order = api.cancel_order_by_customer(&order_ref, session.user_id, &reason, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(start_payment => Post "/orders/{code}/payment" impl OrderEngineDatabase);
/// Opens a charge with the payment gateway for the order's full amount.
pub async fn start_payment<B: OrderEngineDatabase>(
    path: web::Path<String>,
    session: CustomerSession,
    body: web::Json<PaymentMethod>,
    orders: web::Data<OrderFlowApi<B>>,
    payments: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let method = body.into_inner();
    let order = fetch_own_order(&orders, &code, session).await?;
    info!("💻️ Starting a {} payment for order {code}", method.kind);
    let payment = payments.create_charge(&OrderRef::Id(order.id), method, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(payment))
}

route!(check_payment => Post "/orders/{code}/payment/check" impl OrderEngineDatabase);
/// Asks the gateway about the order's latest payment and applies the answer.
pub async fn check_payment<B: OrderEngineDatabase>(
    path: web::Path<String>,
    session: CustomerSession,
    orders: web::Data<OrderFlowApi<B>>,
    payments: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let order = fetch_own_order(&orders, &code, session).await?;
    let outcome = payments.check_status(&OrderRef::Id(order.id), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(PaymentOutcomeView::from(outcome)))
}

//----------------------------------------------   Admin  -------------------------------------------------------------
route!(pack_order => Post "/admin/orders/{code}/pack" impl OrderEngineDatabase);
pub async fn pack_order<B: OrderEngineDatabase>(
    path: web::Path<String>,
    admin: AdminSession,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.fetch_order(&OrderRef::from(path.as_str())).await?;
    info!("💻️ {} is packing order {}", admin.actor(), order.order_code);
    let order = api.pack_order(order.id, admin.actor(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(ship_order => Post "/admin/orders/{code}/ship" impl OrderEngineDatabase);
/// Hands the order to the courier. Without a resi in the body, one is taken from the shipping gateway or generated.
pub async fn ship_order<B: OrderEngineDatabase>(
    path: web::Path<String>,
    admin: AdminSession,
    body: Option<web::Json<ShipOrderParams>>,
    orders: web::Data<OrderFlowApi<B>>,
    fulfillment: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let params = body.map(|b| b.into_inner()).unwrap_or_default();
    let order = orders.fetch_order(&OrderRef::from(path.as_str())).await?;
    info!("💻️ {} is shipping order {}", admin.actor(), order.order_code);
    let order = fulfillment.ship_order(order.id, params.resi.as_deref(), admin.actor(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(mark_delivered => Post "/admin/orders/{code}/deliver" impl OrderEngineDatabase);
pub async fn mark_delivered<B: OrderEngineDatabase>(
    path: web::Path<String>,
    admin: AdminSession,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.fetch_order(&OrderRef::from(path.as_str())).await?;
    info!("💻️ {} marked order {} delivered", admin.actor(), order.order_code);
    let order = api.mark_delivered(order.id, admin.actor(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(complete_order => Post "/admin/orders/{code}/complete" impl OrderEngineDatabase);
pub async fn complete_order<B: OrderEngineDatabase>(
    path: web::Path<String>,
    admin: AdminSession,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.fetch_order(&OrderRef::from(path.as_str())).await?;
    info!("💻️ {} is completing order {}", admin.actor(), order.order_code);
    let order = api.complete_order(order.id, admin.actor(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(force_cancel => Post "/admin/orders/{code}/force-cancel" impl OrderEngineDatabase);
pub async fn force_cancel<B: OrderEngineDatabase>(
    req: HttpRequest,
    path: web::Path<String>,
    admin: AdminSession,
    body: web::Json<ForceCancelParams>,
    api: web::Data<AdminApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let params = body.into_inner();
    info!("💻️ {} is force-cancelling order {code}", admin.actor());
    let request = ForceCancelRequest {
        order: OrderRef::from(code.as_str()),
        reason: params.reason,
        restore_stock: params.restore_stock,
        idempotency_key: idempotency_key(&req, params.idempotency_key),
    };
    let outcome = api.force_cancel(admin.context(), request, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(AdminActionResponse::<Order>::from_outcome(outcome)))
}

route!(force_refund => Post "/admin/orders/{code}/force-refund" impl OrderEngineDatabase);
/// Refunds an order on an admin's say-so. With `SKIP_GATEWAY_REFUND` set, every refund is settled manually.
pub async fn force_refund<B: OrderEngineDatabase>(
    req: HttpRequest,
    path: web::Path<String>,
    admin: AdminSession,
    body: web::Json<ForceRefundParams>,
    options: web::Data<ServerOptions>,
    api: web::Data<AdminApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let params = body.into_inner();
    info!("💻️ {} is force-refunding order {code} ({})", admin.actor(), params.refund_type);
    let request = ForceRefundRequest {
        order: OrderRef::from(code.as_str()),
        refund_type: params.refund_type,
        reason: params.reason,
        reason_detail: params.reason_detail,
        amount: params.amount,
        items: params.items,
        skip_gateway: params.skip_gateway || options.skip_gateway_refund,
        idempotency_key: idempotency_key(&req, params.idempotency_key),
    };
    let outcome = api.force_refund(admin.context(), request, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(AdminActionResponse::<RefundView>::from_outcome(outcome)))
}

route!(force_reship => Post "/admin/shipments/{id}/force-reship" impl OrderEngineDatabase);
pub async fn force_reship<B: OrderEngineDatabase>(
    req: HttpRequest,
    path: web::Path<i64>,
    admin: AdminSession,
    body: web::Json<ForceReshipParams>,
    api: web::Data<AdminApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let shipment_id = path.into_inner();
    let params = body.into_inner();
    info!("💻️ {} is reshipping shipment #{shipment_id}", admin.actor());
    let request = ForceReshipRequest {
        shipment_id,
        reason: params.reason,
        new_tracking_number: params.new_tracking_number,
        idempotency_key: idempotency_key(&req, params.idempotency_key),
    };
    let outcome = api.force_reship(admin.context(), request, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(AdminActionResponse::<ReshipView>::from_outcome(outcome)))
}

route!(reconcile_payment => Post "/admin/orders/{code}/reconcile-payment" impl OrderEngineDatabase);
pub async fn reconcile_payment<B: OrderEngineDatabase>(
    req: HttpRequest,
    path: web::Path<String>,
    admin: AdminSession,
    body: web::Json<ReconcilePaymentParams>,
    api: web::Data<AdminApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let code = path.into_inner();
    let params = body.into_inner();
    info!("💻️ {} is reconciling the payment of order {code} ({:?})", admin.actor(), params.action);
    let request = ReconcilePaymentRequest {
        order: OrderRef::from(code.as_str()),
        action: params.action,
        reason: params.reason,
        idempotency_key: idempotency_key(&req, params.idempotency_key),
    };
    let outcome = api.reconcile_payment(admin.context(), request, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(AdminActionResponse::<PaymentOutcomeView>::from_outcome(outcome)))
}

route!(redrive_notification => Post "/admin/notifications/{id}/redrive" impl OrderEngineDatabase);
/// Puts a failed notification back in the outbox.
pub async fn redrive_notification<B: OrderEngineDatabase>(
    path: web::Path<i64>,
    admin: AdminSession,
    api: web::Data<NotificationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    info!("💻️ {} is re-driving notification #{id}", admin.actor());
    let notification = api.redrive(id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(notification))
}

route!(resolve_alert => Post "/admin/alerts/{id}/resolve" impl OrderEngineDatabase);
pub async fn resolve_alert<B: OrderEngineDatabase>(
    path: web::Path<i64>,
    admin: AdminSession,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let actor: Actor = admin.actor();
    info!("💻️ {actor} is resolving shipment alert #{id}");
    let alert = api.resolve_alert(id, &actor, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(alert))
}

route!(reconciliation_logs => Get "/admin/reconciliation/{date}" impl OrderEngineDatabase);
/// Reconciliation runs for one UTC day (`YYYY-MM-DD`), oldest first.
pub async fn reconciliation_logs<B: OrderEngineDatabase>(
    path: web::Path<NaiveDate>,
    _admin: AdminSession,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let date = path.into_inner();
    trace!("💻️ GET reconciliation logs for {date}");
    let logs = api.db().fetch_reconciliation_logs(date).await?;
    Ok(HttpResponse::Ok().json(logs))
}
