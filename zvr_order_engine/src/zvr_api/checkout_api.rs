use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;
use zvr_common::Rupiah;

use crate::{
    db_types::{
        metadata_keys as keys,
        AddressSnapshot,
        CartLine,
        CourierSelection,
        Metadata,
        NewOrder,
        NewOrderItem,
        NewShipment,
        Order,
    },
    helpers::with_gateway_timeout,
    traits::{
        DraftOrderRequest,
        OrderEngineDatabase,
        OrderEngineError,
        RateItem,
        RateRequest,
        ShippingGateway,
        ShippingRate,
    },
    zvr_api::checkout_objects::{CheckoutConfig, CheckoutRequest, CheckoutResult},
};

/// `CheckoutApi` turns a cart into a `PENDING` order.
///
/// The shipping gateway is consulted for a rate before the order is written and for a draft order afterwards. Neither
/// call can block a checkout: a failed rate lookup falls back to the configured flat cost, and a failed draft order is
/// only recorded as a breadcrumb on the order.
pub struct CheckoutApi<B> {
    db: B,
    shipping: Arc<dyn ShippingGateway>,
    config: CheckoutConfig,
}

impl<B> Debug for CheckoutApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckoutApi ({:?})", self.config)
    }
}

impl<B> CheckoutApi<B> {
    pub fn new(db: B, shipping: Arc<dyn ShippingGateway>, config: CheckoutConfig) -> Self {
        Self { db, shipping, config }
    }
}

/// The shipping quote an order is priced with.
struct ShippingQuote {
    courier: CourierSelection,
    cost: Rupiah,
    rate: Option<ShippingRate>,
    fallback_reason: Option<String>,
}

impl<B> CheckoutApi<B>
where B: OrderEngineDatabase
{
    /// Checks out the cart in `request`.
    ///
    /// Stock is checked here for a fast answer, and again under the write lock when the order is inserted. Totals are
    /// always computed from the cart lines and the shipping quote; nothing the client claims about prices is used.
    pub async fn checkout(
        &self,
        request: CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, OrderEngineError> {
        validate_contact(&request)?;
        let lines = self.db.fetch_cart_lines(request.cart_id).await?;
        if lines.is_empty() {
            return Err(OrderEngineError::CartEmpty(request.cart_id));
        }
        check_stock(&lines)?;
        let items = lines.iter().map(order_item).collect::<Vec<_>>();
        let subtotal = items.iter().map(NewOrderItem::subtotal).sum::<Rupiah>();
        let item_weight = items.iter().map(|i| i.weight_grams * i.quantity).sum::<i64>();
        let weight_grams = item_weight.max(self.config.min_weight_grams);
        let rate_items = items.iter().map(rate_item).collect::<Vec<_>>();

        let quote = self.quote_shipping(&request, rate_items.clone()).await;
        let total_amount = subtotal + quote.cost + request.tax - request.discount;
        if !total_amount.is_positive() {
            return Err(OrderEngineError::ValidationError(format!("Order total {total_amount} must be positive")));
        }

        let mut metadata = Metadata::new()
            .with(keys::SHIPPING_ADDRESS, &request.address)
            .with(keys::COURIER, &quote.courier)
            .with(keys::TOTAL_WEIGHT_GRAMS, weight_grams)
            .with(keys::DESTINATION_POSTAL_CODE, &request.address.postal_code);
        if let Some(address_id) = request.address_id {
            metadata.insert(keys::ADDRESS_ID, address_id);
        }
        if let Some(rate) = &quote.rate {
            metadata.insert(keys::SHIPPING_RATE, rate);
        }
        if let Some(reason) = &quote.fallback_reason {
            let breadcrumb = Metadata::new().with("reason", reason).with("cost", quote.cost).with("at", now);
            metadata.insert(keys::SHIPPING_FALLBACK, breadcrumb);
        }
        let shipment = NewShipment {
            provider_code: quote.courier.courier_code.clone(),
            provider_name: quote.courier.courier_name.clone(),
            service_code: quote.courier.service_code.clone(),
            service_name: quote.courier.service_name.clone(),
            cost: quote.cost,
            etd: quote.courier.etd.clone(),
            weight_grams,
            origin_postal_code: self.config.origin_postal_code.clone(),
            destination_postal_code: request.address.postal_code.clone(),
        };
        let new_order = NewOrder {
            user_id: request.user_id,
            cart_id: request.cart_id,
            customer_name: request.customer.name.trim().to_string(),
            customer_email: request.customer.email.trim().to_string(),
            customer_phone: request.customer.phone.trim().to_string(),
            subtotal,
            shipping_cost: quote.cost,
            tax: request.tax,
            discount: request.discount,
            total_amount,
            metadata,
            items,
            shipment,
        };
        let order = self.db.insert_checkout_order(new_order, now).await?;
        info!(
            "🔄️ Order {} checked out from cart #{}: {} ({} via {}/{})",
            order.order_code,
            request.cart_id,
            order.total_amount,
            quote.cost,
            quote.courier.courier_code,
            quote.courier.service_code
        );
        let (order, draft_order_id) = self.register_draft_order(order, &request, rate_items, now).await;
        Ok(CheckoutResult {
            order,
            courier: quote.courier,
            shipping_fallback: quote.fallback_reason.is_some(),
            draft_order_id,
        })
    }

    async fn quote_shipping(&self, request: &CheckoutRequest, items: Vec<RateItem>) -> ShippingQuote {
        let rate_request = RateRequest {
            origin_postal_code: self.config.origin_postal_code.clone(),
            destination_postal_code: request.address.postal_code.clone(),
            couriers: vec![request.courier_code.clone()],
            items,
        };
        let reason = match with_gateway_timeout(self.shipping.get_rates(rate_request)).await {
            Ok(rates) => match rates.into_iter().find(|r| r.matches(&request.courier_code, &request.service_code)) {
                Some(rate) => {
                    let courier = CourierSelection {
                        courier_code: rate.courier_code.clone(),
                        courier_name: rate.courier_name.clone(),
                        service_code: rate.service_code.clone(),
                        service_name: rate.service_name.clone(),
                        etd: rate.duration.clone(),
                    };
                    return ShippingQuote { courier, cost: rate.price, rate: Some(rate), fallback_reason: None };
                },
                None => format!("No rate offered for {}/{}", request.courier_code, request.service_code),
            },
            Err(e) => e.to_string(),
        };
        let cost = self.config.fallback_cost;
        warn!("🚚️ Using the fallback shipping cost of {cost} for cart #{}. {reason}", request.cart_id);
        let courier = CourierSelection {
            courier_code: request.courier_code.clone(),
            courier_name: request.courier_code.to_uppercase(),
            service_code: request.service_code.clone(),
            service_name: request.service_code.to_uppercase(),
            etd: self.config.fallback_etd.clone(),
        };
        ShippingQuote { courier, cost: self.config.fallback_cost, rate: None, fallback_reason: Some(reason) }
    }

    /// Pre-registers the waybill with the shipping gateway. Failures leave a breadcrumb and are otherwise ignored.
    async fn register_draft_order(
        &self,
        order: Order,
        request: &CheckoutRequest,
        items: Vec<RateItem>,
        now: DateTime<Utc>,
    ) -> (Order, Option<String>) {
        let draft_request = DraftOrderRequest {
            order_code: order.order_code.clone(),
            origin_postal_code: self.config.origin_postal_code.clone(),
            destination: request.address.clone(),
            items,
            courier_code: request.courier_code.clone(),
            service_code: request.service_code.clone(),
        };
        let (breadcrumb, draft_id) = match with_gateway_timeout(self.shipping.create_draft_order(draft_request)).await {
            Ok(draft) => match self.db.record_draft_order(order.id, &draft.id, now).await {
                Ok(_) => (Metadata::new().with(keys::DRAFT_ORDER_ID, &draft.id), Some(draft.id)),
                Err(e) => {
                    error!("🚚️ Draft order {} for {} could not be saved. {e}", draft.id, order.order_code);
                    (Metadata::new().with(keys::DRAFT_ORDER_ERROR, e.to_string()), None)
                },
            },
            Err(e) => {
                warn!("🚚️ No draft order for {}. A local resi will be used at shipping time. {e}", order.order_code);
                (Metadata::new().with(keys::DRAFT_ORDER_ERROR, e.to_string()), None)
            },
        };
        match self.db.annotate_order(order.id, breadcrumb, now).await {
            Ok(annotated) => (annotated, draft_id),
            Err(e) => {
                error!("🔄️ Could not annotate order {} with its draft order result. {e}", order.order_code);
                (order, draft_id)
            },
        }
    }
}

fn validate_contact(request: &CheckoutRequest) -> Result<(), OrderEngineError> {
    let customer = &request.customer;
    if customer.name.trim().is_empty() || customer.phone.trim().is_empty() {
        return Err(OrderEngineError::ValidationError("Customer name and phone are required".into()));
    }
    if !customer.email.contains('@') {
        return Err(OrderEngineError::ValidationError(format!("'{}' is not an email address", customer.email)));
    }
    if request.courier_code.trim().is_empty() || request.service_code.trim().is_empty() {
        return Err(OrderEngineError::ValidationError("Choose a courier and a service".into()));
    }
    if request.tax.value() < 0 || request.discount.value() < 0 {
        return Err(OrderEngineError::ValidationError("Tax and discount cannot be negative".into()));
    }
    validate_address(&request.address)
}

fn validate_address(address: &AddressSnapshot) -> Result<(), OrderEngineError> {
    let missing = [
        ("recipient name", &address.recipient_name),
        ("phone", &address.phone),
        ("address", &address.address_line),
        ("city", &address.city),
        ("province", &address.province),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| k)
    .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(OrderEngineError::InvalidAddress(format!("Missing {}", missing.join(", "))));
    }
    if !address.has_valid_postal_code() {
        return Err(OrderEngineError::InvalidAddress(format!("'{}' is not a postal code", address.postal_code)));
    }
    Ok(())
}

/// Products without tracked stock (stock 0) are backed by variants, whose stock is not managed here.
fn check_stock(lines: &[CartLine]) -> Result<(), OrderEngineError> {
    for line in lines {
        if line.quantity <= 0 {
            return Err(OrderEngineError::ValidationError(format!(
                "Cart line #{} has quantity {}",
                line.cart_item_id, line.quantity
            )));
        }
        if line.stock > 0 && line.stock < line.quantity {
            return Err(OrderEngineError::InsufficientStock {
                product_id: line.product_id,
                requested: line.quantity,
                available: line.stock,
            });
        }
    }
    Ok(())
}

fn order_item(line: &CartLine) -> NewOrderItem {
    NewOrderItem {
        product_id: line.product_id,
        variant_id: line.variant_id,
        product_name: line.product_name.clone(),
        product_image: line.image_url.clone(),
        quantity: line.quantity,
        unit_price: line.price,
        weight_grams: line.weight_grams,
    }
}

fn rate_item(item: &NewOrderItem) -> RateItem {
    RateItem {
        name: item.product_name.clone(),
        value: item.unit_price,
        weight_grams: item.weight_grams,
        quantity: item.quantity,
    }
}
