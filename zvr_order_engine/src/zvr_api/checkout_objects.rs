use serde::{Deserialize, Serialize};
use zvr_common::Rupiah;

use crate::{
    db_types::{AddressSnapshot, CourierSelection, Order},
    traits::CustomerDetails,
};

/// Everything the storefront sends when the customer presses "Pay".
///
/// Prices and totals are deliberately absent: they are recomputed from the cart and the shipping rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub cart_id: i64,
    pub user_id: Option<i64>,
    pub customer: CustomerDetails,
    pub courier_code: String,
    pub service_code: String,
    /// The saved address the snapshot was taken from, if the customer is logged in.
    pub address_id: Option<i64>,
    pub address: AddressSnapshot,
    #[serde(default)]
    pub tax: Rupiah,
    #[serde(default)]
    pub discount: Rupiah,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub order: Order,
    pub courier: CourierSelection,
    /// The shipping gateway could not quote this route, so the flat fallback cost was charged.
    pub shipping_fallback: bool,
    pub draft_order_id: Option<String>,
}

/// Static checkout settings.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub origin_postal_code: String,
    pub fallback_cost: Rupiah,
    pub fallback_etd: String,
    /// Shipping weight never goes below this, whatever the items weigh.
    pub min_weight_grams: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            origin_postal_code: "40115".to_string(),
            fallback_cost: Rupiah::from(15_000),
            fallback_etd: "3-5".to_string(),
            min_weight_grams: 1000,
        }
    }
}
