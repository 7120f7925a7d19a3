use std::collections::HashSet;

use zvr_common::Rupiah;

use crate::{
    db_types::{NewRefundItem, Order, OrderItem, RefundType},
    traits::{OrderEngineError, RefundLine},
};

/// How a refund request breaks down, before the balance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundQuote {
    pub refund_amount: Rupiah,
    pub shipping_refund: Rupiah,
    pub items_refund: Rupiah,
    /// The order lines whose stock comes back when the refund completes. Empty for `PARTIAL` and `SHIPPING_ONLY`.
    pub items: Vec<NewRefundItem>,
}

/// Works out the amounts for a refund of the given type.
///
/// * `FULL` refunds the order total, split into shipping and items, and covers every order line.
/// * `SHIPPING_ONLY` refunds the shipping cost.
/// * `PARTIAL` refunds the caller's `amount`, booked against items. No stock comes back.
/// * `ITEM_ONLY` refunds `quantity × unit_price` for each selected line.
pub fn quote_refund(
    order: &Order,
    order_items: &[OrderItem],
    refund_type: RefundType,
    amount: Option<Rupiah>,
    lines: &[RefundLine],
) -> Result<RefundQuote, OrderEngineError> {
    let zero = Rupiah::default();
    let quote = match refund_type {
        RefundType::Full => RefundQuote {
            refund_amount: order.total_amount,
            shipping_refund: order.shipping_cost,
            items_refund: order.total_amount - order.shipping_cost,
            items: order_items
                .iter()
                .map(|i| NewRefundItem {
                    order_item_id: i.id,
                    quantity: i.quantity,
                    price: i.unit_price,
                    refund_amount: i.subtotal,
                })
                .collect(),
        },
        RefundType::ShippingOnly => {
            if !order.shipping_cost.is_positive() {
                return Err(OrderEngineError::InvalidRefundRequest(format!(
                    "Order {} has no shipping cost to refund",
                    order.order_code
                )));
            }
            RefundQuote {
                refund_amount: order.shipping_cost,
                shipping_refund: order.shipping_cost,
                items_refund: zero,
                items: vec![],
            }
        },
        RefundType::Partial => {
            let amount = amount.filter(|a| a.is_positive()).ok_or_else(|| {
                OrderEngineError::InvalidRefundRequest("A partial refund needs a positive amount".to_string())
            })?;
            RefundQuote { refund_amount: amount, shipping_refund: zero, items_refund: amount, items: vec![] }
        },
        RefundType::ItemOnly => {
            if lines.is_empty() {
                return Err(OrderEngineError::InvalidRefundRequest("No items were selected".to_string()));
            }
            let mut seen = HashSet::new();
            let mut items = Vec::with_capacity(lines.len());
            for line in lines {
                if !seen.insert(line.order_item_id) {
                    return Err(OrderEngineError::InvalidRefundRequest(format!(
                        "Order item #{} is listed more than once",
                        line.order_item_id
                    )));
                }
                let item = order_items.iter().find(|i| i.id == line.order_item_id).ok_or_else(|| {
                    OrderEngineError::InvalidRefundRequest(format!(
                        "Order item #{} does not belong to order {}",
                        line.order_item_id, order.order_code
                    ))
                })?;
                if line.quantity <= 0 || line.quantity > item.quantity {
                    return Err(OrderEngineError::InvalidRefundRequest(format!(
                        "Cannot refund {} of order item #{}; {} were ordered",
                        line.quantity, item.id, item.quantity
                    )));
                }
                items.push(NewRefundItem {
                    order_item_id: item.id,
                    quantity: line.quantity,
                    price: item.unit_price,
                    refund_amount: item.unit_price * line.quantity,
                });
            }
            let total: Rupiah = items.iter().map(|i| i.refund_amount).sum();
            RefundQuote { refund_amount: total, shipping_refund: zero, items_refund: total, items }
        },
    };
    if !quote.refund_amount.is_positive() {
        return Err(OrderEngineError::InvalidRefundRequest("Refund amount must be positive".to_string()));
    }
    Ok(quote)
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::{Metadata, OrderRefundStatus, OrderStatusType};

    fn order() -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            order_code: "ZVR-20240610-AB3DEFGH".into(),
            user_id: Some(9),
            customer_name: "Sari".into(),
            customer_email: "sari@example.com".into(),
            customer_phone: "08123456789".into(),
            subtotal: Rupiah::from(285_000),
            shipping_cost: Rupiah::from(15_000),
            tax: Rupiah::default(),
            discount: Rupiah::default(),
            total_amount: Rupiah::from(300_000),
            status: OrderStatusType::Delivered,
            stock_reserved: true,
            resi: Some("JNE1234567".into()),
            refund_status: OrderRefundStatus::NotRefunded,
            refund_amount: Rupiah::default(),
            metadata: Metadata::default(),
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn items() -> Vec<OrderItem> {
        let now = Utc::now();
        vec![
            OrderItem {
                id: 11,
                order_id: 1,
                product_id: 100,
                variant_id: None,
                product_name: "Linen shirt".into(),
                product_image: None,
                quantity: 1,
                unit_price: Rupiah::from(185_000),
                subtotal: Rupiah::from(185_000),
                weight_grams: 300,
                created_at: now,
            },
            OrderItem {
                id: 12,
                order_id: 1,
                product_id: 101,
                variant_id: Some(3),
                product_name: "Canvas tote".into(),
                product_image: None,
                quantity: 2,
                unit_price: Rupiah::from(50_000),
                subtotal: Rupiah::from(100_000),
                weight_grams: 200,
                created_at: now,
            },
        ]
    }

    #[test]
    fn full_refund_covers_everything() {
        let q = quote_refund(&order(), &items(), RefundType::Full, None, &[]).unwrap();
        assert_eq!(q.refund_amount, Rupiah::from(300_000));
        assert_eq!(q.shipping_refund, Rupiah::from(15_000));
        assert_eq!(q.items_refund, Rupiah::from(285_000));
        assert_eq!(q.items.len(), 2);
    }

    #[test]
    fn shipping_only_and_partial() {
        let q = quote_refund(&order(), &items(), RefundType::ShippingOnly, None, &[]).unwrap();
        assert_eq!(q.refund_amount, Rupiah::from(15_000));
        assert_eq!(q.items_refund, Rupiah::default());
        let q = quote_refund(&order(), &items(), RefundType::Partial, Some(Rupiah::from(200_000)), &[]).unwrap();
        assert_eq!(q.items_refund, Rupiah::from(200_000));
        assert!(q.items.is_empty());
        let err = quote_refund(&order(), &items(), RefundType::Partial, None, &[]).unwrap_err();
        assert!(matches!(err, OrderEngineError::InvalidRefundRequest(_)));
        let err = quote_refund(&order(), &items(), RefundType::Partial, Some(Rupiah::from(-5)), &[]).unwrap_err();
        assert!(matches!(err, OrderEngineError::InvalidRefundRequest(_)));
    }

    #[test]
    fn item_refunds_are_validated() {
        let lines = [RefundLine { order_item_id: 12, quantity: 1 }];
        let q = quote_refund(&order(), &items(), RefundType::ItemOnly, None, &lines).unwrap();
        assert_eq!(q.refund_amount, Rupiah::from(50_000));
        assert_eq!(q.items[0].quantity, 1);

        let too_many = [RefundLine { order_item_id: 12, quantity: 3 }];
        assert!(quote_refund(&order(), &items(), RefundType::ItemOnly, None, &too_many).is_err());
        let stranger = [RefundLine { order_item_id: 99, quantity: 1 }];
        assert!(quote_refund(&order(), &items(), RefundType::ItemOnly, None, &stranger).is_err());
        let twice = [RefundLine { order_item_id: 11, quantity: 1 }, RefundLine { order_item_id: 11, quantity: 1 }];
        assert!(quote_refund(&order(), &items(), RefundType::ItemOnly, None, &twice).is_err());
        assert!(quote_refund(&order(), &items(), RefundType::ItemOnly, None, &[]).is_err());
    }
}
