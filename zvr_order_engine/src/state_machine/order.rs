use crate::db_types::OrderStatusType::{self, *};

/// The legal order moves. Moving to the current state is not a transition and returns `false`; callers treat it as an
/// idempotent no-op before they get here.
pub fn is_valid_order_transition(from: OrderStatusType, to: OrderStatusType) -> bool {
    matches!(
        (from, to),
        (Pending, Paid | Expired | Cancelled | Failed) |
            (Paid, Packing | Cancelled) |
            (Packing, Shipped | Cancelled) |
            (Shipped, Delivered) |
            (Delivered, Completed | Refunded) |
            (Completed, Refunded)
    )
}

impl OrderStatusType {
    /// No outgoing transitions except by admin override. `Completed` keeps its one exit to `Refunded`, since refunds
    /// may complete after the grace period.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Completed | Cancelled | Expired | Failed | Refunded)
    }

    pub fn can_transition_to(&self, to: OrderStatusType) -> bool {
        is_valid_order_transition(*self, to)
    }

    pub fn can_be_cancelled_by_admin(&self) -> bool {
        matches!(self, Pending | Paid | Packing)
    }

    pub fn can_be_cancelled_by_customer(&self) -> bool {
        matches!(self, Pending)
    }

    /// Entering one of these states gives reserved stock back.
    pub fn requires_stock_restore(&self) -> bool {
        matches!(self, Cancelled | Expired | Failed)
    }

    /// The customer's money has been received at some point.
    pub fn has_been_paid(&self) -> bool {
        matches!(self, Paid | Packing | Shipped | Delivered | Completed | Refunded)
    }

    /// The resi may no longer change once the parcel is with the courier.
    pub fn resi_is_locked(&self) -> bool {
        matches!(self, Shipped | Delivered | Completed | Refunded)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, Delivered | Completed)
    }

    /// Moves an admin may force even though the transition table says no. A payment that settles after its order
    /// was annulled can be honoured, provided the stock can be taken again.
    pub fn admin_override_allowed(&self, to: OrderStatusType) -> bool {
        matches!((self, to), (Expired | Cancelled | Failed, Paid))
    }
}
