use crate::db_types::RefundStatus::{self, *};

/// `Processing -> Pending` happens when the gateway cannot refund yet and the refund waits for a manual transfer.
/// `Pending -> Completed` is that manual completion.
pub fn is_valid_refund_transition(from: RefundStatus, to: RefundStatus) -> bool {
    matches!(
        (from, to),
        (Pending, Processing | Completed | Failed) | (Processing, Completed | Failed | Pending)
    )
}

impl RefundStatus {
    pub fn can_transition_to(&self, to: RefundStatus) -> bool {
        is_valid_refund_transition(*self, to)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Completed | Failed)
    }
}
