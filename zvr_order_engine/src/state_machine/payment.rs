use crate::db_types::PaymentStatus::{self, *};

/// A payment only ever leaves `Pending`, and only once.
pub fn is_valid_payment_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    from == Pending && to.is_final()
}

impl PaymentStatus {
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        is_valid_payment_transition(*self, to)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_pending_moves() {
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                let expected = *from == Pending && *to != Pending;
                assert_eq!(is_valid_payment_transition(*from, *to), expected, "{from} -> {to}");
            }
        }
    }
}
