mod codes;
mod gateway_status;
mod refund_pricing;
mod signature;
mod timeouts;

pub use codes::{
    courier_code_for_resi,
    is_valid_order_code,
    is_valid_resi,
    new_external_gateway_id,
    new_order_code,
    new_refund_code,
    new_resi,
    order_code_from_external_id,
    validate_resi_input,
    MAX_CODE_ATTEMPTS,
};
pub use gateway_status::{map_gateway_status, map_tracking_status};
pub use refund_pricing::{quote_refund, RefundQuote};
pub use signature::{payment_signature, verify_payment_signature, SignatureInputs};
pub use timeouts::{with_gateway_timeout, GATEWAY_TIMEOUT};
