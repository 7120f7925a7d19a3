use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// The raw webhook fields that are covered by the gateway signature, exactly as they arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInputs {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
}

/// `hex(SHA512(order_id ∥ status_code ∥ gross_amount ∥ server_key))`
pub fn payment_signature(inputs: &SignatureInputs, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(inputs.order_id.as_bytes());
    hasher.update(inputs.status_code.as_bytes());
    hasher.update(inputs.gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_payment_signature(inputs: &SignatureInputs, server_key: &str, signature: &str) -> bool {
    let expected = payment_signature(inputs, server_key);
    let given = signature.trim().to_ascii_lowercase();
    // Compare every byte regardless of where the first mismatch is.
    expected.len() == given.len() && expected.bytes().zip(given.bytes()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
