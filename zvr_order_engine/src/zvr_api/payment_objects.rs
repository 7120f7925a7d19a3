use serde::{Deserialize, Serialize};

use crate::{db_types::Metadata, helpers::SignatureInputs};

/// A payment notification, normalised by the HTTP adapter.
///
/// `signature_inputs` carries the raw strings the gateway signed. They are kept apart from the parsed fields because
/// the signature must be checked against exactly what arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    /// The gateway order id: the order code with the attempt suffix.
    pub external_id: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_type: Option<String>,
    pub signature_inputs: SignatureInputs,
    pub signature: String,
    /// The full body, kept on the payment row and in the sync log.
    pub raw: Metadata,
}

impl WebhookNotification {
    pub fn order_code(&self) -> &str {
        crate::helpers::order_code_from_external_id(&self.external_id)
    }
}
