use thiserror::Error;

/// Failures reported by the payment and shipping gateway ports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("The gateway did not respond in time")]
    Timeout,
    #[error("The gateway is not reachable. {0}")]
    Unavailable(String),
    #[error("The gateway rejected the request ({code}). {message}")]
    Rejected { code: String, message: String },
    #[error("The gateway does not support this payment type")]
    InvalidPaymentType,
    #[error("The settlement window is not open yet. Retry later or refund manually")]
    SettlementWindowClosed,
    #[error("The transaction has already been refunded")]
    AlreadyRefunded,
    #[error("The gateway returned a server error (HTTP {status})")]
    Server { status: u16 },
    #[error("Could not make sense of the gateway response. {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Worth trying again later: timeouts, 5xx, and the 418 settlement window.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout |
                GatewayError::Unavailable(_) |
                GatewayError::Server { .. } |
                GatewayError::SettlementWindowClosed
        )
    }

    /// Maps a gateway HTTP status to an error. Returns `None` for 2xx.
    pub fn from_http_status(status: u16, message: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            412 => Some(GatewayError::AlreadyRefunded),
            418 => Some(GatewayError::SettlementWindowClosed),
            500..=599 => Some(GatewayError::Server { status }),
            code => Some(GatewayError::Rejected { code: code.to_string(), message: message.to_string() }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(GatewayError::from_http_status(201, ""), None);
        assert_eq!(GatewayError::from_http_status(412, ""), Some(GatewayError::AlreadyRefunded));
        assert_eq!(GatewayError::from_http_status(418, ""), Some(GatewayError::SettlementWindowClosed));
        assert_eq!(GatewayError::from_http_status(503, ""), Some(GatewayError::Server { status: 503 }));
        let rejected = GatewayError::from_http_status(406, "duplicate order id").unwrap();
        assert!(!rejected.is_transient());
        assert!(GatewayError::SettlementWindowClosed.is_transient());
        assert!(!GatewayError::AlreadyRefunded.is_transient());
    }
}
