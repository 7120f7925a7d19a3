use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use thiserror::Error;
use zvr_order_engine::{AdminActionError, ErrorKind, OrderEngineError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Missing or invalid session headers. {0}")]
    InsufficientPermissions(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Engine(#[from] OrderEngineError),
    #[error("{0}")]
    AdminAction(#[from] AdminActionError),
}

impl ServerError {
    /// The engine's error class, for errors that came out of the engine.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Engine(e) => Some(e.kind()),
            Self::AdminAction(e) => Some(e.kind()),
            _ => None,
        }
    }
}

pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::GatewayTransient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::GatewayPermanent => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::InitializeError(_) | Self::ConfigurationError(_) | Self::IOError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            Self::Engine(e) => status_for_kind(e.kind()),
            Self::AdminAction(e) => status_for_kind(e.kind()),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Database details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("💻️ {self}");
            "An internal error occurred. The request was not applied.".to_string()
        } else {
            self.to_string()
        };
        let mut body = serde_json::json!({ "error": message });
        if let Self::AdminAction(e) = self {
            if let Some(audit_id) = e.audit_id() {
                body["audit_id"] = audit_id.into();
            }
        }
        HttpResponse::build(status).insert_header(ContentType::json()).body(body.to_string())
    }
}
