use std::{
    future::{ready, Ready},
    net::IpAddr,
    str::FromStr,
};

use actix_web::{dev::Payload, http::header::USER_AGENT, web, FromRequest, HttpRequest};
use log::{debug, trace};
use regex::Regex;
use zvr_order_engine::{admin_objects::AdminContext, db_types::Actor};

use crate::{config::ServerOptions, errors::ServerError};

/// Set by the authenticating proxy in front of the server.
pub const ADMIN_ID_HEADER: &str = "X-Admin-Id";
pub const ADMIN_EMAIL_HEADER: &str = "X-Admin-Email";
pub const USER_ID_HEADER: &str = "X-User-Id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        let re = Regex::new(r#"for="?(?P<ip>[^;,"]+)"#).ok();
        result = req
            .headers()
            .get("Forwarded")
            .and_then(|v| v.to_str().ok())
            .zip(re.as_ref())
            .and_then(|(v, re)| re.captures(v))
            .and_then(|caps| caps.name("ip"))
            .and_then(|m| IpAddr::from_str(m.as_str()).ok());
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {peer_addr:?}");
        peer_addr
    })
}

fn header_str<'r>(req: &'r HttpRequest, name: &str) -> Option<&'r str> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|s| !s.is_empty())
}

/// The idempotency key for a mutating call. A key in the body wins over the `Idempotency-Key` header.
pub fn idempotency_key(req: &HttpRequest, from_body: Option<String>) -> Option<String> {
    from_body.filter(|k| !k.trim().is_empty()).or_else(|| header_str(req, IDEMPOTENCY_KEY_HEADER).map(String::from))
}

//----------------------------------------------   Sessions   ---------------------------------------------------------
/// The admin making the request, as vouched for by the authenticating proxy.
#[derive(Debug, Clone)]
pub struct AdminSession(pub AdminContext);

impl AdminSession {
    pub fn from_request_headers(req: &HttpRequest) -> Result<Self, ServerError> {
        let admin_id = header_str(req, ADMIN_ID_HEADER)
            .ok_or_else(|| ServerError::InsufficientPermissions(format!("{ADMIN_ID_HEADER} is required")))?
            .parse::<i64>()
            .map_err(|e| ServerError::InsufficientPermissions(format!("{ADMIN_ID_HEADER} is not an id. {e}")))?;
        let admin_email = header_str(req, ADMIN_EMAIL_HEADER)
            .ok_or_else(|| ServerError::InsufficientPermissions(format!("{ADMIN_EMAIL_HEADER} is required")))?
            .to_string();
        let options = req.app_data::<web::Data<ServerOptions>>().map(|o| ***o).unwrap_or_default();
        let ip_address =
            get_remote_ip(req, options.use_x_forwarded_for, options.use_forwarded).map(|ip| ip.to_string());
        let user_agent = header_str(req, USER_AGENT.as_str()).map(String::from);
        Ok(Self(AdminContext { admin_id, admin_email, ip_address, user_agent }))
    }

    pub fn context(&self) -> &AdminContext {
        &self.0
    }

    pub fn actor(&self) -> Actor {
        self.0.actor()
    }
}

impl FromRequest for AdminSession {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::from_request_headers(req))
    }
}

/// The storefront customer making the request. Guests carry no user id.
#[derive(Debug, Clone, Copy)]
pub struct CustomerSession {
    pub user_id: Option<i64>,
}

impl FromRequest for CustomerSession {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match header_str(req, USER_ID_HEADER) {
            None => Ok(Self { user_id: None }),
            Some(s) => s
                .parse::<i64>()
                .map(|id| Self { user_id: Some(id) })
                .map_err(|e| ServerError::InsufficientPermissions(format!("{USER_ID_HEADER} is not an id. {e}"))),
        };
        ready(result)
    }
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn remote_ip_preference() {
        let req = TestRequest::default()
            .peer_addr("10.0.0.7:5123".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.1"))
            .insert_header(("Forwarded", "for=198.51.100.4;proto=https"))
            .to_http_request();
        assert_eq!(get_remote_ip(&req, true, true), Some("203.0.113.9".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, true), Some("198.51.100.4".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, false), Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn admin_session_needs_both_headers() {
        let req = TestRequest::default().insert_header((ADMIN_EMAIL_HEADER, "ops@zvr.id")).to_http_request();
        assert!(matches!(AdminSession::from_request_headers(&req), Err(ServerError::InsufficientPermissions(_))));
        let req = TestRequest::default()
            .insert_header((ADMIN_ID_HEADER, "3"))
            .insert_header((ADMIN_EMAIL_HEADER, "ops@zvr.id"))
            .insert_header((USER_AGENT, "zvr-admin/1.0"))
            .to_http_request();
        let session = AdminSession::from_request_headers(&req).unwrap();
        assert_eq!(session.context().admin_id, 3);
        assert_eq!(session.actor().to_string(), "admin:ops@zvr.id");
        assert_eq!(session.context().user_agent.as_deref(), Some("zvr-admin/1.0"));
    }

    #[test]
    fn idempotency_keys() {
        let req = TestRequest::default().insert_header((IDEMPOTENCY_KEY_HEADER, "from-header")).to_http_request();
        assert_eq!(idempotency_key(&req, Some("from-body".into())).as_deref(), Some("from-body"));
        assert_eq!(idempotency_key(&req, Some(" ".into())).as_deref(), Some("from-header"));
        assert_eq!(idempotency_key(&req, None).as_deref(), Some("from-header"));
        let req = TestRequest::default().to_http_request();
        assert_eq!(idempotency_key(&req, None), None);
    }
}
