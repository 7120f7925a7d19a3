//! Human-facing identifiers: order codes, refund codes, gateway attempt ids and resi numbers.
//!
//! Randomness comes from `rand::thread_rng`, which is a CSPRNG. Uniqueness is still enforced by the database; the
//! callers retry on a unique-index violation, at most [`MAX_CODE_ATTEMPTS`] times.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use crate::traits::OrderEngineError;

/// Unambiguous upper-case alphabet: no `I`, `O`, `0` or `1`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const MAX_CODE_ATTEMPTS: usize = 10;

static ORDER_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ZVR-\d{8}-[A-HJ-NP-Z2-9]{8}$").expect("static regex"));
static RESI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ZVR-[A-Z]{2,10}-\d{8}-\d+-[A-F0-9]{4}$").expect("static regex"));
static RESI_INPUT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{8,}$").expect("static regex"));
static EXTERNAL_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<code>ZVR-\d{8}-[A-Z0-9]{8})(?:-\d+-[A-Za-z0-9]+)?$").expect("static regex"));

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char).collect()
}

/// `ZVR-YYYYMMDD-XXXXXXXX`
pub fn new_order_code(now: DateTime<Utc>) -> String {
    format!("ZVR-{}-{}", now.format("%Y%m%d"), random_suffix(8))
}

pub fn is_valid_order_code(code: &str) -> bool {
    ORDER_CODE_PATTERN.is_match(code)
}

/// `RFD-YYYYMMDD-XXXXXXXX`. Also used as the gateway's refund key.
pub fn new_refund_code(now: DateTime<Utc>) -> String {
    format!("RFD-{}-{}", now.format("%Y%m%d"), random_suffix(8))
}

/// A fresh gateway order id for one charge attempt: `{order_code}-{unix_ts}-{rand}`.
pub fn new_external_gateway_id(order_code: &str, now: DateTime<Utc>) -> String {
    let nonce: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("{order_code}-{}-{nonce}", now.timestamp())
}

/// Recovers the order code from a gateway order id by stripping the attempt suffix. Ids that do not follow the
/// attempt format (older integrations sent the bare order code) are returned unchanged.
pub fn order_code_from_external_id(external_id: &str) -> &str {
    match EXTERNAL_ID_PATTERN.captures(external_id).and_then(|c| c.name("code")) {
        Some(m) => m.as_str(),
        None => external_id,
    }
}

/// Upper-cases the courier code and keeps the first ten ASCII letters. `J&T` becomes `JT`, `sicepat` becomes
/// `SICEPAT`. Codes with fewer than two letters are replaced with `ZVR`.
pub fn courier_code_for_resi(courier_code: &str) -> String {
    let code: String =
        courier_code.chars().filter(|c| c.is_ascii_alphabetic()).map(|c| c.to_ascii_uppercase()).take(10).collect();
    if code.len() < 2 {
        "ZVR".to_string()
    } else {
        code
    }
}

/// `ZVR-{COURIER}-YYYYMMDD-{ORDERID}-{RANDOM4HEX}`
pub fn new_resi(courier_code: &str, order_id: i64, now: DateTime<Utc>) -> String {
    let nonce: u16 = rand::thread_rng().gen();
    format!("ZVR-{}-{}-{order_id}-{nonce:04X}", courier_code_for_resi(courier_code), now.format("%Y%m%d"))
}

/// True for resi numbers generated by [`new_resi`].
pub fn is_valid_resi(resi: &str) -> bool {
    RESI_PATTERN.is_match(resi)
}

/// Checks an admin-supplied resi and returns it trimmed.
pub fn validate_resi_input(resi: &str) -> Result<String, OrderEngineError> {
    let resi = resi.trim();
    if RESI_INPUT_PATTERN.is_match(resi) {
        Ok(resi.to_string())
    } else {
        Err(OrderEngineError::InvalidResiFormat(resi.to_string()))
    }
}
