use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known keys in order metadata. Anything else is carried through untouched.
pub mod keys {
    pub const SHIPPING_ADDRESS: &str = "shipping_address";
    pub const ADDRESS_ID: &str = "address_id";
    pub const COURIER: &str = "courier";
    pub const TOTAL_WEIGHT_GRAMS: &str = "total_weight_grams";
    pub const DESTINATION_POSTAL_CODE: &str = "destination_postal_code";
    pub const SHIPPING_RATE: &str = "shipping_rate";
    pub const SHIPPING_FALLBACK: &str = "shipping_fallback";
    pub const DRAFT_ORDER_ID: &str = "draft_order_id";
    pub const DRAFT_ORDER_ERROR: &str = "draft_order_error";
    pub const RESI_SOURCE: &str = "resi_source";
    pub const RESI_FALLBACK: &str = "resi_fallback";
}

/// An opaque JSON object stored in a TEXT column.
///
/// Known keys have typed accessors. Unknown keys round-trip verbatim, so new producers can add fields without a
/// migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Deserializes the value under `key` into `T`. A value of the wrong shape is treated as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> &mut Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.0.insert(key.to_string(), v);
            },
            Err(e) => warn!("🗃️ Could not serialize metadata value for '{key}'. {e}"),
        }
        self
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Copies every key from `other` into this map, overwriting existing entries.
    pub fn merge(&mut self, other: Metadata) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn shipping_address(&self) -> Option<AddressSnapshot> {
        self.get_as(keys::SHIPPING_ADDRESS)
    }

    pub fn courier(&self) -> Option<CourierSelection> {
        self.get_as(keys::COURIER)
    }

    pub fn destination_postal_code(&self) -> Option<&str> {
        self.get_str(keys::DESTINATION_POSTAL_CODE)
    }

    pub fn total_weight_grams(&self) -> Option<i64> {
        self.get_i64(keys::TOTAL_WEIGHT_GRAMS)
    }

    pub fn used_shipping_fallback(&self) -> bool {
        self.contains_key(keys::SHIPPING_FALLBACK)
    }
}

impl TryFrom<String> for Metadata {
    type Error = serde_json::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&value)
    }
}

impl From<Value> for Metadata {
    /// Objects are taken as-is. Any other JSON value is wrapped under a `value` key so that nothing is lost.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::default(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            },
        }
    }
}

impl From<Metadata> for Value {
    fn from(value: Metadata) -> Self {
        Value::Object(value.0)
    }
}

/// The shipping address as it was at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub recipient_name: String,
    pub phone: String,
    pub address_line: String,
    pub district: Option<String>,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub area_id: Option<String>,
}

impl AddressSnapshot {
    /// Indonesian postal codes are five digits.
    pub fn has_valid_postal_code(&self) -> bool {
        self.postal_code.len() == 5 && self.postal_code.chars().all(|c| c.is_ascii_digit())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierSelection {
    pub courier_code: String,
    pub courier_name: String,
    pub service_code: String,
    pub service_name: String,
    pub etd: String,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = json!({
            "courier": {
                "courier_code": "jne",
                "courier_name": "JNE",
                "service_code": "reg",
                "service_name": "Reguler",
                "etd": "2-3"
            },
            "gift_wrap": {"colour": "navy"}
        })
        .to_string();
        let meta = Metadata::try_from(raw).unwrap();
        assert_eq!(meta.courier().unwrap().courier_code, "jne");
        let again = Metadata::try_from(meta.to_json_string()).unwrap();
        assert_eq!(again.get("gift_wrap"), Some(&json!({"colour": "navy"})));
        assert_eq!(again, meta);
    }

    #[test]
    fn empty_and_non_object_values() {
        assert!(Metadata::try_from(String::new()).unwrap().is_empty());
        let meta = Metadata::from(json!("just a string"));
        assert_eq!(meta.get_str("value"), Some("just a string"));
        assert!(Metadata::from(Value::Null).is_empty());
    }

    #[test]
    fn postal_codes() {
        let mut addr = AddressSnapshot { postal_code: "40115".into(), ..Default::default() };
        assert!(addr.has_valid_postal_code());
        addr.postal_code = "4011".into();
        assert!(!addr.has_valid_postal_code());
        addr.postal_code = "4011A".into();
        assert!(!addr.has_valid_postal_code());
    }
}
