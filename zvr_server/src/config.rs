use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use zvr_common::{parse_boolean_flag, Rupiah, Secret};
use zvr_order_engine::checkout_objects::CheckoutConfig;

use crate::errors::ServerError;

const DEFAULT_ZVR_HOST: &str = "127.0.0.1";
const DEFAULT_ZVR_PORT: u16 = 8470;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_BUSY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ORIGIN_POSTAL_CODE: &str = "40115";
const DEFAULT_FALLBACK_SHIPPING_COST: i64 = 15_000;
const DEFAULT_ORDER_EXPIRY_HOURS: i64 = 24;
const DEFAULT_AUTO_COMPLETE_DAYS: i64 = 7;
const DEFAULT_RECONCILIATION_HOUR: u32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl FromStr for PaymentEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(format!("'{other}' is not a payment environment. Use 'sandbox' or 'production'")),
        }
    }
}

impl Display for PaymentEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => f.write_str("sandbox"),
            Self::Production => f.write_str("production"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// How long a writer waits for the database write lock.
    pub db_busy_timeout: StdDuration,
    /// The key the payment gateway signs its notifications with.
    pub payment_server_key: Secret<String>,
    pub payment_environment: PaymentEnvironment,
    pub shipping_api_key: Secret<String>,
    pub origin_postal_code: String,
    /// Charged when the shipping aggregator cannot quote a rate.
    pub fallback_shipping_cost: Rupiah,
    pub enable_tracking_job: bool,
    /// Development only. Refunds are settled as manual transfers instead of going through the gateway.
    pub skip_gateway_refund: bool,
    /// Unpaid orders older than this are expired.
    pub order_expiry: Duration,
    /// Delivered orders older than this are completed.
    pub auto_complete_after: Duration,
    /// The UTC hour at which the previous day is reconciled.
    pub reconciliation_hour: u32,
    /// If true, the X-Forwarded-For header is used for the client address recorded in admin audit rows.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header is used for the client address recorded in admin audit rows.
    pub use_forwarded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ZVR_HOST.to_string(),
            port: DEFAULT_ZVR_PORT,
            database_url: String::default(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            db_busy_timeout: StdDuration::from_secs(DEFAULT_DB_BUSY_TIMEOUT_SECS),
            payment_server_key: Secret::default(),
            payment_environment: PaymentEnvironment::Sandbox,
            shipping_api_key: Secret::default(),
            origin_postal_code: DEFAULT_ORIGIN_POSTAL_CODE.to_string(),
            fallback_shipping_cost: Rupiah::from(DEFAULT_FALLBACK_SHIPPING_COST),
            enable_tracking_job: true,
            skip_gateway_refund: false,
            order_expiry: Duration::hours(DEFAULT_ORDER_EXPIRY_HOURS),
            auto_complete_after: Duration::days(DEFAULT_AUTO_COMPLETE_DAYS),
            reconciliation_hour: DEFAULT_RECONCILIATION_HOUR,
            use_x_forwarded_for: false,
            use_forwarded: false,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    /// Reads the configuration from the environment. The server refuses to start without a database URL and a
    /// payment server key.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. `lookup` returns `None` for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where F: Fn(&str) -> Option<String> {
        let defaults = Self::default();
        let database_url = lookup("DB_URL").filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            ServerError::ConfigurationError("DB_URL is not set. Set it to the URL of the order database.".into())
        })?;
        let payment_server_key = lookup("PAYMENT_SERVER_KEY").filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            ServerError::ConfigurationError(
                "PAYMENT_SERVER_KEY is not set. Webhook signatures cannot be checked without it.".into(),
            )
        })?;
        let payment_environment = match lookup("PAYMENT_ENVIRONMENT") {
            Some(s) => s.parse::<PaymentEnvironment>().map_err(ServerError::ConfigurationError)?,
            None => {
                info!("🪛️ PAYMENT_ENVIRONMENT is not set. Using the sandbox.");
                PaymentEnvironment::Sandbox
            },
        };
        let skip_gateway_refund = parse_boolean_flag(lookup("SKIP_GATEWAY_REFUND"), false);
        if skip_gateway_refund && payment_environment == PaymentEnvironment::Production {
            return Err(ServerError::ConfigurationError(
                "SKIP_GATEWAY_REFUND cannot be used with the production payment environment.".into(),
            ));
        }
        if skip_gateway_refund {
            warn!("🚨️ SKIP_GATEWAY_REFUND is set. Refunds will be settled manually and never reach the gateway.");
        }
        let shipping_api_key = lookup("SHIPPING_API_KEY").unwrap_or_else(|| {
            warn!("🪛️ SHIPPING_API_KEY is not set. Shipping rates will fall back to the flat cost.");
            String::default()
        });
        let reconciliation_hour = parse_or_default(&lookup, "RECONCILIATION_HOUR", defaults.reconciliation_hour);
        let reconciliation_hour = if reconciliation_hour < 24 {
            reconciliation_hour
        } else {
            warn!("🪛️ RECONCILIATION_HOUR must be between 0 and 23. Using {DEFAULT_RECONCILIATION_HOUR} instead.");
            DEFAULT_RECONCILIATION_HOUR
        };
        let config = Self {
            host: lookup("ZVR_HOST").unwrap_or(defaults.host),
            port: parse_or_default(&lookup, "ZVR_PORT", defaults.port),
            database_url,
            db_max_connections: parse_or_default(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections),
            db_busy_timeout: StdDuration::from_secs(parse_or_default(
                &lookup,
                "DB_BUSY_TIMEOUT_SECS",
                DEFAULT_DB_BUSY_TIMEOUT_SECS,
            )),
            payment_server_key: Secret::new(payment_server_key),
            payment_environment,
            shipping_api_key: Secret::new(shipping_api_key),
            origin_postal_code: lookup("SHIPPING_ORIGIN_POSTAL_CODE").unwrap_or(defaults.origin_postal_code),
            fallback_shipping_cost: Rupiah::from(parse_or_default(
                &lookup,
                "SHIPPING_FALLBACK_COST",
                DEFAULT_FALLBACK_SHIPPING_COST,
            )),
            enable_tracking_job: parse_boolean_flag(lookup("ENABLE_TRACKING_JOB"), true),
            skip_gateway_refund,
            order_expiry: Duration::hours(parse_or_default(&lookup, "ORDER_EXPIRY_HOURS", DEFAULT_ORDER_EXPIRY_HOURS)),
            auto_complete_after: Duration::days(parse_or_default(
                &lookup,
                "AUTO_COMPLETE_DAYS",
                DEFAULT_AUTO_COMPLETE_DAYS,
            )),
            reconciliation_hour,
            use_x_forwarded_for: parse_boolean_flag(lookup("ZVR_USE_X_FORWARDED_FOR"), false),
            use_forwarded: parse_boolean_flag(lookup("ZVR_USE_FORWARDED"), false),
        };
        Ok(config)
    }

    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            origin_postal_code: self.origin_postal_code.clone(),
            fallback_cost: self.fallback_shipping_cost,
            ..Default::default()
        }
    }
}

fn parse_or_default<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    match lookup(name) {
        Some(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        None => default,
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// The part of the configuration that request handlers need. Secrets stay out of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
    pub skip_gateway_refund: bool,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
            skip_gateway_refund: config.skip_gateway_refund,
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, ServerError> {
        let vars = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("DB_URL", "sqlite://data/test.db"), ("PAYMENT_SERVER_KEY", "SB-Mid-server")];

    #[test]
    fn required_values() {
        let err = config_from(&[("PAYMENT_SERVER_KEY", "SB-Mid-server")]).unwrap_err();
        assert!(err.to_string().contains("DB_URL"));
        let err = config_from(&[("DB_URL", "sqlite://data/test.db")]).unwrap_err();
        assert!(err.to_string().contains("PAYMENT_SERVER_KEY"));
        let err = config_from(&[("DB_URL", "sqlite://data/test.db"), ("PAYMENT_SERVER_KEY", " ")]).unwrap_err();
        assert!(matches!(err, ServerError::ConfigurationError(_)));
    }

    #[test]
    fn defaults() {
        let config = config_from(&REQUIRED).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8470);
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.db_busy_timeout, StdDuration::from_secs(10));
        assert_eq!(config.payment_environment, PaymentEnvironment::Sandbox);
        assert_eq!(config.payment_server_key.reveal(), "SB-Mid-server");
        assert_eq!(config.origin_postal_code, "40115");
        assert_eq!(config.fallback_shipping_cost, Rupiah::from(15_000));
        assert!(config.enable_tracking_job);
        assert!(!config.skip_gateway_refund);
        assert_eq!(config.order_expiry, Duration::hours(24));
        assert_eq!(config.auto_complete_after, Duration::days(7));
        assert_eq!(config.reconciliation_hour, 2);
    }

    #[test]
    fn overrides_and_bad_values() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("ZVR_PORT", "not-a-port"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("PAYMENT_ENVIRONMENT", "Production"),
            ("ENABLE_TRACKING_JOB", "off"),
            ("ORDER_EXPIRY_HOURS", "12"),
            ("RECONCILIATION_HOUR", "27"),
            ("SHIPPING_FALLBACK_COST", "20000"),
        ]);
        let config = config_from(&vars).unwrap();
        assert_eq!(config.port, 8470);
        assert_eq!(config.db_max_connections, 4);
        assert_eq!(config.payment_environment, PaymentEnvironment::Production);
        assert!(!config.enable_tracking_job);
        assert_eq!(config.order_expiry, Duration::hours(12));
        assert_eq!(config.reconciliation_hour, 2);
        assert_eq!(config.checkout_config().fallback_cost, Rupiah::from(20_000));
    }

    #[test]
    fn skipping_gateway_refunds_is_refused_in_production() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SKIP_GATEWAY_REFUND", "true"));
        assert!(config_from(&vars).unwrap().skip_gateway_refund);
        vars.push(("PAYMENT_ENVIRONMENT", "production"));
        let err = config_from(&vars).unwrap_err();
        assert!(err.to_string().contains("SKIP_GATEWAY_REFUND"));
        vars.pop();
        vars.push(("PAYMENT_ENVIRONMENT", "staging"));
        assert!(config_from(&vars).is_err());
    }
}
