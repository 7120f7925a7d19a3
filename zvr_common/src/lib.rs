mod helpers;
mod rupiah;

pub mod op;
mod secret;

pub use helpers::parse_boolean_flag;
pub use rupiah::{Rupiah, RupiahConversionError, CURRENCY_CODE};
pub use secret::Secret;
