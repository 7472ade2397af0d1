//! Wire codecs shared by every ocrloop sub-service
//!
//! Values that cross the process boundary are converted here with explicit
//! bounds checks. Nothing is truncated or padded silently.

pub mod bigint;
pub mod bytes;
pub mod digest;
pub mod error;
pub mod onchain;
pub mod range;

pub use bigint::{deserialize_signed, serialize_signed, WireBigInt};
pub use digest::{ConfigDigest, CONFIG_DIGEST_LENGTH};
pub use error::ValidationError;
pub use num_bigint::BigInt;
pub use onchain::{OnchainConfig, StandardOnchainConfigCodec, ONCHAIN_CONFIG_LENGTH, ONCHAIN_CONFIG_VERSION};
pub use range::checked_u8;
