//! Business logic: credential issuance.

pub mod token;

pub use token::{ApiKey, TokenIssuer};
