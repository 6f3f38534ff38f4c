//! Data models for chat messages, presence members and credentials.

pub mod message;
pub mod presence;
pub mod token;

pub use message::*;
pub use presence::*;
pub use token::*;
