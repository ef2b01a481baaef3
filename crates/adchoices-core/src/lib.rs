//! AdChoices Core - Types, wire protocol, codec, configuration and error handling

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::AdChoicesConfig;
pub use error::{Error, Result};
pub use protocol::*;
pub use types::*;
