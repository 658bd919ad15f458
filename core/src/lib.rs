pub mod client;
pub mod config;
pub mod error;

pub use client::SupersetClient;
pub use config::Credentials;
pub use error::{ClientError, ClientResult, ConfigError};
