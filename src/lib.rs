pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod shutdown;

pub use error::{BrokerError, Result};
