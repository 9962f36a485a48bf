//! The `utils` module collects the pieces shared by every other module:
//! the crate error types and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Error, Result};
