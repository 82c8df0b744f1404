//! Common utilities and types shared across vrrpd components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
