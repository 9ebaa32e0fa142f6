pub mod config;
pub mod dimensions;
pub mod error;
pub mod flat;
pub mod loader;
pub mod schema;
pub mod source;
pub mod warehouse;

pub use error::{EtlError, Result};
