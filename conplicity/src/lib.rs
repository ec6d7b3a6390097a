pub mod backup;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod utils;
pub mod volume;

pub use error::{ConplicityError, ErrorKind, Result};
