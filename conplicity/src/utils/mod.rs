pub mod cli;
pub mod context;
pub mod logging;
