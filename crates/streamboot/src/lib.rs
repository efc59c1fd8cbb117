pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod launcher;
pub mod log_sanitize;
pub mod logging;
pub mod marker;
pub mod materialize;
pub mod report;
pub mod secrets;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
pub use launcher::{LaunchOutcome, Launcher, WarmStartPolicy};
