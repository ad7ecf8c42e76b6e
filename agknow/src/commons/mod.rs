pub mod config;
#[cfg(feature = "indicatif")]
pub mod console;
pub mod error;
pub mod logging;
