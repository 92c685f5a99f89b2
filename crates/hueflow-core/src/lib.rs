/*!
 * HueFlow Core
 *
 * This crate provides the shared foundation for the HueFlow bridge:
 * configuration loading, logging setup, the core error type and a few
 * async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

/// HueFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
