//! Configuration types
//!
//! Board-agnostic timing and limit structures. The daemon embeds them in its
//! TOML configuration; firmware builds use the defaults.

pub mod types;

pub use types::*;
