//! Type definitions for Tessera configuration

mod resilience_config;

pub use resilience_config::*;
