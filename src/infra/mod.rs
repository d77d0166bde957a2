//! Runtime bootstrap and infrastructure adapters.

pub mod error;
pub mod memory;
pub mod telemetry;
