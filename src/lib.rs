//! Reactive query cache with deduplicated fetches, paginated accumulation
//! and optimistic mutations.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
