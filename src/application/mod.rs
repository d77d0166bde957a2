//! Application services built on the query cache.

pub mod backends;
pub mod chat;
pub mod feed;
