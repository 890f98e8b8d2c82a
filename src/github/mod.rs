//! GitHub client pool and response cache (spec §4.2).

pub mod cache;
pub mod client;

pub use cache::ResponseCache;
pub use client::GhClientPool;
