//! Chat domain: data model, per-component version arbitration, the two-tier
//! cache, and the repository that is the only path mutating chat state.
//!
//! Handlers call [`ChatRepository`]; the repository consults the version
//! arbiter, keeps the hot/warm cache tiers coherent with the document store,
//! and serializes writes per chat.

pub mod arbiter;
pub mod cache;
pub mod delta;
pub mod error;
pub mod model;
pub mod repository;

pub use {
    arbiter::VersionCheck,
    cache::ChatCache,
    error::{ChatError, Result},
    model::{Chat, Message},
    repository::ChatRepository,
};
