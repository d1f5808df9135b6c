//! Typed access to the catalog backend: the raw REST client, the domain
//! types it speaks, and the cached client built on top of them.

mod cached;
mod client;
pub mod types;

pub use cached::{profile_role_lookup, resources, CachedClient};
pub use client::ApiClient;
