//! Client core for the BattlestationDB catalog.
//!
//! The interesting part of this crate is the cache-coherence layer in
//! [`cache`]: a keyed query cache with request deduplication,
//! stale-while-revalidate freshness, resource-name invalidation and
//! generation-counter cancellation safety, plus the mutation coordinator
//! that keeps listings consistent with writes. Around it sit the typed
//! REST client ([`api`]), the query-parameter synchronizer ([`params`])
//! that makes every listing addressable, and the auth session ([`session`])
//! wrapping the external identity provider.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod params;
pub mod session;
