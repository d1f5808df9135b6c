//! Client-side query cache and mutation coordination.
//!
//! This module owns the one piece of shared mutable state in the client:
//! the keyed map from queries to their last known results. Views read
//! through [`QueryClient::read`] and write only through mutations, whose
//! success invalidates the affected resource names.

mod client;
mod key;
mod mutation;

pub use client::{DataSource, QueryClient, QueryResult, QueryStatus, QuerySubscription, ReadOptions};
pub use key::QueryKey;
pub use mutation::{Mutation, MutationState};
