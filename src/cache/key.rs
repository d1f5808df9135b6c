//! Query keys: the composite identity addressing a cached result set.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of a cached query: a resource name plus a digest of the
/// parameter object.
///
/// Two keys are equal iff the resource names match and the parameter
/// objects are structurally equal. Structural equality is obtained by
/// serializing the parameters through `serde_json::Value`, whose object
/// maps are ordered, so field order in the source type never matters.
/// Invalidation matches on the resource name alone, parameters ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  resource: String,
  params_hash: String,
}

impl QueryKey {
  /// Key for a parameterized query (a filtered listing, a single item by id).
  pub fn new<P: Serialize>(resource: &str, params: &P) -> Self {
    // Parameter types are plain data structs; a value that cannot pass
    // through serde_json degrades to the unparameterized form.
    let canonical = serde_json::to_value(params)
      .map(|v| v.to_string())
      .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();

    Self {
      resource: resource.to_string(),
      params_hash: hex::encode(digest),
    }
  }

  /// Key for a query with no parameters (a taxonomy list, a count).
  pub fn bare(resource: &str) -> Self {
    Self::new(resource, &())
  }

  /// The resource name this key belongs to; the unit of invalidation.
  pub fn resource(&self) -> &str {
    &self.resource
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.resource, &self.params_hash[..8])
  }
}
