//! Cached catalog client: the read/mutate surface views actually use.
//!
//! Wraps the raw [`ApiClient`] with the shared [`QueryClient`] and the
//! auth session. Reads declare a query key and a fetch closure; the cache
//! decides whether the network is touched. Writes come back as configured
//! [`Mutation`]s whose success invalidates every resource name whose
//! listings the write could have changed.
//!
//! Authenticated calls retrieve their token inside the fetch closure,
//! immediately before the request, so an expired token is refreshed by the
//! provider rather than baked into the cache key.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::client::ApiClient;
use super::types::{
  Battlestation, BattlestationDraft, BattlestationPart, BattlestationSummary, FavoriteAction,
  NewId, Paginated, Part, PartAutocomplete, PartDraft, PartType, PendingPart, ResourceCount,
  Store, StoreDraft, UserBattlestationSummary, UserProfile, UserRegistration, UserUpdate,
};
use crate::cache::{Mutation, QueryClient, QueryKey, QueryResult, ReadOptions};
use crate::error::ApiError;
use crate::params::ListQuery;
use crate::session::{AuthSession, Identity, IdentityProvider, RoleLookup, Roles};

/// Resource names: the invalidation unit linking mutations to listings.
pub mod resources {
  pub const PARTS: &str = "parts";
  pub const PART_TYPES: &str = "part_types";
  pub const PENDING_PARTS: &str = "pending_parts";
  pub const BATTLESTATIONS: &str = "battlestations";
  pub const STORES: &str = "stores";
  pub const USER_BATTLESTATIONS: &str = "user_battlestations";
  pub const USER_FAVORITES: &str = "user_favorites";
  pub const USER_PROFILE: &str = "user_profile";
}

/// The taxonomy barely changes; revalidate it daily.
const TAXONOMY_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

pub struct CachedClient<P> {
  api: ApiClient,
  queries: QueryClient,
  session: Arc<AuthSession<P>>,
}

impl<P> Clone for CachedClient<P> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      queries: self.queries.clone(),
      session: Arc::clone(&self.session),
    }
  }
}

/// Role lookup against the user-profile endpoint, for wiring into
/// [`AuthSession::spawn`].
pub fn profile_role_lookup(api: ApiClient) -> RoleLookup {
  Arc::new(move |user: &Identity, token: &str| {
    let api = api.clone();
    let user_id = user.user_id.clone();
    let token = token.to_string();
    Box::pin(async move {
      let profile = api.user_profile(&user_id, &token).await?;
      Ok(Roles {
        is_admin: profile.is_admin,
        is_moderator: profile.is_moderator,
      })
    })
  })
}

fn part_list_key(query: &ListQuery, part_type: Option<&str>) -> QueryKey {
  QueryKey::new(
    resources::PARTS,
    &json!({
      "op": "list",
      "params": query.to_query_pairs(),
      "partType": part_type,
    }),
  )
}

fn battlestation_list_key(query: &ListQuery) -> QueryKey {
  QueryKey::new(
    resources::BATTLESTATIONS,
    &json!({ "op": "list", "params": query.to_query_pairs() }),
  )
}

fn store_list_key(query: &ListQuery) -> QueryKey {
  QueryKey::new(
    resources::STORES,
    &json!({ "op": "list", "params": query.to_query_pairs() }),
  )
}

impl<P: IdentityProvider> CachedClient<P> {
  pub fn new(api: ApiClient, queries: QueryClient, session: Arc<AuthSession<P>>) -> Self {
    Self {
      api,
      queries,
      session,
    }
  }

  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  pub fn session(&self) -> &AuthSession<P> {
    &self.session
  }

  // ==========================================================================
  // Parts: reads
  // ==========================================================================

  pub async fn parts(
    &self,
    query: &ListQuery,
    part_type: Option<&str>,
  ) -> QueryResult<Paginated<Part>> {
    let key = part_list_key(query, part_type);
    let api = self.api.clone();
    let query = query.clone();
    let part_type = part_type.map(String::from);

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.list_parts(&query, part_type.as_deref()).await
      })
      .await
  }

  pub async fn part(&self, id: u32) -> QueryResult<Part> {
    let key = QueryKey::new(resources::PARTS, &json!({ "op": "item", "id": id }));
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.get_part(id).await
      })
      .await
  }

  pub async fn part_types(&self) -> QueryResult<Vec<PartType>> {
    let key = QueryKey::bare(resources::PART_TYPES);
    let api = self.api.clone();

    self
      .queries
      .read(
        &key,
        ReadOptions::stale_after(TAXONOMY_STALE_AFTER),
        move || async move { api.part_types().await },
      )
      .await
  }

  pub async fn part_count(&self) -> QueryResult<ResourceCount> {
    let key = QueryKey::new(resources::PARTS, &json!({ "op": "count" }));
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.part_count().await
      })
      .await
  }

  /// Autocomplete within one part type; parked until the caller has at
  /// least two characters of input.
  pub async fn part_autocomplete(
    &self,
    type_id: u32,
    input_len: usize,
  ) -> QueryResult<Vec<PartAutocomplete>> {
    let key = QueryKey::new(
      resources::PARTS,
      &json!({ "op": "autocomplete", "type": type_id }),
    );
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::enabled(input_len >= 2), move || async move {
        api.part_autocomplete(type_id).await
      })
      .await
  }

  pub async fn part_battlestations(
    &self,
    part_id: u32,
    page_number: u32,
  ) -> QueryResult<Paginated<BattlestationSummary>> {
    let key = QueryKey::new(
      resources::BATTLESTATIONS,
      &json!({ "op": "by_part", "part": part_id, "page": page_number }),
    );
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.part_battlestations(part_id, page_number).await
      })
      .await
  }

  /// Moderation queue; parked until the session is authenticated.
  pub async fn pending_parts(&self) -> QueryResult<Vec<PendingPart>> {
    let key = QueryKey::bare(resources::PENDING_PARTS);
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    let options = ReadOptions::enabled(self.session.is_authenticated());

    self
      .queries
      .read(&key, options, move || async move {
        let token = session.id_token().await?;
        api.pending_parts(&token).await
      })
      .await
  }

  // ==========================================================================
  // Battlestations: reads
  // ==========================================================================

  pub async fn battlestations(
    &self,
    query: &ListQuery,
  ) -> QueryResult<Paginated<BattlestationSummary>> {
    let key = battlestation_list_key(query);
    let api = self.api.clone();
    let query = query.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.list_battlestations(&query).await
      })
      .await
  }

  /// Single battlestation. Parked until the session has resolved, so the
  /// authenticated variant (with the caller's favorite flag) is fetched
  /// exactly once rather than racing the anonymous one.
  pub async fn battlestation(&self, id: u32) -> QueryResult<Battlestation> {
    let state = self.session.current();
    let authed = state.is_authenticated();
    let key = QueryKey::new(
      resources::BATTLESTATIONS,
      &json!({ "op": "item", "id": id, "authed": authed }),
    );
    let options = ReadOptions::enabled(!state.is_initializing());
    let api = self.api.clone();
    let session = Arc::clone(&self.session);

    self
      .queries
      .read(&key, options, move || async move {
        let token = if authed {
          Some(session.id_token().await?)
        } else {
          None
        };
        api.get_battlestation(id, token.as_deref()).await
      })
      .await
  }

  pub async fn featured_battlestations(&self) -> QueryResult<Vec<BattlestationSummary>> {
    let key = QueryKey::new(resources::BATTLESTATIONS, &json!({ "op": "featured" }));
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.featured_battlestations().await
      })
      .await
  }

  pub async fn battlestation_parts(&self, id: u32) -> QueryResult<Vec<BattlestationPart>> {
    let key = QueryKey::new(
      resources::BATTLESTATIONS,
      &json!({ "op": "parts", "id": id }),
    );
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.battlestation_parts(id).await
      })
      .await
  }

  // ==========================================================================
  // Stores: reads
  // ==========================================================================

  pub async fn stores(&self, query: &ListQuery) -> QueryResult<Vec<Store>> {
    let key = store_list_key(query);
    let api = self.api.clone();
    let query = query.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.list_stores(&query).await
      })
      .await
  }

  pub async fn store_count(&self) -> QueryResult<ResourceCount> {
    let key = QueryKey::new(resources::STORES, &json!({ "op": "count" }));
    let api = self.api.clone();

    self
      .queries
      .read(&key, ReadOptions::default(), move || async move {
        api.store_count().await
      })
      .await
  }

  // ==========================================================================
  // User: reads
  // ==========================================================================

  pub async fn my_profile(&self) -> QueryResult<UserProfile> {
    let user_id = self.session.current().user().map(|u| u.user_id.clone());
    let key = QueryKey::new(resources::USER_PROFILE, &json!({ "user": &user_id }));
    let options = ReadOptions::enabled(user_id.is_some());
    let api = self.api.clone();
    let session = Arc::clone(&self.session);

    self
      .queries
      .read(&key, options, move || async move {
        let user_id = user_id.ok_or_else(|| ApiError::Auth("not signed in".to_string()))?;
        let token = session.id_token().await?;
        api.user_profile(&user_id, &token).await
      })
      .await
  }

  pub async fn my_battlestations(&self) -> QueryResult<Paginated<UserBattlestationSummary>> {
    let user_id = self.session.current().user().map(|u| u.user_id.clone());
    let key = QueryKey::new(resources::USER_BATTLESTATIONS, &json!({ "user": &user_id }));
    let options = ReadOptions::enabled(user_id.is_some());
    let api = self.api.clone();
    let session = Arc::clone(&self.session);

    self
      .queries
      .read(&key, options, move || async move {
        let user_id = user_id.ok_or_else(|| ApiError::Auth("not signed in".to_string()))?;
        let token = session.id_token().await?;
        api.user_battlestations(&user_id, &token).await
      })
      .await
  }

  pub async fn my_favorites(&self) -> QueryResult<Paginated<BattlestationSummary>> {
    let user_id = self.session.current().user().map(|u| u.user_id.clone());
    let key = QueryKey::new(resources::USER_FAVORITES, &json!({ "user": &user_id }));
    let options = ReadOptions::enabled(user_id.is_some());
    let api = self.api.clone();
    let session = Arc::clone(&self.session);

    self
      .queries
      .read(&key, options, move || async move {
        let user_id = user_id.ok_or_else(|| ApiError::Auth("not signed in".to_string()))?;
        let token = session.id_token().await?;
        api.user_favorites(&user_id, &token).await
      })
      .await
  }

  // ==========================================================================
  // Parts: mutations
  // ==========================================================================

  pub fn create_part(&self) -> Mutation<PartDraft, NewId> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |draft: PartDraft| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.create_part(&draft, &token).await
      }
    })
    .invalidates(resources::PARTS)
  }

  pub fn update_part(&self) -> Mutation<(u32, PartDraft), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |(id, draft): (u32, PartDraft)| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.update_part(id, &draft, &token).await
      }
    })
    .invalidates(resources::PARTS)
  }

  pub fn delete_part(&self) -> Mutation<u32, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |id: u32| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.delete_part(id, &token).await
      }
    })
    .invalidates(resources::PARTS)
  }

  /// Community part submission; lands in the moderation queue, not the
  /// public listing.
  pub fn submit_part_request(&self) -> Mutation<PartDraft, NewId> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |draft: PartDraft| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.submit_part_request(&draft, &token).await
      }
    })
    .invalidates(resources::PENDING_PARTS)
  }

  /// Approving a pending part publishes it, so the public listing is
  /// invalidated along with the queue.
  pub fn update_pending_part(&self) -> Mutation<(u32, String), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |(id, status): (u32, String)| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.update_pending_part(id, &status, &token).await
      }
    })
    .invalidates(resources::PENDING_PARTS)
    .invalidates(resources::PARTS)
  }

  pub fn delete_pending_part(&self) -> Mutation<u32, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |id: u32| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.delete_pending_part(id, &token).await
      }
    })
    .invalidates(resources::PENDING_PARTS)
  }

  // ==========================================================================
  // Battlestations: mutations
  // ==========================================================================

  pub fn create_battlestation(&self) -> Mutation<BattlestationDraft, NewId> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |draft: BattlestationDraft| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.create_battlestation(&draft, &token).await
      }
    })
    .invalidates(resources::BATTLESTATIONS)
    .invalidates(resources::USER_BATTLESTATIONS)
  }

  pub fn update_battlestation(&self) -> Mutation<(u32, BattlestationDraft), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(
      self.queries.clone(),
      move |(id, draft): (u32, BattlestationDraft)| {
        let api = api.clone();
        let session = Arc::clone(&session);
        async move {
          let token = session.id_token().await?;
          api.update_battlestation(id, &draft, &token).await
        }
      },
    )
    .invalidates(resources::BATTLESTATIONS)
    .invalidates(resources::USER_BATTLESTATIONS)
  }

  /// Deleting covers the single-item key too: item keys share the
  /// `battlestations` resource name, so the prefix invalidation reaches
  /// them.
  pub fn delete_battlestation(&self) -> Mutation<u32, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |id: u32| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.delete_battlestation(id, &token).await
      }
    })
    .invalidates(resources::BATTLESTATIONS)
    .invalidates(resources::USER_BATTLESTATIONS)
  }

  pub fn favorite_battlestation(&self) -> Mutation<(u32, FavoriteAction), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(
      self.queries.clone(),
      move |(id, action): (u32, FavoriteAction)| {
        let api = api.clone();
        let session = Arc::clone(&session);
        async move {
          let token = session.id_token().await?;
          api.favorite_battlestation(id, action, &token).await
        }
      },
    )
    .invalidates(resources::BATTLESTATIONS)
    .invalidates(resources::USER_FAVORITES)
  }

  // ==========================================================================
  // Stores: mutations
  // ==========================================================================

  pub fn create_store(&self) -> Mutation<StoreDraft, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |draft: StoreDraft| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.create_store(&draft, &token).await
      }
    })
    .invalidates(resources::STORES)
  }

  pub fn update_store(&self) -> Mutation<(u32, StoreDraft), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |(id, draft): (u32, StoreDraft)| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.update_store(id, &draft, &token).await
      }
    })
    .invalidates(resources::STORES)
  }

  pub fn delete_store(&self) -> Mutation<u32, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |id: u32| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let token = session.id_token().await?;
        api.delete_store(id, &token).await
      }
    })
    .invalidates(resources::STORES)
  }

  // ==========================================================================
  // User: mutations
  // ==========================================================================

  /// Registration happens before a session exists, so it carries no token
  /// and invalidates nothing.
  pub fn register_user(&self) -> Mutation<UserRegistration, ()> {
    let api = self.api.clone();
    Mutation::new(self.queries.clone(), move |registration: UserRegistration| {
      let api = api.clone();
      async move { api.register_user(&registration).await }
    })
  }

  pub fn update_profile(&self) -> Mutation<UserUpdate, ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |update: UserUpdate| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let user = session
          .current()
          .user()
          .cloned()
          .ok_or_else(|| ApiError::Auth("not signed in".to_string()))?;
        let token = session.id_token().await?;
        api.update_user(&user.user_id, &update, &token).await
      }
    })
    .invalidates(resources::USER_PROFILE)
  }

  /// Backend account deletion; the identity-provider account is removed
  /// separately through the session.
  pub fn delete_account(&self) -> Mutation<(), ()> {
    let api = self.api.clone();
    let session = Arc::clone(&self.session);
    Mutation::new(self.queries.clone(), move |_: ()| {
      let api = api.clone();
      let session = Arc::clone(&session);
      async move {
        let user = session
          .current()
          .user()
          .cloned()
          .ok_or_else(|| ApiError::Auth("not signed in".to_string()))?;
        let token = session.id_token().await?;
        api.delete_user(&user.user_id, &token).await
      }
    })
    .invalidates(resources::USER_PROFILE)
    .invalidates(resources::USER_BATTLESTATIONS)
    .invalidates(resources::USER_FAVORITES)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::params;

  #[test]
  fn test_list_keys_are_stable_per_parameter_set() {
    let query = params::PARTS.default_query();
    assert_eq!(
      part_list_key(&query, Some("keyboards")),
      part_list_key(&query, Some("keyboards"))
    );
    assert_ne!(
      part_list_key(&query, Some("keyboards")),
      part_list_key(&query, Some("monitors"))
    );
    assert_ne!(
      part_list_key(&query, None),
      part_list_key(&query.clone().with_page(2), None)
    );
  }

  #[test]
  fn test_list_and_item_keys_share_the_resource_name() {
    // Prefix invalidation of "parts" must reach listings, counts and
    // single items alike.
    let list = part_list_key(&params::PARTS.default_query(), None);
    let item = QueryKey::new(resources::PARTS, &json!({ "op": "item", "id": 4 }));
    let count = QueryKey::new(resources::PARTS, &json!({ "op": "count" }));

    assert_eq!(list.resource(), resources::PARTS);
    assert_eq!(item.resource(), resources::PARTS);
    assert_eq!(count.resource(), resources::PARTS);
    assert_ne!(list, item);
    assert_ne!(item, count);
  }

  #[test]
  fn test_store_and_battlestation_list_keys_differ() {
    let query = params::STORES.default_query();
    assert_ne!(store_list_key(&query), battlestation_list_key(&query));
  }
}
