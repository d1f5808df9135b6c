//! REST client for the catalog backend.
//!
//! Thin typed wrappers over the HTTP surface: one method per endpoint,
//! bearer token attached where the backend requires it, multipart bodies
//! on the upload endpoints, JSON everywhere else. No caching happens here;
//! that is [`CachedClient`](super::cached::CachedClient)'s job.

use reqwest::multipart;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::types::{
  Battlestation, BattlestationDraft, BattlestationListResponse, BattlestationPart,
  BattlestationSummary, FavoriteAction, NewId, Paginated, Part, PartAutocomplete, PartDraft,
  PartListResponse, PartType, PendingPart, ResourceCount, Store, StoreDraft,
  UserBattlestationListResponse, UserBattlestationSummary, UserProfile, UserRegistration,
  UserUpdate,
};
use crate::error::ApiError;
use crate::params::ListQuery;

/// Failure responses carry their message in a JSON body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
  message: String,
}

#[derive(Clone)]
pub struct ApiClient {
  http: Client,
  base: String,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Self {
    Self {
      http: Client::new(),
      base: base_url.trim_end_matches('/').to_string(),
    }
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }

  fn bearer(request: RequestBuilder, token: &str) -> RequestBuilder {
    request.header("Authorization", format!("Bearer {token}"))
  }

  /// Send, map the status onto the error taxonomy, decode the body.
  async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await?;
    let response = Self::check(response).await?;
    Ok(response.json::<T>().await?)
  }

  /// Send and discard the body; for writes whose response carries nothing.
  async fn unit(&self, request: RequestBuilder) -> Result<(), ApiError> {
    let response = request.send().await?;
    Self::check(response).await?;
    Ok(())
  }

  async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    // Pass the server's message through verbatim when there is one.
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
      .map(|e| e.message)
      .unwrap_or(body);
    Err(ApiError::from_status(status, message))
  }

  // ==========================================================================
  // Parts
  // ==========================================================================

  pub async fn list_parts(
    &self,
    query: &ListQuery,
    part_type: Option<&str>,
  ) -> Result<Paginated<Part>, ApiError> {
    let mut pairs = query.to_query_pairs();
    if let Some(part_type) = part_type {
      pairs.push(("partType", part_type.to_string()));
    }

    let response: PartListResponse = self
      .json(self.http.get(self.endpoint("/parts")).query(&pairs))
      .await?;
    Ok(response.into())
  }

  pub async fn get_part(&self, id: u32) -> Result<Part, ApiError> {
    self
      .json(self.http.get(self.endpoint(&format!("/parts/id/{id}"))))
      .await
  }

  pub async fn part_types(&self) -> Result<Vec<PartType>, ApiError> {
    self.json(self.http.get(self.endpoint("/parts/types"))).await
  }

  pub async fn part_count(&self) -> Result<ResourceCount, ApiError> {
    self.json(self.http.get(self.endpoint("/parts/count"))).await
  }

  pub async fn part_autocomplete(&self, type_id: u32) -> Result<Vec<PartAutocomplete>, ApiError> {
    self
      .json(
        self
          .http
          .get(self.endpoint("/parts/autocomplete"))
          .query(&[("partType", type_id.to_string())]),
      )
      .await
  }

  /// Battlestations featuring a part, paginated by page number only.
  pub async fn part_battlestations(
    &self,
    part_id: u32,
    page_number: u32,
  ) -> Result<Paginated<BattlestationSummary>, ApiError> {
    let response: BattlestationListResponse = self
      .json(
        self
          .http
          .get(self.endpoint(&format!("/parts/id/{part_id}/battlestations")))
          .query(&[("page_number", page_number.to_string())]),
      )
      .await?;
    Ok(response.into())
  }

  pub async fn pending_parts(&self, token: &str) -> Result<Vec<PendingPart>, ApiError> {
    self
      .json(Self::bearer(
        self.http.get(self.endpoint("/parts/pending")),
        token,
      ))
      .await
  }

  /// Community submission; lands in the pending queue.
  pub async fn submit_part_request(
    &self,
    draft: &PartDraft,
    token: &str,
  ) -> Result<NewId, ApiError> {
    let form = part_form(draft)?;
    self
      .json(Self::bearer(
        self.http.post(self.endpoint("/parts/request")).multipart(form),
        token,
      ))
      .await
  }

  pub async fn create_part(&self, draft: &PartDraft, token: &str) -> Result<NewId, ApiError> {
    let form = part_form(draft)?;
    self
      .json(Self::bearer(
        self.http.post(self.endpoint("/parts/")).multipart(form),
        token,
      ))
      .await
  }

  pub async fn update_part(&self, id: u32, draft: &PartDraft, token: &str) -> Result<(), ApiError> {
    let form = part_form(draft)?;
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/parts/{id}")))
          .multipart(form),
        token,
      ))
      .await
  }

  pub async fn delete_part(&self, id: u32, token: &str) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self.http.delete(self.endpoint(&format!("/parts/{id}"))),
        token,
      ))
      .await
  }

  pub async fn update_pending_part(
    &self,
    id: u32,
    status: &str,
    token: &str,
  ) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/parts/pending/{id}")))
          .json(&json!({ "status": status })),
        token,
      ))
      .await
  }

  pub async fn delete_pending_part(&self, id: u32, token: &str) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self.http.delete(self.endpoint(&format!("/parts/pending/{id}"))),
        token,
      ))
      .await
  }

  // ==========================================================================
  // Battlestations
  // ==========================================================================

  pub async fn list_battlestations(
    &self,
    query: &ListQuery,
  ) -> Result<Paginated<BattlestationSummary>, ApiError> {
    let response: BattlestationListResponse = self
      .json(
        self
          .http
          .get(self.endpoint("/battlestations"))
          .query(&query.to_query_pairs()),
      )
      .await?;
    Ok(response.into())
  }

  /// Single battlestation. With a token the response carries the caller's
  /// favorite flag; without one `is_favorited` is always zero.
  pub async fn get_battlestation(
    &self,
    id: u32,
    token: Option<&str>,
  ) -> Result<Battlestation, ApiError> {
    let mut request = self
      .http
      .get(self.endpoint(&format!("/battlestations/id/{id}")));
    if let Some(token) = token {
      request = Self::bearer(request, token);
    }
    self.json(request).await
  }

  pub async fn featured_battlestations(&self) -> Result<Vec<BattlestationSummary>, ApiError> {
    self
      .json(self.http.get(self.endpoint("/battlestations/featured")))
      .await
  }

  pub async fn battlestation_parts(&self, id: u32) -> Result<Vec<BattlestationPart>, ApiError> {
    self
      .json(
        self
          .http
          .get(self.endpoint(&format!("/battlestations/id/{id}/parts"))),
      )
      .await
  }

  pub async fn create_battlestation(
    &self,
    draft: &BattlestationDraft,
    token: &str,
  ) -> Result<NewId, ApiError> {
    let form = battlestation_form(draft)?;
    self
      .json(Self::bearer(
        self
          .http
          .post(self.endpoint("/battlestations/"))
          .multipart(form),
        token,
      ))
      .await
  }

  pub async fn update_battlestation(
    &self,
    id: u32,
    draft: &BattlestationDraft,
    token: &str,
  ) -> Result<(), ApiError> {
    let form = battlestation_form(draft)?;
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/battlestations/id/{id}")))
          .multipart(form),
        token,
      ))
      .await
  }

  pub async fn delete_battlestation(&self, id: u32, token: &str) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self
          .http
          .delete(self.endpoint(&format!("/battlestations/id/{id}"))),
        token,
      ))
      .await
  }

  pub async fn favorite_battlestation(
    &self,
    id: u32,
    action: FavoriteAction,
    token: &str,
  ) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/battlestations/favorites/{id}")))
          .json(&json!({ "action": action.as_str() })),
        token,
      ))
      .await
  }

  // ==========================================================================
  // Stores
  // ==========================================================================

  pub async fn list_stores(&self, query: &ListQuery) -> Result<Vec<Store>, ApiError> {
    self
      .json(
        self
          .http
          .get(self.endpoint("/stores"))
          .query(&query.to_query_pairs()),
      )
      .await
  }

  pub async fn store_count(&self) -> Result<ResourceCount, ApiError> {
    self.json(self.http.get(self.endpoint("/stores/count"))).await
  }

  pub async fn create_store(&self, draft: &StoreDraft, token: &str) -> Result<(), ApiError> {
    let form = store_form(draft);
    self
      .unit(Self::bearer(
        self.http.post(self.endpoint("/stores")).multipart(form),
        token,
      ))
      .await
  }

  pub async fn update_store(
    &self,
    id: u32,
    draft: &StoreDraft,
    token: &str,
  ) -> Result<(), ApiError> {
    let form = store_form(draft);
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/stores/{id}")))
          .multipart(form),
        token,
      ))
      .await
  }

  pub async fn delete_store(&self, id: u32, token: &str) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self.http.delete(self.endpoint(&format!("/stores/{id}"))),
        token,
      ))
      .await
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  pub async fn register_user(&self, registration: &UserRegistration) -> Result<(), ApiError> {
    self
      .unit(self.http.post(self.endpoint("/users/")).json(registration))
      .await
  }

  pub async fn user_profile(&self, id: &str, token: &str) -> Result<UserProfile, ApiError> {
    self
      .json(Self::bearer(
        self.http.get(self.endpoint(&format!("/users/{id}"))),
        token,
      ))
      .await
  }

  pub async fn update_user(
    &self,
    id: &str,
    update: &UserUpdate,
    token: &str,
  ) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self
          .http
          .put(self.endpoint(&format!("/users/{id}")))
          .json(update),
        token,
      ))
      .await
  }

  pub async fn delete_user(&self, id: &str, token: &str) -> Result<(), ApiError> {
    self
      .unit(Self::bearer(
        self.http.delete(self.endpoint(&format!("/users/{id}"))),
        token,
      ))
      .await
  }

  pub async fn user_battlestations(
    &self,
    id: &str,
    token: &str,
  ) -> Result<Paginated<UserBattlestationSummary>, ApiError> {
    let response: UserBattlestationListResponse = self
      .json(Self::bearer(
        self
          .http
          .get(self.endpoint(&format!("/users/{id}/battlestations"))),
        token,
      ))
      .await?;
    Ok(response.into())
  }

  pub async fn user_favorites(
    &self,
    id: &str,
    token: &str,
  ) -> Result<Paginated<BattlestationSummary>, ApiError> {
    let response: BattlestationListResponse = self
      .json(Self::bearer(
        self.http.get(self.endpoint(&format!("/users/{id}/favorites"))),
        token,
      ))
      .await?;
    Ok(response.into())
  }
}

/// Multipart body for a part submission. Store links travel as a JSON
/// field next to the file part.
fn part_form(draft: &PartDraft) -> Result<multipart::Form, ApiError> {
  let mut form = multipart::Form::new()
    .text("name", draft.name.clone())
    .text("manufacturer", draft.manufacturer.clone())
    .text("type_id", draft.type_id.to_string())
    .text("stores", serde_json::to_string(&draft.store_links)?);

  if let Some(url) = &draft.manufacturer_url {
    form = form.text("manufacturer_url", url.clone());
  }
  if let Some(image) = &draft.image {
    form = form.part(
      "image",
      multipart::Part::bytes(image.bytes.clone()).file_name(image.file_name.clone()),
    );
  }

  Ok(form)
}

fn battlestation_form(draft: &BattlestationDraft) -> Result<multipart::Form, ApiError> {
  let mut form = multipart::Form::new()
    .text("name", draft.name.clone())
    .text("instagram_url", draft.instagram_url.clone())
    .text("parts", serde_json::to_string(&draft.part_ids)?);

  if let Some(url) = &draft.reddit_url {
    form = form.text("reddit_url", url.clone());
  }
  if let Some(description) = &draft.description {
    form = form.text("description", description.clone());
  }
  for image in &draft.images {
    form = form.part(
      "images",
      multipart::Part::bytes(image.bytes.clone()).file_name(image.file_name.clone()),
    );
  }

  Ok(form)
}

fn store_form(draft: &StoreDraft) -> multipart::Form {
  multipart::Form::new()
    .text("name", draft.name.clone())
    .text("url", draft.url.clone())
}
