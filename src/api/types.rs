//! Domain types for the catalog backend, plus the wire envelopes its list
//! endpoints wrap them in.
//!
//! The backend speaks snake_case JSON that maps straight onto these
//! structs; the few exceptions carry serde renames. Every type derives
//! both serde directions because cached values round-trip through
//! `serde_json::Value`.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Parts
// ============================================================================

/// One entry of the part-type taxonomy (the sidebar categories).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartType {
  pub type_id: u32,
  pub type_name: String,
  pub type_path: String,
  pub display_order: u32,
}

/// A store carrying a part, as embedded in the part payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreLink {
  pub store_id: u32,
  pub store_name: String,
  pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
  pub part_id: u32,
  pub name: String,
  pub manufacturer: String,
  pub manufacturer_url: Option<String>,
  pub type_id: u32,
  #[serde(rename = "type")]
  pub part_type: String,
  pub image: String,
  pub stores: Vec<StoreLink>,
  pub battlestation_count: u32,
}

/// Slim part shape returned by the autocomplete endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartAutocomplete {
  pub part_id: u32,
  pub name: String,
  pub image: String,
  pub type_id: u32,
  pub type_name: String,
}

/// A community-submitted part awaiting moderation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPart {
  pub part_id: u32,
  pub name: String,
  pub url: String,
  pub status: String,
}

// ============================================================================
// Battlestations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattlestationSummary {
  pub battlestation_id: u32,
  pub name: String,
  pub image_count: u32,
  pub part_count: u32,
  pub thumbnail: String,
  pub username: String,
  pub created_date: String,
  pub favorites: u32,
}

/// A part as embedded in a battlestation's part list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattlestationPart {
  pub part_id: u32,
  pub name: String,
  pub image: String,
  pub type_id: u32,
  pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battlestation {
  pub user_id: String,
  pub battlestation_id: u32,
  pub name: String,
  pub instagram_url: String,
  pub reddit_url: Option<String>,
  pub images: Vec<String>,
  pub parts: Vec<BattlestationPart>,
  pub description: Option<String>,
  pub username: String,
  pub created_date: String,
  pub favorites: u32,
  /// 1 when the requesting user has favorited this station; only
  /// meaningful on authenticated reads.
  pub is_favorited: u32,
}

impl Battlestation {
  pub fn is_favorited(&self) -> bool {
    self.is_favorited != 0
  }
}

/// Summary shape of the owner's own listing, which includes visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBattlestationSummary {
  pub name: String,
  pub battlestation_id: u32,
  pub created_date: String,
  pub image_count: u32,
  pub part_count: u32,
  pub thumbnail: String,
  pub is_public: u32,
  pub favorites: u32,
}

// ============================================================================
// Stores and users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
  pub store_id: u32,
  pub name: String,
  pub url: String,
  pub part_count: u32,
}

/// Fields of a store create/update submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDraft {
  pub name: String,
  pub url: String,
}

/// Registration payload for a fresh account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegistration {
  pub user_id: String,
  pub username: String,
  pub email: String,
}

/// Editable profile fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
  pub username: String,
  pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub user_id: String,
  pub username: String,
  pub email: String,
  pub is_admin: bool,
  pub is_moderator: bool,
}

// ============================================================================
// Upload drafts
// ============================================================================

/// An image file attached to a submission. Encoding beyond filename+bytes
/// is the transport's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
  pub file_name: String,
  pub bytes: Vec<u8>,
}

/// Fields of a part create/update submission (admin) or a community
/// part request.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDraft {
  pub name: String,
  pub manufacturer: String,
  pub manufacturer_url: Option<String>,
  pub type_id: u32,
  pub store_links: Vec<StoreLink>,
  pub image: Option<ImageUpload>,
}

/// Fields of a battlestation create/update submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BattlestationDraft {
  pub name: String,
  pub instagram_url: String,
  pub reddit_url: Option<String>,
  pub description: Option<String>,
  pub part_ids: Vec<u32>,
  pub images: Vec<ImageUpload>,
}

/// Direction of a favorites toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteAction {
  Add,
  Remove,
}

impl FavoriteAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      FavoriteAction::Add => "add",
      FavoriteAction::Remove => "remove",
    }
  }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Id assigned by the backend to a created entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewId {
  #[serde(rename = "newId")]
  pub new_id: u32,
}

/// Count endpoints return the total as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCount {
  pub total: String,
}

impl ResourceCount {
  pub fn value(&self) -> u64 {
    self.total.parse().unwrap_or(0)
  }
}

/// One page of a listing, in the shape the parameter synchronizer expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
  pub total: u64,
  pub items: Vec<T>,
}

impl<T> Paginated<T> {
  /// Number of pages at the given page size. Never zero, so an empty
  /// result still has a page 1.
  pub fn page_count(&self, results_per_page: u32) -> u32 {
    let per_page = u64::from(results_per_page.max(1));
    (self.total.div_ceil(per_page)).max(1) as u32
  }
}

// List endpoints name their item array after the resource; these wire
// shapes exist only to strip that off.

#[derive(Debug, Deserialize)]
pub(crate) struct PartListResponse {
  pub total: u64,
  pub parts: Vec<Part>,
}

impl From<PartListResponse> for Paginated<Part> {
  fn from(response: PartListResponse) -> Self {
    Paginated {
      total: response.total,
      items: response.parts,
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BattlestationListResponse {
  pub total: u64,
  pub battlestations: Vec<BattlestationSummary>,
}

impl From<BattlestationListResponse> for Paginated<BattlestationSummary> {
  fn from(response: BattlestationListResponse) -> Self {
    Paginated {
      total: response.total,
      items: response.battlestations,
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserBattlestationListResponse {
  pub total: u64,
  pub battlestations: Vec<UserBattlestationSummary>,
}

impl From<UserBattlestationListResponse> for Paginated<UserBattlestationSummary> {
  fn from(response: UserBattlestationListResponse) -> Self {
    Paginated {
      total: response.total,
      items: response.battlestations,
    }
  }
}

// ============================================================================
// Dates
// ============================================================================

/// Backend datetimes come as naive "YYYY-MM-DD HH:MM:SS" strings pinned to
/// the catalog's home offset of UTC-7.
pub fn parse_created_date(raw: &str) -> Option<DateTime<FixedOffset>> {
  let offset = FixedOffset::west_opt(7 * 3600)?;
  NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
    .ok()
    .and_then(|naive| naive.and_local_timezone(offset).single())
}

/// "MM.DD.YYYY" display form; the raw string when it does not parse.
pub fn format_date(raw: &str) -> String {
  match parse_created_date(raw) {
    Some(date) => date.format("%m.%d.%Y").to_string(),
    None => raw.to_string(),
  }
}

/// Relative display form ("3 hours ago") for listing rows.
pub fn time_ago(raw: &str) -> String {
  time_ago_at(raw, Utc::now())
}

fn time_ago_at(raw: &str, now: DateTime<Utc>) -> String {
  let Some(date) = parse_created_date(raw) else {
    return raw.to_string();
  };

  let seconds = (now - date.with_timezone(&Utc)).num_seconds().max(0);
  let minutes = (seconds + 30) / 60;
  let hours = (minutes + 30) / 60;

  if seconds < 60 {
    return "Just now".to_string();
  }
  if minutes < 60 {
    return format!("{minutes} minutes ago");
  }
  if hours < 24 {
    return format!("{hours} hours ago");
  }

  let yesterday = (now.with_timezone(&date.timezone()) - chrono::Duration::days(1)).date_naive();
  if date.date_naive() == yesterday {
    return "Yesterday".to_string();
  }

  let days = (hours + 12) / 24;
  if days == 1 {
    "1 day ago".to_string()
  } else {
    format!("{days} days ago")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_part_wire_shape() {
    let json = r#"{
      "part_id": 12,
      "name": "Heavy Base Stand",
      "manufacturer": "Deskworks",
      "manufacturer_url": null,
      "type_id": 3,
      "type": "Monitor Arms",
      "image": "parts/12.webp",
      "stores": [{"store_id": 1, "store_name": "Keeb Supply", "url": "https://keeb.example/12"}],
      "battlestation_count": 4
    }"#;

    let part: Part = serde_json::from_str(json).unwrap();
    assert_eq!(part.part_type, "Monitor Arms");
    assert!(part.manufacturer_url.is_none());
    assert_eq!(part.stores[0].store_name, "Keeb Supply");

    // The rename survives the round trip the cache performs.
    let value = serde_json::to_value(&part).unwrap();
    assert!(value.get("type").is_some());
    assert_eq!(serde_json::from_value::<Part>(value).unwrap(), part);
  }

  #[test]
  fn test_list_envelope_strips_resource_field() {
    let json = r#"{"total": 2, "parts": []}"#;
    let response: PartListResponse = serde_json::from_str(json).unwrap();
    let page: Paginated<Part> = response.into();
    assert_eq!(page.total, 2);
    assert!(page.items.is_empty());
  }

  #[test]
  fn test_new_id_rename() {
    let id: NewId = serde_json::from_str(r#"{"newId": 88}"#).unwrap();
    assert_eq!(id.new_id, 88);
  }

  #[test]
  fn test_count_is_stringly() {
    let count: ResourceCount = serde_json::from_str(r#"{"total": "431"}"#).unwrap();
    assert_eq!(count.value(), 431);
  }

  #[test]
  fn test_page_count() {
    let page = Paginated::<u32> {
      total: 25,
      items: vec![],
    };
    assert_eq!(page.page_count(10), 3);
    assert_eq!(page.page_count(25), 1);

    let empty = Paginated::<u32> {
      total: 0,
      items: vec![],
    };
    assert_eq!(empty.page_count(10), 1);
  }

  #[test]
  fn test_format_date() {
    assert_eq!(format_date("2023-04-09 18:30:00"), "04.09.2023");
    assert_eq!(format_date("not a date"), "not a date");
  }

  #[test]
  fn test_time_ago_buckets() {
    let now = parse_created_date("2023-04-10 12:00:00")
      .unwrap()
      .with_timezone(&Utc);

    assert_eq!(time_ago_at("2023-04-10 11:59:30", now), "Just now");
    assert_eq!(time_ago_at("2023-04-10 11:45:00", now), "15 minutes ago");
    assert_eq!(time_ago_at("2023-04-10 07:00:00", now), "5 hours ago");
    assert_eq!(time_ago_at("2023-04-09 02:00:00", now), "Yesterday");
    assert_eq!(time_ago_at("2023-04-05 12:00:00", now), "5 days ago");
  }
}
