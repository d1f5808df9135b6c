//! Query-parameter synchronization for list views.
//!
//! Each list view (parts, battlestations, stores) recognizes a closed set of
//! parameters: page number, results per page, sort column, sort direction
//! and an optional search term. The state round-trips through the
//! addressable location string so a listing is shareable: parameters at
//! their defaults are omitted on encode, and decoding a string with a
//! parameter missing yields that default back.
//!
//! Decoding never rewrites recognized values beyond schema validation. In
//! particular a page number past the last page is preserved as-is; clamping
//! is a caller decision.

use url::form_urlencoded;

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
  #[default]
  Asc,
  Desc,
}

impl SortDirection {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortDirection::Asc => "asc",
      SortDirection::Desc => "desc",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "asc" => Some(SortDirection::Asc),
      "desc" => Some(SortDirection::Desc),
      _ => None,
    }
  }

  pub fn toggled(&self) -> Self {
    match self {
      SortDirection::Asc => SortDirection::Desc,
      SortDirection::Desc => SortDirection::Asc,
    }
  }
}

/// Parameter state for one list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub page_number: u32,
  pub results_per_page: u32,
  pub sort_by: String,
  pub direction: SortDirection,
  pub search_term: Option<String>,
}

impl ListQuery {
  /// Jump to a page. The only change that keeps the current page context.
  pub fn with_page(mut self, page: u32) -> Self {
    self.page_number = page.max(1);
    self
  }

  // Every other change starts the listing over at page 1, so a narrowed
  // or re-sorted result set is never entered on a page it may not have.

  pub fn with_per_page(mut self, per_page: u32) -> Self {
    self.results_per_page = per_page;
    self.page_number = 1;
    self
  }

  pub fn with_sort(mut self, sort_by: impl Into<String>) -> Self {
    self.sort_by = sort_by.into();
    self.page_number = 1;
    self
  }

  pub fn with_direction(mut self, direction: SortDirection) -> Self {
    self.direction = direction;
    self.page_number = 1;
    self
  }

  pub fn with_search(mut self, term: Option<String>) -> Self {
    self.search_term = term.filter(|t| !t.is_empty());
    self.page_number = 1;
    self
  }

  /// All parameters as request query pairs, defaults included.
  ///
  /// This is the shape the backend's list endpoints expect; omitting
  /// defaults is a property of the location string only.
  pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
      ("pageNumber", self.page_number.to_string()),
      ("resultsPerPage", self.results_per_page.to_string()),
      ("sortBy", self.sort_by.clone()),
      ("direction", self.direction.as_str().to_string()),
    ];
    if let Some(term) = &self.search_term {
      pairs.push(("searchTerm", term.clone()));
    }
    pairs
  }
}

/// Closed parameter schema for one list view: defaults plus the valid sets
/// every decoded value is checked against.
#[derive(Debug, Clone, Copy)]
pub struct ParamSchema {
  pub per_page_default: u32,
  pub per_page_allowed: &'static [u32],
  pub sort_default: &'static str,
  pub sort_allowed: &'static [&'static str],
}

/// Schema for the public parts listing.
pub const PARTS: ParamSchema = ParamSchema {
  per_page_default: 12,
  per_page_allowed: &[12, 24, 48, 96],
  sort_default: "name",
  sort_allowed: &["name", "battlestation_count"],
};

/// Schema for the battlestations listing.
pub const BATTLESTATIONS: ParamSchema = ParamSchema {
  per_page_default: 12,
  per_page_allowed: &[12, 24, 48, 96],
  sort_default: "created_date",
  sort_allowed: &["name", "favorites", "created_date"],
};

/// Schema for the admin stores listing.
pub const STORES: ParamSchema = ParamSchema {
  per_page_default: 10,
  per_page_allowed: &[10, 20, 50],
  sort_default: "name",
  sort_allowed: &["name", "part_count"],
};

impl ParamSchema {
  /// The state every parameter of which is at its default.
  pub fn default_query(&self) -> ListQuery {
    ListQuery {
      page_number: 1,
      results_per_page: self.per_page_default,
      sort_by: self.sort_default.to_string(),
      direction: SortDirection::default(),
      search_term: None,
    }
  }

  /// Encode to a location query string, omitting default-valued parameters.
  ///
  /// The default state encodes to the empty string.
  pub fn encode(&self, query: &ListQuery) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());

    if query.page_number != 1 {
      out.append_pair("pageNumber", &query.page_number.to_string());
    }
    if query.results_per_page != self.per_page_default {
      out.append_pair("resultsPerPage", &query.results_per_page.to_string());
    }
    if query.sort_by != self.sort_default {
      out.append_pair("sortBy", &query.sort_by);
    }
    if query.direction != SortDirection::Asc {
      out.append_pair("direction", query.direction.as_str());
    }
    if let Some(term) = &query.search_term {
      out.append_pair("searchTerm", term);
    }

    out.finish()
  }

  /// Decode a location query string.
  ///
  /// Unrecognized parameters are ignored; recognized parameters with values
  /// outside the schema fall back to their defaults. A page number is only
  /// required to be a positive integer, never range-checked against a total.
  pub fn decode(&self, location: &str) -> ListQuery {
    let mut query = self.default_query();

    let raw = location.strip_prefix('?').unwrap_or(location);
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
      match key.as_ref() {
        "pageNumber" => {
          if let Ok(page) = value.parse::<u32>() {
            if page >= 1 {
              query.page_number = page;
            }
          }
        }
        "resultsPerPage" => {
          if let Ok(per_page) = value.parse::<u32>() {
            if self.per_page_allowed.contains(&per_page) {
              query.results_per_page = per_page;
            }
          }
        }
        "sortBy" => {
          if self.sort_allowed.contains(&value.as_ref()) {
            query.sort_by = value.into_owned();
          }
        }
        "direction" => {
          if let Some(direction) = SortDirection::parse(&value) {
            query.direction = direction;
          }
        }
        "searchTerm" => {
          if !value.is_empty() {
            query.search_term = Some(value.into_owned());
          }
        }
        _ => {}
      }
    }

    query
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_state_encodes_empty() {
    assert_eq!(PARTS.encode(&PARTS.default_query()), "");
  }

  #[test]
  fn test_round_trip_all_parameters() {
    let query = ListQuery {
      page_number: 3,
      results_per_page: 48,
      sort_by: "battlestation_count".to_string(),
      direction: SortDirection::Desc,
      search_term: Some("oled monitor".to_string()),
    };

    let encoded = PARTS.encode(&query);
    assert_eq!(PARTS.decode(&encoded), query);
    // Re-encoding the decoded state reproduces the same location string.
    assert_eq!(PARTS.encode(&PARTS.decode(&encoded)), encoded);
  }

  #[test]
  fn test_round_trip_partial_state() {
    let query = BATTLESTATIONS.default_query().with_sort("favorites");
    let encoded = BATTLESTATIONS.encode(&query);
    assert_eq!(encoded, "sortBy=favorites");
    assert_eq!(BATTLESTATIONS.decode(&encoded), query);
  }

  #[test]
  fn test_defaults_omitted_from_encoding() {
    let query = PARTS.default_query().with_page(2);
    let encoded = PARTS.encode(&query);
    assert_eq!(encoded, "pageNumber=2");
    assert!(!encoded.contains("resultsPerPage"));
    assert!(!encoded.contains("sortBy"));
    assert!(!encoded.contains("direction"));
  }

  #[test]
  fn test_decode_missing_parameters_yield_defaults() {
    let query = STORES.decode("");
    assert_eq!(query, STORES.default_query());

    let query = STORES.decode("?pageNumber=4");
    assert_eq!(query.page_number, 4);
    assert_eq!(query.results_per_page, 10);
    assert_eq!(query.sort_by, "name");
  }

  #[test]
  fn test_decode_rejects_values_outside_schema() {
    // 13 is not an allowed page size for parts; "price" is not a sort column.
    let query = PARTS.decode("resultsPerPage=13&sortBy=price&direction=sideways");
    assert_eq!(query.results_per_page, 12);
    assert_eq!(query.sort_by, "name");
    assert_eq!(query.direction, SortDirection::Asc);

    // Page numbers below 1 or non-numeric fall back to 1.
    assert_eq!(PARTS.decode("pageNumber=0").page_number, 1);
    assert_eq!(PARTS.decode("pageNumber=abc").page_number, 1);
  }

  #[test]
  fn test_decode_preserves_out_of_range_page() {
    // total=25 at 10 per page means page 5 is past the end; the synchronizer
    // must not silently rewrite it.
    let query = STORES.decode("pageNumber=5");
    assert_eq!(query.page_number, 5);
  }

  #[test]
  fn test_decode_ignores_unrecognized_parameters() {
    let query = PARTS.decode("utm_source=newsletter&pageNumber=2");
    assert_eq!(query.page_number, 2);
    assert_eq!(PARTS.encode(&query), "pageNumber=2");
  }

  #[test]
  fn test_search_term_encoding() {
    let query = PARTS.default_query().with_search(Some("split keyboard".to_string()));
    let encoded = PARTS.encode(&query);
    assert_eq!(encoded, "searchTerm=split+keyboard");
    assert_eq!(PARTS.decode(&encoded).search_term.as_deref(), Some("split keyboard"));
  }

  #[test]
  fn test_non_page_changes_reset_page() {
    let query = PARTS.default_query().with_page(7);
    assert_eq!(query.clone().with_search(Some("desk".into())).page_number, 1);
    assert_eq!(query.clone().with_per_page(24).page_number, 1);
    assert_eq!(query.clone().with_sort("battlestation_count").page_number, 1);
    assert_eq!(query.clone().with_direction(SortDirection::Desc).page_number, 1);
    // Changing the page itself does not.
    assert_eq!(query.with_page(8).page_number, 8);
  }

  #[test]
  fn test_request_pairs_include_defaults() {
    let pairs = STORES.default_query().to_query_pairs();
    assert_eq!(
      pairs,
      vec![
        ("pageNumber", "1".to_string()),
        ("resultsPerPage", "10".to_string()),
        ("sortBy", "name".to_string()),
        ("direction", "asc".to_string()),
      ]
    );
  }
}
