//! Core types for skillhub
//!
//! Shared vocabulary between the store, the search planner, and the API:
//! - [`SkillSummary`]: the wire shape of a catalog entry
//! - [`SearchRequest`] / [`SortBy`]: a fully-parsed search invocation
//! - Catalog-wide policy constants (pagination bounds, known categories)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid sort key: {0}")]
    InvalidSortKey(String),

    #[error("Invalid scoped name: {0}")]
    InvalidScopedName(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Default page size for catalog queries.
pub const DEFAULT_LIMIT: u32 = 30;

/// Hard upper bound on page size; callers clamp before building a request.
pub const MAX_LIMIT: u32 = 100;

/// Sentinel category value meaning "no category filter".
pub const CATEGORY_ALL: &str = "all";

/// Categories accepted by the seed importer. Storage itself is free-form;
/// this list only gates what new imports may claim.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "coding",
    "research",
    "writing",
    "data",
    "devops",
    "productivity",
    "other",
];

/// A catalog entry as served over the API.
///
/// Field names serialize camelCase to match the public wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub id: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub author: String,
    pub stars: i64,
    pub forks: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,

    /// Globally unique `@author/name` identifier.
    pub scoped_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_full_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub has_content: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Build the canonical `@author/name` scoped name.
pub fn scoped_name(author: &str, name: &str) -> String {
    format!("@{}/{}", author, name)
}

/// Split a scoped name back into `(author, name)`.
pub fn parse_scoped_name(scoped: &str) -> Result<(&str, &str)> {
    let rest = scoped
        .strip_prefix('@')
        .ok_or_else(|| CoreError::InvalidScopedName(scoped.to_string()))?;
    rest.split_once('/')
        .filter(|(author, name)| !author.is_empty() && !name.is_empty())
        .ok_or_else(|| CoreError::InvalidScopedName(scoped.to_string()))
}

/// Sort modes accepted by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Star count descending (the default).
    #[default]
    Stars,
    /// Update timestamp descending, records without a timestamp last.
    Recent,
    /// Name ascending.
    Name,
    /// Server-side relevance rank; equivalent to `Stars` on the fallback path.
    Rank,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Stars => "stars",
            SortBy::Recent => "recent",
            SortBy::Name => "name",
            SortBy::Rank => "rank",
        }
    }
}

impl std::str::FromStr for SortBy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stars" => Ok(SortBy::Stars),
            "recent" => Ok(SortBy::Recent),
            "name" => Ok(SortBy::Name),
            "rank" => Ok(SortBy::Rank),
            other => Err(CoreError::InvalidSortKey(other.to_string())),
        }
    }
}

impl std::fmt::Display for SortBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-parsed search invocation. Created at request entry, consumed once.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Free text, possibly empty. Matching always uses the trimmed form.
    pub query: String,
    pub limit: u32,
    pub offset: u32,
    /// Exact category match; `None` or the literal `"all"` disables it.
    pub category: Option<String>,
    /// Exact author match.
    pub author: Option<String>,
    /// Inclusive lower bound on stars; 0 disables it.
    pub min_stars: i64,
    /// When true, only records with stored content qualify.
    pub has_content: bool,
    pub sort_by: SortBy,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            category: None,
            author: None,
            min_stars: 0,
            has_content: false,
            sort_by: SortBy::default(),
        }
    }
}

impl SearchRequest {
    /// Trimmed query text, or `None` when the query is empty or whitespace.
    pub fn text(&self) -> Option<&str> {
        let trimmed = self.query.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Category filter with the `"all"` sentinel resolved away.
    pub fn category_filter(&self) -> Option<&str> {
        self.category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != CATEGORY_ALL)
    }

    /// Author filter, empty strings treated as absent.
    pub fn author_filter(&self) -> Option<&str> {
        self.author.as_deref().filter(|a| !a.is_empty())
    }
}

/// Clamp a caller-supplied limit into `0..=MAX_LIMIT`.
pub fn clamp_limit(limit: u32) -> u32 {
    limit.min(MAX_LIMIT)
}
