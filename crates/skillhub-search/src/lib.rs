//! Search query planning
//!
//! Translates a [`SearchRequest`] into a page of skill summaries by choosing
//! between two retrieval paths:
//!
//! 1. **Ranked path**: a server-side relevance-scored query, attempted only
//!    when free text is present. Treated as optional: any failure degrades
//!    silently to the fallback. Its reported total equals the page length,
//!    not the true matching row count (the ranked capability reports no
//!    aggregate); this imprecision is deliberate and documented.
//! 2. **Fallback path**: case-insensitive substring matching over name,
//!    description, and author, with all filters applied and an exact total.
//!    When text was supplied, the fetched page is re-ranked in memory so
//!    exact name matches outrank substring name matches.
//!
//! The paths never run speculatively in parallel; the fallback only runs
//! once the ranked path is known to be inapplicable or failed.

use async_trait::async_trait;
use serde::Serialize;
use skillhub_core::{SearchRequest, SkillSummary, SortBy};
use std::cmp::Reverse;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors a [`SkillSource`] may surface to the planner.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The ranked capability is absent or failed; the planner degrades.
    #[error("Ranked search unavailable: {0}")]
    RankedUnavailable(String),

    /// The data source itself is unreachable or returned a database error.
    #[error("Data source error: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum SearchError {
    /// The fallback path failed; no results can be served.
    #[error("Search failed: {0}")]
    DataSource(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// One fetched page plus the exact total under the same filters.
#[derive(Debug, Clone)]
pub struct FilteredPage {
    pub skills: Vec<SkillSummary>,
    pub total: u64,
}

/// Retrieval backend seam. The store implements both paths; tests substitute
/// an in-memory double.
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// Server-side ranked search. Only invoked with a non-empty trimmed
    /// query. An `Err` is not fatal; the planner falls back.
    async fn ranked_search(
        &self,
        req: &SearchRequest,
    ) -> std::result::Result<Vec<SkillSummary>, SourceError>;

    /// Filtered substring search with an exact total count.
    async fn filtered_search(
        &self,
        req: &SearchRequest,
    ) -> std::result::Result<FilteredPage, SourceError>;
}

/// Which path produced a response. Logged per request, never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    Ranked,
    Fallback,
}

impl ServedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedBy::Ranked => "ranked",
            ServedBy::Fallback => "fallback",
        }
    }
}

/// An ordered page of results with pagination echoed back.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub skills: Vec<SkillSummary>,
    /// Exact on the fallback path; equal to `skills.len()` on the ranked
    /// path (known precision loss).
    pub total: u64,
    pub limit: u32,
    pub offset: u32,

    #[serde(skip)]
    pub served_by: ServedBy,
}

/// Two-path planner over a [`SkillSource`].
pub struct SearchPlanner<S> {
    source: S,
}

impl<S: SkillSource> SearchPlanner<S> {
    pub fn new(source: S) -> Self {
        SearchPlanner { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Execute a search request. Fails only when the fallback path cannot
    /// reach the data source; ranked-path failures degrade silently.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        if let Some(text) = req.text() {
            match self.source.ranked_search(req).await {
                Ok(skills) => {
                    debug!(
                        served_by = ServedBy::Ranked.as_str(),
                        results = skills.len(),
                        sort_by = %req.sort_by,
                        "search served"
                    );
                    return Ok(SearchResponse {
                        total: skills.len() as u64,
                        skills,
                        limit: req.limit,
                        offset: req.offset,
                        served_by: ServedBy::Ranked,
                    });
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        query_len = text.len(),
                        "ranked search failed, falling back to filtered query"
                    );
                }
            }
        }

        let page = self.source.filtered_search(req).await?;
        let mut skills = page.skills;

        if let Some(text) = req.text() {
            if req.sort_by != SortBy::Name {
                rerank_by_name_match(&mut skills, text);
            }
        }

        debug!(
            served_by = ServedBy::Fallback.as_str(),
            results = skills.len(),
            total = page.total,
            sort_by = %req.sort_by,
            "search served"
        );
        Ok(SearchResponse {
            skills,
            total: page.total,
            limit: req.limit,
            offset: req.offset,
            served_by: ServedBy::Fallback,
        })
    }
}

/// Match quality of a skill name against the query text.
fn name_match_class(name: &str, text: &str) -> u8 {
    let name = name.to_lowercase();
    let text = text.to_lowercase();
    if name == text {
        2
    } else if name.contains(&text) {
        1
    } else {
        0
    }
}

/// Stable in-memory re-sort of one fetched page: exact name match first,
/// then substring name matches, then the rest. Ties keep the order the
/// fallback query produced (stars or recency). Never re-queries.
fn rerank_by_name_match(skills: &mut [SkillSummary], text: &str) {
    skills.sort_by_key(|s| Reverse(name_match_class(&s.name, text)));
}
