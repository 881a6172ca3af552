//! SQLite-backed catalog store
//!
//! Owns the marketplace data: the `skills` table, an optional FTS5 index
//! backing the ranked search path, and the `telemetry` event log. Implements
//! [`SkillSource`] for the search planner and serves the aggregate queries
//! behind the categories, stats, and sitemap endpoints.
//!
//! The FTS5 index is best-effort: if the linked SQLite lacks the module, the
//! store boots without it and every ranked call reports
//! [`SourceError::RankedUnavailable`], which the planner degrades around.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillhub_core::{scoped_name, SearchRequest, SkillSummary, SortBy, KNOWN_CATEGORIES};
use skillhub_search::{FilteredPage, SkillSource, SourceError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ranked search unavailable: {0}")]
    RankedUnavailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for SourceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RankedUnavailable(msg) => SourceError::RankedUnavailable(msg),
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

/// Columns that materialize a [`SkillSummary`]. `has_content` is computed;
/// raw content never leaves the store through summary queries.
const SUMMARY_COLS: &str = "s.id, s.name, s.description, s.author, s.stars, s.forks, \
     s.github_url, s.scoped_name, s.author_avatar, s.repo_full_name, s.path, s.category, \
     (s.content IS NOT NULL) AS has_content, s.updated_at";

/// A skill record as accepted by the seed importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSkill {
    /// Stable id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub author: String,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub forks: i64,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub author_avatar: Option<String>,
    #[serde(default)]
    pub repo_full_name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Aggregate catalog figures for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_skills: i64,
    pub total_authors: i64,
    pub total_stars: i64,
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: i64,
}

/// One sitemap url entry.
#[derive(Debug, Clone)]
pub struct SitemapEntry {
    pub scoped_name: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// SQLite catalog store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct SkillStore {
    pool: SqlitePool,
    ranked_enabled: bool,
}

impl SkillStore {
    /// Open (creating if missing) the catalog database at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::InvalidData(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))
                .map_err(|e| StoreError::InvalidData(format!("Invalid database path: {}", e)))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::bootstrap(pool).await?;
        info!(path = %db_path.display(), ranked = store.ranked_enabled, "catalog store opened");
        Ok(store)
    }

    /// Open an in-memory catalog, used by tests and `seed --dry-run`-style
    /// tooling. Single connection so the database survives the pool.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::bootstrap(pool).await
    }

    async fn bootstrap(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                author TEXT NOT NULL,
                stars INTEGER NOT NULL DEFAULT 0,
                forks INTEGER NOT NULL DEFAULT 0,
                github_url TEXT,
                scoped_name TEXT NOT NULL UNIQUE,
                author_avatar TEXT,
                repo_full_name TEXT,
                path TEXT,
                category TEXT,
                content TEXT,
                updated_at INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_skills_stars ON skills(stars)",
            "CREATE INDEX IF NOT EXISTS idx_skills_category ON skills(category)",
            "CREATE INDEX IF NOT EXISTS idx_skills_author ON skills(author)",
        ] {
            sqlx::query(stmt).execute(&pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry (
                id TEXT PRIMARY KEY,
                event TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // Ranked search is optional; boot degraded if FTS5 is missing.
        let ranked_enabled = match sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS skills_fts
            USING fts5(id UNINDEXED, name, description, author)
            "#,
        )
        .execute(&pool)
        .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "FTS5 unavailable, ranked search disabled");
                false
            }
        };

        debug!("catalog schema initialized");
        Ok(SkillStore {
            pool,
            ranked_enabled,
        })
    }

    /// Whether the ranked search capability is present.
    pub fn ranked_enabled(&self) -> bool {
        self.ranked_enabled
    }

    /// Insert or update one skill, keyed by its scoped name. Returns the
    /// record's stable id.
    pub async fn upsert_skill(&self, skill: &NewSkill) -> Result<String> {
        if skill.name.is_empty() || skill.author.is_empty() {
            return Err(StoreError::InvalidData(
                "skill name and author must be non-empty".to_string(),
            ));
        }
        if skill.stars < 0 {
            return Err(StoreError::InvalidData("stars must be non-negative".to_string()));
        }
        if let Some(category) = skill.category.as_deref() {
            if !KNOWN_CATEGORIES.contains(&category) {
                return Err(StoreError::InvalidData(format!(
                    "unknown category: {}",
                    category
                )));
            }
        }

        let scoped = scoped_name(&skill.author, &skill.name);
        let id = skill
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO skills (
                id, name, description, author, stars, forks, github_url,
                scoped_name, author_avatar, repo_full_name, path, category,
                content, updated_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(scoped_name) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                stars = excluded.stars,
                forks = excluded.forks,
                github_url = excluded.github_url,
                author_avatar = excluded.author_avatar,
                repo_full_name = excluded.repo_full_name,
                path = excluded.path,
                category = excluded.category,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&skill.name)
        .bind(&skill.description)
        .bind(&skill.author)
        .bind(skill.stars)
        .bind(skill.forks)
        .bind(&skill.github_url)
        .bind(&scoped)
        .bind(&skill.author_avatar)
        .bind(&skill.repo_full_name)
        .bind(&skill.path)
        .bind(&skill.category)
        .bind(&skill.content)
        .bind(skill.updated_at.map(|t| t.timestamp()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        // The conflict path keeps the original id; read back the winner.
        let stored_id: String = sqlx::query_scalar("SELECT id FROM skills WHERE scoped_name = ?1")
            .bind(&scoped)
            .fetch_one(&self.pool)
            .await?;

        if self.ranked_enabled {
            sqlx::query("DELETE FROM skills_fts WHERE id = ?1")
                .bind(&stored_id)
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "INSERT INTO skills_fts (id, name, description, author) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&stored_id)
            .bind(&skill.name)
            .bind(&skill.description)
            .bind(&skill.author)
            .execute(&self.pool)
            .await?;
        }

        debug!(scoped_name = %scoped, "upserted skill");
        Ok(stored_id)
    }

    /// Look up one skill by its `@author/name` scoped name.
    pub async fn get_by_scoped_name(&self, scoped: &str) -> Result<Option<SkillSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {SUMMARY_COLS} FROM skills s WHERE s.scoped_name = ?1"
        ))
        .bind(scoped)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_summary).transpose()
    }

    /// FTS5-ranked retrieval. Errors when the index is absent; the planner
    /// treats that as a signal to degrade, not a failure.
    pub async fn ranked_query(&self, req: &SearchRequest) -> Result<Vec<SkillSummary>> {
        if !self.ranked_enabled {
            return Err(StoreError::RankedUnavailable(
                "fts5 index not available".to_string(),
            ));
        }
        let text = match req.text() {
            Some(text) => text,
            None => return Ok(Vec::new()),
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {SUMMARY_COLS} FROM skills_fts \
             JOIN skills s ON s.id = skills_fts.id WHERE skills_fts MATCH "
        ));
        qb.push_bind(fts_match_expr(text));
        push_filters(&mut qb, req);
        qb.push(" ORDER BY ");
        qb.push(match req.sort_by {
            SortBy::Rank => "bm25(skills_fts), s.stars DESC",
            SortBy::Stars => "s.stars DESC, s.name ASC",
            SortBy::Recent => "s.updated_at IS NULL, s.updated_at DESC, s.name ASC",
            SortBy::Name => "s.name COLLATE NOCASE ASC",
        });
        push_page(&mut qb, req);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_summary).collect()
    }

    /// Substring-matching fallback with all filters and an exact total.
    pub async fn filtered_query(&self, req: &SearchRequest) -> Result<FilteredPage> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SUMMARY_COLS} FROM skills s WHERE 1 = 1"));
        push_text_filter(&mut qb, req);
        push_filters(&mut qb, req);
        qb.push(" ORDER BY ");
        qb.push(match req.sort_by {
            // Rank has no server-side meaning here; stars is the documented
            // fallback ordering. Name breaks ties to keep pages disjoint.
            SortBy::Stars | SortBy::Rank => "s.stars DESC, s.name ASC",
            SortBy::Recent => "s.updated_at IS NULL, s.updated_at DESC, s.name ASC",
            SortBy::Name => "s.name COLLATE NOCASE ASC",
        });
        push_page(&mut qb, req);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let skills = rows
            .into_iter()
            .map(row_to_summary)
            .collect::<Result<Vec<_>>>()?;

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM skills s WHERE 1 = 1");
        push_text_filter(&mut count_qb, req);
        push_filters(&mut count_qb, req);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok(FilteredPage {
            skills,
            total: total.max(0) as u64,
        })
    }

    /// Category names with skill counts, largest first.
    pub async fn category_counts(&self) -> Result<Vec<CategoryCount>> {
        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS count FROM skills
            WHERE category IS NOT NULL AND category != ''
            GROUP BY category
            ORDER BY count DESC, category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CategoryCount {
                name: row.get("category"),
                count: row.get("count"),
            })
            .collect())
    }

    /// Catalog-wide aggregates for the stats endpoint.
    pub async fn stats(&self) -> Result<CatalogStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_skills,
                   COUNT(DISTINCT author) AS total_authors,
                   COALESCE(SUM(stars), 0) AS total_stars
            FROM skills
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogStats {
            total_skills: row.get("total_skills"),
            total_authors: row.get("total_authors"),
            total_stars: row.get("total_stars"),
            categories: self.category_counts().await?,
        })
    }

    /// Append one telemetry event. Insert-only; returns the event id.
    pub async fn record_telemetry(
        &self,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload_json = serde_json::to_string(payload)?;

        sqlx::query(
            "INSERT INTO telemetry (id, event, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&id)
        .bind(event)
        .bind(payload_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(event, id = %id, "telemetry recorded");
        Ok(id)
    }

    /// Number of stored telemetry events.
    pub async fn telemetry_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM telemetry")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Every catalog entry's scoped name and last-update time, name-ordered,
    /// for sitemap generation.
    pub async fn sitemap_entries(&self) -> Result<Vec<SitemapEntry>> {
        let rows = sqlx::query(
            "SELECT scoped_name, updated_at FROM skills ORDER BY scoped_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let updated_at = decode_timestamp(row.get("updated_at"))?;
                Ok(SitemapEntry {
                    scoped_name: row.get("scoped_name"),
                    updated_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SkillSource for SkillStore {
    async fn ranked_search(
        &self,
        req: &SearchRequest,
    ) -> std::result::Result<Vec<SkillSummary>, SourceError> {
        self.ranked_query(req).await.map_err(SourceError::from)
    }

    async fn filtered_search(
        &self,
        req: &SearchRequest,
    ) -> std::result::Result<FilteredPage, SourceError> {
        self.filtered_query(req).await.map_err(SourceError::from)
    }
}

/// OR-of-substrings text filter over name, description, and author. SQLite
/// `LIKE` is ASCII case-insensitive, matching the original contract.
fn push_text_filter(qb: &mut QueryBuilder<Sqlite>, req: &SearchRequest) {
    if let Some(text) = req.text() {
        let pattern = like_pattern(text);
        qb.push(" AND (s.name LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR s.description LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR s.author LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }
}

/// Structured filters shared by both retrieval paths.
fn push_filters(qb: &mut QueryBuilder<Sqlite>, req: &SearchRequest) {
    if let Some(category) = req.category_filter() {
        qb.push(" AND s.category = ");
        qb.push_bind(category.to_string());
    }
    if let Some(author) = req.author_filter() {
        qb.push(" AND s.author = ");
        qb.push_bind(author.to_string());
    }
    if req.min_stars > 0 {
        qb.push(" AND s.stars >= ");
        qb.push_bind(req.min_stars);
    }
    if req.has_content {
        qb.push(" AND s.content IS NOT NULL");
    }
}

fn push_page(qb: &mut QueryBuilder<Sqlite>, req: &SearchRequest) {
    qb.push(" LIMIT ");
    qb.push_bind(req.limit as i64);
    qb.push(" OFFSET ");
    qb.push_bind(req.offset as i64);
}

/// Escape `%`, `_`, and the escape character itself, then wrap in wildcards.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("%{}%", escaped)
}

/// Quote each whitespace-separated token so user text (hyphens, operators)
/// is never parsed as FTS5 query syntax.
fn fts_match_expr(text: &str) -> String {
    text.split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_timestamp(ts: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ts.map(|secs| {
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| StoreError::InvalidData(format!("invalid timestamp: {}", secs)))
    })
    .transpose()
}

/// Convert a summary row, rejecting malformed fields at the boundary.
fn row_to_summary(row: SqliteRow) -> Result<SkillSummary> {
    let updated_at = decode_timestamp(row.get("updated_at"))?;
    Ok(SkillSummary {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        author: row.get("author"),
        stars: row.get("stars"),
        forks: row.get("forks"),
        github_url: row.get("github_url"),
        scoped_name: row.get("scoped_name"),
        author_avatar: row.get("author_avatar"),
        repo_full_name: row.get("repo_full_name"),
        path: row.get("path"),
        category: row.get("category"),
        has_content: row.get("has_content"),
        updated_at,
    })
}
