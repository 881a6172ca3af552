//! Tests for the catalog store: filters, ordering, pagination, aggregates

use chrono::{TimeZone, Utc};
use skillhub::core::{SearchRequest, SortBy};
use skillhub::search::{SearchPlanner, ServedBy, SkillSource};
use skillhub::store::{NewSkill, SkillStore};
use tempfile::TempDir;

fn seed_skill(name: &str, author: &str, stars: i64) -> NewSkill {
    NewSkill {
        id: None,
        name: name.to_string(),
        description: Some(format!("{} helps with automation", name)),
        author: author.to_string(),
        stars,
        forks: 0,
        github_url: None,
        author_avatar: None,
        repo_full_name: None,
        path: None,
        category: Some("coding".to_string()),
        content: None,
        updated_at: None,
    }
}

async fn store_with(skills: Vec<NewSkill>) -> (TempDir, SkillStore) {
    let temp = TempDir::new().unwrap();
    let store = SkillStore::open(temp.path().join("catalog.db")).await.unwrap();
    for skill in &skills {
        store.upsert_skill(skill).await.unwrap();
    }
    (temp, store)
}

#[tokio::test]
async fn upsert_is_keyed_by_scoped_name() {
    let (_temp, store) = store_with(vec![]).await;

    let first = store.upsert_skill(&seed_skill("scraper", "alice", 5)).await.unwrap();
    let second = store
        .upsert_skill(&seed_skill("scraper", "alice", 9))
        .await
        .unwrap();
    assert_eq!(first, second, "re-import keeps the original id");

    let summary = store
        .get_by_scoped_name("@alice/scraper")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.stars, 9);
    assert_eq!(summary.scoped_name, "@alice/scraper");
}

#[tokio::test]
async fn upsert_rejects_unknown_category() {
    let store = SkillStore::open_in_memory().await.unwrap();
    let mut skill = seed_skill("scraper", "alice", 1);
    skill.category = Some("quantum".to_string());
    assert!(store.upsert_skill(&skill).await.is_err());

    skill.category = Some("coding".to_string());
    store.upsert_skill(&skill).await.unwrap();
}

#[tokio::test]
async fn min_stars_is_an_inclusive_lower_bound() {
    let (_temp, store) = store_with(vec![
        seed_skill("a", "alice", 0),
        seed_skill("b", "bob", 10),
        seed_skill("c", "carol", 25),
    ])
    .await;

    let req = SearchRequest {
        min_stars: 10,
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.skills.iter().all(|s| s.stars >= 10));
}

#[tokio::test]
async fn text_filter_matches_name_description_or_author() {
    let mut by_desc = seed_skill("alpha", "alice", 1);
    by_desc.description = Some("a tool for scraping pages".to_string());
    let by_name = seed_skill("scraper", "bob", 2);
    let by_author = seed_skill("beta", "scrapmaster", 3);
    let unrelated = seed_skill("gamma", "carol", 4);

    let (_temp, store) = store_with(vec![by_desc, by_name, by_author, unrelated]).await;

    let req = SearchRequest {
        query: "scrap".to_string(),
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.skills.iter().all(|s| s.name != "gamma"));
}

#[tokio::test]
async fn text_filter_is_case_insensitive_and_escapes_wildcards() {
    let (_temp, store) = store_with(vec![
        seed_skill("PdfTools", "alice", 1),
        seed_skill("percent", "bob", 1),
    ])
    .await;

    let req = SearchRequest {
        query: "pdftools".to_string(),
        ..Default::default()
    };
    assert_eq!(store.filtered_query(&req).await.unwrap().total, 1);

    // A literal "%" must not act as a wildcard.
    let req = SearchRequest {
        query: "%".to_string(),
        ..Default::default()
    };
    assert_eq!(store.filtered_query(&req).await.unwrap().total, 0);
}

#[tokio::test]
async fn category_and_author_filters_are_exact() {
    let mut writing = seed_skill("prose", "alice", 3);
    writing.category = Some("writing".to_string());
    let (_temp, store) = store_with(vec![writing, seed_skill("scraper", "bob", 5)]).await;

    let req = SearchRequest {
        category: Some("writing".to_string()),
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.skills[0].name, "prose");

    // The "all" sentinel disables the filter.
    let req = SearchRequest {
        category: Some("all".to_string()),
        ..Default::default()
    };
    assert_eq!(store.filtered_query(&req).await.unwrap().total, 2);

    let req = SearchRequest {
        author: Some("bob".to_string()),
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.skills[0].author, "bob");
}

#[tokio::test]
async fn has_content_filter_excludes_contentless_records() {
    let mut with_content = seed_skill("documented", "alice", 1);
    with_content.content = Some("# Usage".to_string());
    let (_temp, store) = store_with(vec![with_content, seed_skill("bare", "bob", 2)]).await;

    let req = SearchRequest {
        has_content: true,
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.skills[0].name, "documented");
    assert!(page.skills[0].has_content);
}

#[tokio::test]
async fn recent_sort_puts_undated_records_last() {
    let mut old = seed_skill("old", "alice", 1);
    old.updated_at = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    let mut new = seed_skill("new", "bob", 1);
    new.updated_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    let undated = seed_skill("undated", "carol", 99);

    let (_temp, store) = store_with(vec![old, new, undated]).await;

    let req = SearchRequest {
        sort_by: SortBy::Recent,
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    let names: Vec<_> = page.skills.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["new", "old", "undated"]);
}

#[tokio::test]
async fn zero_limit_yields_empty_page_with_exact_total() {
    let (_temp, store) = store_with(vec![seed_skill("a", "alice", 1), seed_skill("b", "bob", 2)]).await;

    let req = SearchRequest {
        limit: 0,
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert!(page.skills.is_empty());
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn offset_past_total_yields_empty_page() {
    let (_temp, store) = store_with(vec![seed_skill("a", "alice", 1)]).await;

    let req = SearchRequest {
        offset: 50,
        ..Default::default()
    };
    let page = store.filtered_query(&req).await.unwrap();
    assert!(page.skills.is_empty());
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn consecutive_pages_are_disjoint() {
    let mut skills = Vec::new();
    for i in 0..25 {
        // Identical star counts force the name tie-break to do the work.
        skills.push(seed_skill(&format!("skill-{:02}", i), "alice", 7));
    }
    let (_temp, store) = store_with(skills).await;

    let first = store
        .filtered_query(&SearchRequest {
            limit: 10,
            offset: 0,
            ..Default::default()
        })
        .await
        .unwrap();
    let second = store
        .filtered_query(&SearchRequest {
            limit: 10,
            offset: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(first.skills.len(), 10);
    assert_eq!(second.skills.len(), 10);
    let first_ids: std::collections::HashSet<_> =
        first.skills.iter().map(|s| s.id.clone()).collect();
    assert!(second.skills.iter().all(|s| !first_ids.contains(&s.id)));
}

#[tokio::test]
async fn ranked_query_respects_filters_and_pagination() {
    let (_temp, store) = store_with(vec![
        seed_skill("scraper", "alice", 50),
        seed_skill("scraper-pro", "bob", 5),
        seed_skill("unrelated", "carol", 100),
    ])
    .await;
    assert!(store.ranked_enabled());

    let req = SearchRequest {
        query: "scraper".to_string(),
        min_stars: 10,
        ..Default::default()
    };
    let skills = store.ranked_query(&req).await.unwrap();
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].name, "scraper");
}

#[tokio::test]
async fn planner_over_store_reports_inexact_ranked_total() {
    let (_temp, store) = store_with(vec![
        seed_skill("scraper", "alice", 1),
        seed_skill("scraper-kit", "bob", 2),
    ])
    .await;
    let planner = SearchPlanner::new(store);

    let req = SearchRequest {
        query: "scraper".to_string(),
        limit: 1,
        ..Default::default()
    };
    let resp = planner.search(&req).await.unwrap();
    assert_eq!(resp.served_by, ServedBy::Ranked);
    // One row fetched, so the reported total is 1 even though two match.
    assert_eq!(resp.total, 1);
    assert_eq!(resp.skills.len(), 1);
}

#[tokio::test]
async fn planner_over_store_uses_fallback_without_query() {
    let (_temp, store) = store_with(vec![seed_skill("a", "alice", 1)]).await;
    let planner = SearchPlanner::new(store);

    let resp = planner.search(&SearchRequest::default()).await.unwrap();
    assert_eq!(resp.served_by, ServedBy::Fallback);
    assert_eq!(resp.total, 1);
}

#[tokio::test]
async fn fts_survives_hyphenated_and_quoted_queries() {
    let (_temp, store) = store_with(vec![seed_skill("foo-bar", "alice", 1)]).await;

    for query in ["foo-bar", "\"foo\"", "foo bar"] {
        let req = SearchRequest {
            query: query.to_string(),
            ..Default::default()
        };
        // Must not error out as malformed FTS syntax.
        store.ranked_query(&req).await.unwrap();
    }
}

#[tokio::test]
async fn stats_and_categories_aggregate_catalog() {
    let mut writing = seed_skill("prose", "alice", 10);
    writing.category = Some("writing".to_string());
    let (_temp, store) = store_with(vec![
        seed_skill("a", "alice", 5),
        seed_skill("b", "bob", 7),
        writing,
    ])
    .await;

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_skills, 3);
    assert_eq!(stats.total_authors, 2);
    assert_eq!(stats.total_stars, 22);

    let categories = store.category_counts().await.unwrap();
    assert_eq!(categories[0].name, "coding");
    assert_eq!(categories[0].count, 2);
    assert_eq!(categories[1].name, "writing");
    assert_eq!(categories[1].count, 1);
}

#[tokio::test]
async fn telemetry_events_are_appended() {
    let (_temp, store) = store_with(vec![]).await;

    let id = store
        .record_telemetry("skill_viewed", &serde_json::json!({ "skill": "@alice/a" }))
        .await
        .unwrap();
    assert!(!id.is_empty());
    assert_eq!(store.telemetry_count().await.unwrap(), 1);
}

#[tokio::test]
async fn sitemap_entries_are_name_ordered() {
    let (_temp, store) = store_with(vec![
        seed_skill("zeta", "zoe", 1),
        seed_skill("alpha", "alice", 1),
    ])
    .await;

    let entries = store.sitemap_entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].scoped_name, "@alice/alpha");
    assert_eq!(entries[1].scoped_name, "@zoe/zeta");
}

#[tokio::test]
async fn source_trait_paths_agree_with_native_methods() {
    let (_temp, store) = store_with(vec![seed_skill("scraper", "alice", 1)]).await;

    let req = SearchRequest {
        query: "scraper".to_string(),
        ..Default::default()
    };
    let ranked = store.ranked_search(&req).await.unwrap();
    assert_eq!(ranked.len(), 1);
    let page = store.filtered_search(&req).await.unwrap();
    assert_eq!(page.total, 1);
}
