use std::collections::HashMap;

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{
    DeepAnalysis, DeepAnalysisRow, NewPaper, Paper, PaperAnalysis, PaperAnalysisRow,
    PaperListItem, PaperListResponse, PaperQuery, PaperRow, TagCount,
};

pub const DEFAULT_PER_PAGE: i64 = 50;
pub const MAX_PER_PAGE: i64 = 100;

const PAPER_COLUMNS: &str = "p.id, p.title, p.authors_json, p.abstract, p.published_date, p.doi, \
     p.source_url, p.pdf_url, p.created_at, p.updated_at";

pub async fn doi_exists(pool: &SqlitePool, doi: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM papers WHERE doi = ?")
        .bind(doi)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Inserts a paper unless its DOI is already stored. Returns the new id.
pub async fn insert_paper(pool: &SqlitePool, paper: &NewPaper) -> Result<Option<String>, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let authors_json = serde_json::to_string(&paper.authors).unwrap_or_else(|_| "[]".to_string());

    let result = sqlx::query(
        r#"
        INSERT INTO papers (id, title, authors_json, abstract, published_date, doi, source_url, pdf_url, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(doi) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(&paper.title)
    .bind(&authors_json)
    .bind(&paper.abstract_text)
    .bind(&paper.published_date)
    .bind(&paper.doi)
    .bind(&paper.source_url)
    .bind(&paper.pdf_url)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok((result.rows_affected() == 1).then_some(id))
}

pub async fn fetch_paper(pool: &SqlitePool, paper_id: &str) -> Result<Option<Paper>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaperRow>(&format!(
        "SELECT {PAPER_COLUMNS} FROM papers p WHERE p.id = ?"
    ))
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Paper::from))
}

pub async fn fetch_analysis(
    pool: &SqlitePool,
    paper_id: &str,
) -> Result<Option<PaperAnalysis>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaperAnalysisRow>(
        r#"
        SELECT paper_id, title_cn, abstract_cn, main_institutions_json, insights, solutions,
               limitations, prospects, analyzed_at
        FROM paper_analysis WHERE paper_id = ?
        "#,
    )
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(PaperAnalysis::from))
}

pub async fn fetch_deep_analysis(
    pool: &SqlitePool,
    paper_id: &str,
) -> Result<Option<DeepAnalysis>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeepAnalysisRow>(
        r#"
        SELECT paper_id, motivation, insights_json, methods_json, experiments_json, results_json,
               technical_novelty_score, practical_impact_score, theoretical_contribution_score,
               confidence_score, analyzed_at
        FROM paper_deep_analysis WHERE paper_id = ?
        "#,
    )
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(DeepAnalysis::from))
}

pub async fn fetch_tags(pool: &SqlitePool, paper_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT t.name FROM paper_tags pt
        JOIN tags t ON t.id = pt.tag_id
        WHERE pt.paper_id = ?
        ORDER BY t.name
        "#,
    )
    .bind(paper_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

async fn fetch_tags_for_papers(
    pool: &SqlitePool,
    paper_ids: &[String],
) -> Result<HashMap<String, Vec<String>>, sqlx::Error> {
    if paper_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query_builder = QueryBuilder::<Sqlite>::new(
        "SELECT pt.paper_id, t.name FROM paper_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.paper_id IN (",
    );
    {
        let mut separated = query_builder.separated(", ");
        for paper_id in paper_ids {
            separated.push_bind(paper_id);
        }
    }
    query_builder.push(") ORDER BY t.name");

    let rows: Vec<(String, String)> = query_builder.build_query_as().fetch_all(pool).await?;
    let mut tags: HashMap<String, Vec<String>> = HashMap::new();
    for (paper_id, name) in rows {
        tags.entry(paper_id).or_default().push(name);
    }
    Ok(tags)
}

async fn fetch_analyses_for_papers(
    pool: &SqlitePool,
    paper_ids: &[String],
) -> Result<HashMap<String, PaperAnalysis>, sqlx::Error> {
    if paper_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query_builder = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT paper_id, title_cn, abstract_cn, main_institutions_json, insights, solutions,
               limitations, prospects, analyzed_at
        FROM paper_analysis WHERE paper_id IN (
        "#,
    );
    {
        let mut separated = query_builder.separated(", ");
        for paper_id in paper_ids {
            separated.push_bind(paper_id);
        }
    }
    query_builder.push(")");

    let rows: Vec<PaperAnalysisRow> = query_builder.build_query_as().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.paper_id.clone(), PaperAnalysis::from(row)))
        .collect())
}

fn push_filters(query_builder: &mut QueryBuilder<'_, Sqlite>, query: &PaperQuery) {
    query_builder.push(" WHERE 1 = 1");

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        query_builder
            .push(" AND (p.title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.abstract LIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.title_cn LIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.abstract_cn LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query_builder
            .push(
                " AND EXISTS (SELECT 1 FROM paper_tags pt JOIN tags t ON t.id = pt.tag_id \
                 WHERE pt.paper_id = p.id AND t.name = ",
            )
            .push_bind(tag.to_string())
            .push(")");
    }
}

/// Home page listing: newest publication first, each paper with its analysis and tags.
pub async fn list_papers(
    pool: &SqlitePool,
    query: &PaperQuery,
) -> Result<PaperListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let mut count_builder = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM papers p LEFT JOIN paper_analysis a ON a.paper_id = p.id",
    );
    push_filters(&mut count_builder, query);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    let mut list_builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {PAPER_COLUMNS} FROM papers p LEFT JOIN paper_analysis a ON a.paper_id = p.id"
    ));
    push_filters(&mut list_builder, query);
    list_builder
        .push(" ORDER BY p.published_date DESC, p.created_at DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(super::page_offset(page, per_page));

    let rows: Vec<PaperRow> = list_builder.build_query_as().fetch_all(pool).await?;
    let paper_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
    let mut analyses = fetch_analyses_for_papers(pool, &paper_ids).await?;
    let mut tags = fetch_tags_for_papers(pool, &paper_ids).await?;

    let papers: Vec<PaperListItem> = rows
        .into_iter()
        .map(|row| {
            let analysis = analyses.remove(&row.id);
            let tags = tags.remove(&row.id).unwrap_or_default();
            PaperListItem {
                paper: Paper::from(row),
                analysis,
                tags,
            }
        })
        .collect();

    Ok(PaperListResponse {
        has_more: page.saturating_mul(per_page) < total,
        papers,
        total,
        page,
        per_page,
    })
}

/// A user's favorite papers, most recently favorited first.
pub async fn favorite_papers(pool: &SqlitePool, user_id: i64) -> Result<Vec<PaperListItem>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaperRow>(&format!(
        "SELECT {PAPER_COLUMNS} FROM papers p \
         JOIN user_favorites f ON f.paper_id = p.id \
         WHERE f.user_id = ? ORDER BY f.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let paper_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
    let mut analyses = fetch_analyses_for_papers(pool, &paper_ids).await?;
    let mut tags = fetch_tags_for_papers(pool, &paper_ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| PaperListItem {
            analysis: analyses.remove(&row.id),
            tags: tags.remove(&row.id).unwrap_or_default(),
            paper: Paper::from(row),
        })
        .collect())
}

/// Ids of the `limit` most recently ingested papers, optionally only those without a basic analysis.
pub async fn recent_paper_ids(
    pool: &SqlitePool,
    limit: i64,
    only_unanalyzed: bool,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String, bool)> = sqlx::query_as(
        r#"
        SELECT p.id, a.paper_id IS NOT NULL AS analyzed
        FROM papers p
        LEFT JOIN paper_analysis a ON a.paper_id = p.id
        ORDER BY p.created_at DESC, p.rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter(|(_, analyzed)| !only_unanalyzed || !analyzed)
        .map(|(id, _)| id)
        .collect())
}

pub async fn popular_tags(pool: &SqlitePool, limit: i64) -> Result<Vec<TagCount>, sqlx::Error> {
    sqlx::query_as::<_, TagCount>(
        r#"
        SELECT t.name AS name, COUNT(pt.paper_id) AS count
        FROM tags t
        JOIN paper_tags pt ON pt.tag_id = t.id
        GROUP BY t.id, t.name
        ORDER BY count DESC, t.name ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
pub fn sample_paper(doi: &str, published_date: &str) -> NewPaper {
    NewPaper {
        title: format!("Paper {doi}"),
        authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
        abstract_text: Some("An abstract about protein folding.".to_string()),
        published_date: published_date.to_string(),
        doi: doi.to_string(),
        source_url: Some(format!("https://www.biorxiv.org/content/{doi}v1")),
        pdf_url: Some(format!("https://www.biorxiv.org/content/{doi}v1.full.pdf")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn duplicate_doi_is_not_inserted_twice() {
        let pool = memory_pool().await;
        let paper = sample_paper("10.1101/2024.01.01.000001", "2024-01-01");

        let first = insert_paper(&pool, &paper).await.unwrap();
        let second = insert_paper(&pool, &paper).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(doi_exists(&pool, &paper.doi).await.unwrap());

        let stored = fetch_paper(&pool, &first.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.authors, vec!["Ada Lovelace", "Alan Turing"]);
    }

    #[tokio::test]
    async fn listing_orders_by_publication_date_and_filters() {
        let pool = memory_pool().await;
        let older = insert_paper(&pool, &sample_paper("10.1101/a", "2024-01-01"))
            .await
            .unwrap()
            .unwrap();
        let newer = insert_paper(&pool, &sample_paper("10.1101/b", "2024-02-01"))
            .await
            .unwrap()
            .unwrap();

        let listing = list_papers(&pool, &PaperQuery::default()).await.unwrap();
        assert_eq!(listing.total, 2);
        assert_eq!(listing.papers[0].paper.id, newer);
        assert_eq!(listing.papers[1].paper.id, older);
        assert!(!listing.has_more);

        let query = PaperQuery {
            search: Some("10.1101/a".into()),
            ..Default::default()
        };
        let listing = list_papers(&pool, &query).await.unwrap();
        assert_eq!(listing.total, 1);
        assert_eq!(listing.papers[0].paper.id, older);

        let query = PaperQuery {
            per_page: Some(1),
            ..Default::default()
        };
        let listing = list_papers(&pool, &query).await.unwrap();
        assert_eq!(listing.papers.len(), 1);
        assert!(listing.has_more);
    }

    #[tokio::test]
    async fn page_far_past_the_end_is_empty() {
        let pool = memory_pool().await;
        insert_paper(&pool, &sample_paper("10.1101/a", "2024-01-01"))
            .await
            .unwrap();

        let query = PaperQuery {
            page: Some(i64::MAX),
            per_page: Some(MAX_PER_PAGE),
            ..Default::default()
        };
        let listing = list_papers(&pool, &query).await.unwrap();
        assert_eq!(listing.total, 1);
        assert!(listing.papers.is_empty());
        assert!(!listing.has_more);
        assert_eq!(listing.page, i64::MAX);
    }

    #[tokio::test]
    async fn recent_ids_can_skip_analyzed_papers() {
        let pool = memory_pool().await;
        let analyzed = insert_paper(&pool, &sample_paper("10.1101/a", "2024-01-01"))
            .await
            .unwrap()
            .unwrap();
        let fresh = insert_paper(&pool, &sample_paper("10.1101/b", "2024-01-02"))
            .await
            .unwrap()
            .unwrap();
        sqlx::query("INSERT INTO paper_analysis (paper_id, analyzed_at) VALUES (?, ?)")
            .bind(&analyzed)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(recent_paper_ids(&pool, 10, false).await.unwrap(), vec![fresh.clone(), analyzed]);
        assert_eq!(recent_paper_ids(&pool, 10, true).await.unwrap(), vec![fresh]);
    }
}
