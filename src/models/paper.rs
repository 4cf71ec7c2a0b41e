use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::analysis::{DeepAnalysis, PaperAnalysis};

#[derive(Debug, Clone, FromRow)]
pub struct PaperRow {
    pub id: String,
    pub title: String,
    pub authors_json: String,
    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub published_date: String,
    pub doi: Option<String>,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub published_date: String,
    pub doi: Option<String>,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PaperRow> for Paper {
    fn from(row: PaperRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            authors: serde_json::from_str(&row.authors_json).unwrap_or_default(),
            abstract_text: row.abstract_text,
            published_date: row.published_date,
            doi: row.doi,
            source_url: row.source_url,
            pdf_url: row.pdf_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Paper as listed on the home page: the record plus its first-pass analysis and tags.
#[derive(Debug, Serialize)]
pub struct PaperListItem {
    pub paper: Paper,
    pub analysis: Option<PaperAnalysis>,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PaperListResponse {
    pub papers: Vec<PaperListItem>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct PaperDetailResponse {
    pub paper: Paper,
    pub analysis: Option<PaperAnalysis>,
    pub deep_analysis: Option<DeepAnalysis>,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PaperQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub tag: Option<String>,
}

/// Paper parsed from the feed, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaper {
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub published_date: String,
    pub doi: String,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,
}
