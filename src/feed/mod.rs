//! bioRxiv RSS (RDF) ingestion.

use std::sync::LazyLock;

use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::papers::{doi_exists, insert_paper};
use crate::models::NewPaper;

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 500;
const USER_AGENT: &str = "BioRxiv-Daily-Bot/1.0";

static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"doi:(10\.\d{4,}/.+)").expect("valid DOI pattern"));
static AUTHOR_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("valid author separator"));

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to fetch RSS feed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to fetch RSS feed: HTTP {status}")]
    Upstream { status: u16 },
    #[error("Failed to parse RSS feed: {0}")]
    Parse(String),
}

/// One `<item>` of the feed, fields as they appear in the XML.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub date: Option<String>,
    pub identifier: Option<String>,
    pub publication_date: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct IngestedPaper {
    pub id: String,
    pub doi: String,
    pub title: String,
}

#[derive(Debug, Serialize, Default)]
pub struct IngestReport {
    pub total_fetched: usize,
    pub new_papers: Vec<IngestedPaper>,
    pub skipped_existing: usize,
    pub skipped_without_doi: usize,
    pub errors: Vec<String>,
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT)
}

pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(event)) => {
                let name = String::from_utf8_lossy(event.name().as_ref()).into_owned();
                if name == "item" {
                    current = Some(FeedItem::default());
                } else if current.is_some() {
                    field = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Text(event)) => {
                if field.is_some() {
                    match event.unescape() {
                        Ok(decoded) => text.push_str(&decoded),
                        Err(_) => text.push_str(&String::from_utf8_lossy(&event)),
                    }
                }
            }
            Ok(Event::CData(event)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&event));
                }
            }
            Ok(Event::End(event)) => {
                let name = String::from_utf8_lossy(event.name().as_ref()).into_owned();
                if name == "item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                    field = None;
                } else if let (Some(item), Some(open)) = (current.as_mut(), field.as_deref()) {
                    if open == name {
                        let value = Some(std::mem::take(&mut text));
                        match open {
                            "title" => item.title = value,
                            "link" => item.link = value,
                            "description" => item.description = value,
                            "dc:creator" => item.creator = value,
                            "dc:date" => item.date = value,
                            "dc:identifier" => item.identifier = value,
                            "prism:publicationDate" => item.publication_date = value,
                            _ => {}
                        }
                        field = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                return Err(IngestError::Parse(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    error
                )));
            }
        }
    }

    Ok(items)
}

pub fn extract_doi(identifier: &str) -> Option<String> {
    DOI_PATTERN
        .captures(identifier)
        .and_then(|captures| captures.get(1))
        .map(|doi| doi.as_str().trim().to_string())
}

pub fn pdf_url_for(link: &str) -> String {
    match link.strip_suffix("?rss=1") {
        Some(base) => format!("{base}.full.pdf"),
        None => link.to_string(),
    }
}

pub fn split_authors(creator: &str) -> Vec<String> {
    AUTHOR_SPLIT
        .split(creator)
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .map(str::to_string)
        .collect()
}

/// Maps a feed item to a storable paper. Items without a DOI yield `None`.
pub fn to_new_paper(item: &FeedItem, today: &str) -> Option<NewPaper> {
    let doi = item.identifier.as_deref().and_then(extract_doi)?;

    let title = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Untitled")
        .to_string();

    let published_date = item
        .date
        .as_deref()
        .or(item.publication_date.as_deref())
        .map(str::trim)
        .filter(|date| !date.is_empty())
        .map(|date| date.split('T').next().unwrap_or(date).to_string())
        .unwrap_or_else(|| today.to_string());

    let link = item.link.as_deref().map(str::trim).filter(|link| !link.is_empty());

    Some(NewPaper {
        title,
        authors: item.creator.as_deref().map(split_authors).unwrap_or_default(),
        abstract_text: item.description.as_deref().map(|d| d.trim().to_string()),
        published_date,
        doi,
        source_url: link.map(str::to_string),
        pdf_url: link.map(pdf_url_for),
    })
}

fn feed_request_url(feed_url: &str, timestamp: i64) -> String {
    let separator = if feed_url.contains('?') { '&' } else { '?' };
    format!("{feed_url}{separator}timestamp={timestamp}")
}

/// Fetches the feed and stores every item whose DOI is not known yet.
///
/// Transport and HTTP failures abort the run. Per-item storage failures are
/// collected in [`IngestReport::errors`] and the remaining items are still processed.
pub async fn ingest(
    pool: &SqlitePool,
    http: &reqwest::Client,
    feed_url: &str,
    limit: usize,
    timestamp: Option<i64>,
) -> Result<IngestReport, IngestError> {
    let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
    let url = feed_request_url(feed_url, timestamp);
    tracing::info!(limit, %url, "Fetching bioRxiv feed");

    let response = http
        .get(&url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::ACCEPT, "application/xml, text/xml, */*")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Upstream {
            status: status.as_u16(),
        });
    }

    let xml = response.text().await?;
    let items = parse_feed(&xml)?;
    tracing::info!(parsed = items.len(), "Parsed feed items");

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut report = IngestReport::default();

    for item in items.iter().take(limit) {
        report.total_fetched += 1;

        let Some(paper) = to_new_paper(item, &today) else {
            tracing::warn!(identifier = ?item.identifier, "Skipping feed item without DOI");
            report.skipped_without_doi += 1;
            continue;
        };

        match doi_exists(pool, &paper.doi).await {
            Ok(true) => {
                report.skipped_existing += 1;
                continue;
            }
            Ok(false) => {}
            Err(error) => {
                tracing::error!(doi = %paper.doi, "DOI lookup failed: {}", error);
                report.errors.push(format!("{}: {}", paper.doi, error));
                continue;
            }
        }

        match insert_paper(pool, &paper).await {
            Ok(Some(id)) => {
                tracing::debug!(doi = %paper.doi, %id, "Stored new paper");
                report.new_papers.push(IngestedPaper {
                    id,
                    doi: paper.doi,
                    title: paper.title,
                });
            }
            Ok(None) => report.skipped_existing += 1,
            Err(error) => {
                tracing::error!(doi = %paper.doi, "Paper insert failed: {}", error);
                report.errors.push(format!("{}: {}", paper.doi, error));
            }
        }
    }

    tracing::info!(
        fetched = report.total_fetched,
        new = report.new_papers.len(),
        errors = report.errors.len(),
        "Feed ingestion finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/"
         xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/">
  <channel rdf:about="http://biorxiv.org">
    <title>bioRxiv Channel</title>
    <link>http://biorxiv.org</link>
  </channel>
  <item rdf:about="https://www.biorxiv.org/content/10.1101/2024.05.01.591234v1?rss=1">
    <title>  Protein folding &amp; dynamics </title>
    <link>https://www.biorxiv.org/content/10.1101/2024.05.01.591234v1?rss=1</link>
    <description><![CDATA[We study <b>folding</b>.]]></description>
    <dc:creator>Smith, J., Doe, A. ,  Lee, K.</dc:creator>
    <dc:date>2024-05-03</dc:date>
    <dc:identifier>doi:10.1101/2024.05.01.591234</dc:identifier>
    <prism:publicationDate>2024-05-04</prism:publicationDate>
  </item>
  <item rdf:about="https://www.biorxiv.org/content/no-doi">
    <title>No identifier here</title>
    <link>https://www.biorxiv.org/content/no-doi?rss=1</link>
    <dc:identifier>urn:something-else</dc:identifier>
  </item>
  <item rdf:about="https://www.biorxiv.org/content/10.1101/2024.05.02.000002v1?rss=1">
    <title></title>
    <link>https://www.biorxiv.org/content/10.1101/2024.05.02.000002v1?rss=1</link>
    <dc:identifier>doi:10.1101/2024.05.02.000002</dc:identifier>
    <prism:publicationDate>2024-05-02</prism:publicationDate>
  </item>
</rdf:RDF>"#;

    #[test]
    fn parses_rdf_items_and_ignores_channel_fields() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title.as_deref(), Some("Protein folding & dynamics"));
        assert_eq!(items[0].description.as_deref(), Some("We study <b>folding</b>."));
        assert_eq!(items[0].identifier.as_deref(), Some("doi:10.1101/2024.05.01.591234"));
        assert_eq!(items[2].publication_date.as_deref(), Some("2024-05-02"));
    }

    #[test]
    fn maps_item_fields_to_paper() {
        let items = parse_feed(FEED).unwrap();

        let paper = to_new_paper(&items[0], "2030-01-01").unwrap();
        assert_eq!(paper.doi, "10.1101/2024.05.01.591234");
        assert_eq!(paper.authors, vec!["Smith", "J.", "Doe", "A.", "Lee", "K."]);
        assert_eq!(paper.published_date, "2024-05-03");
        assert_eq!(
            paper.pdf_url.as_deref(),
            Some("https://www.biorxiv.org/content/10.1101/2024.05.01.591234v1.full.pdf")
        );

        assert!(to_new_paper(&items[1], "2030-01-01").is_none());

        let untitled = to_new_paper(&items[2], "2030-01-01").unwrap();
        assert_eq!(untitled.title, "Untitled");
        assert_eq!(untitled.published_date, "2024-05-02");
        assert!(untitled.authors.is_empty());
    }

    #[test]
    fn pdf_url_only_rewrites_rss_suffix() {
        assert_eq!(pdf_url_for("https://x/a?rss=1"), "https://x/a.full.pdf");
        assert_eq!(pdf_url_for("https://x/a"), "https://x/a");
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_FEED_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_FEED_LIMIT);
    }

    #[tokio::test]
    async fn ingest_skips_missing_doi_and_existing_papers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/biorxiv_xml.php"))
            .and(query_param("timestamp", "42"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(2)
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        let http = reqwest::Client::new();
        let feed_url = format!("{}/biorxiv_xml.php?subject=all", server.uri());

        let first = ingest(&pool, &http, &feed_url, 20, Some(42)).await.unwrap();
        assert_eq!(first.total_fetched, 3);
        assert_eq!(first.new_papers.len(), 2);
        assert_eq!(first.skipped_without_doi, 1);
        assert!(first.errors.is_empty());

        let second = ingest(&pool, &http, &feed_url, 20, Some(42)).await.unwrap();
        assert!(second.new_papers.is_empty());
        assert_eq!(second.skipped_existing, 2);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM papers")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn failed_insert_is_reported_and_later_items_still_land() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_first_doi BEFORE INSERT ON papers
            WHEN NEW.doi = '10.1101/2024.05.01.591234'
            BEGIN
                SELECT RAISE(ABORT, 'disk full');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = ingest(&pool, &reqwest::Client::new(), &server.uri(), 20, Some(7))
            .await
            .unwrap();
        assert_eq!(report.total_fetched, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("10.1101/2024.05.01.591234: "));
        assert!(report.errors[0].contains("disk full"));
        assert_eq!(report.new_papers.len(), 1);
        assert_eq!(report.new_papers[0].doi, "10.1101/2024.05.02.000002");

        let stored: Vec<(String,)> = sqlx::query_as("SELECT doi FROM papers")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(stored, vec![("10.1101/2024.05.02.000002".to_string(),)]);
    }

    #[tokio::test]
    async fn ingest_respects_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        let report = ingest(&pool, &reqwest::Client::new(), &server.uri(), 1, Some(1))
            .await
            .unwrap();
        assert_eq!(report.total_fetched, 1);
        assert_eq!(report.new_papers.len(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_aborts_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let pool = memory_pool().await;
        let error = ingest(&pool, &reqwest::Client::new(), &server.uri(), 20, None)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Upstream { status: 503 }));
    }
}
