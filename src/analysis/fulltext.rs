use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tokio::task;

/// Extracted text must be longer than this to replace title + abstract.
pub const MIN_USABLE_CHARS: usize = 500;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid script pattern"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid style pattern"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
    let without_styles = STYLE_BLOCK.replace_all(&without_scripts, "");
    let text = TAG.replace_all(&without_styles, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

pub fn is_usable(text: &str) -> bool {
    text.chars().count() > MIN_USABLE_CHARS
}

/// Candidate URLs in the order they are tried.
pub fn candidate_urls(source_url: Option<&str>, pdf_url: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(source) = source_url.map(str::trim).filter(|s| !s.is_empty()) {
        candidates.push(format!("{source}.full.pdf+html"));
        candidates.push(format!("{source}.full"));
    }
    if let Some(pdf) = pdf_url.map(str::trim).filter(|s| !s.is_empty()) {
        candidates.push(pdf.to_string());
    }
    candidates
}

/// Returns the first usable text found at the paper's mirrors, or an empty string.
pub async fn fetch_text(http: &reqwest::Client, source_url: Option<&str>, pdf_url: Option<&str>) -> String {
    for url in candidate_urls(source_url, pdf_url) {
        match fetch_candidate(http, &url).await {
            Ok(Some(text)) if is_usable(&text) => {
                tracing::debug!(%url, chars = text.chars().count(), "Using full text");
                return text;
            }
            Ok(_) => {}
            Err(error) => tracing::debug!(%url, "Full text candidate failed: {:#}", error),
        }
    }
    String::new()
}

async fn fetch_candidate(http: &reqwest::Client, url: &str) -> Result<Option<String>, anyhow::Error> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("application/pdf") {
        let bytes = response.bytes().await?;
        let text = task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .context("Join error while parsing PDF")?
            .context("Failed to parse PDF")?;
        let text = WHITESPACE.replace_all(&text, " ").trim().to_string();
        return Ok(Some(text));
    }

    let body = response.text().await?;
    Ok(Some(html_to_text(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script type="text/javascript">var x = "<b>";</script></head>
            <body><h1>Title</h1>
            <p>First   paragraph.</p><SCRIPT>alert(1)</SCRIPT></body></html>"#;
        assert_eq!(html_to_text(html), "Title First paragraph.");
    }

    #[test]
    fn candidates_prefer_html_mirrors() {
        let urls = candidate_urls(Some("https://b/x"), Some("https://b/x.full.pdf"));
        assert_eq!(urls, vec!["https://b/x.full.pdf+html", "https://b/x.full", "https://b/x.full.pdf"]);
        assert!(candidate_urls(None, None).is_empty());
    }

    #[tokio::test]
    async fn first_usable_candidate_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper.full.pdf+html"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paper.full"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(format!("<p>{}</p>", "word ".repeat(200))),
            )
            .mount(&server)
            .await;

        let source = format!("{}/paper", server.uri());
        let text = fetch_text(&reqwest::Client::new(), Some(&source), None).await;
        assert!(is_usable(&text));
        assert!(text.starts_with("word word"));
    }

    #[tokio::test]
    async fn short_pages_are_not_usable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>Access denied</p>"),
            )
            .mount(&server)
            .await;

        let source = format!("{}/paper", server.uri());
        let text = fetch_text(&reqwest::Client::new(), Some(&source), None).await;
        assert_eq!(text, "");
    }
}
