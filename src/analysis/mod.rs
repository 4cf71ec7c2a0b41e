//! Paper analysis pipeline: prompt, model call, JSON extraction, normalization, persistence.

pub mod fulltext;
pub mod normalize;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::batch::PaperAnalyzer;
use crate::config::budget_chars;
use crate::db::papers::fetch_paper;
use crate::llm::{ChatModel, ChatRequest, LlmError, extract_json_object};
use crate::models::{DeepAnalysis, DeepAnalysisRequest, PaperAnalysis};
use crate::tagging::{extract_tags, replace_paper_tags};

use normalize::{NormalizationLimits, normalize_basic_analysis, normalize_deep_analysis};
use prompt::{BASIC_SYSTEM_PROMPT, DEEP_SYSTEM_PROMPT, build_basic_prompt, build_deep_prompt, truncate_chars};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Paper not found: {0}")]
    PaperNotFound(String),
    #[error("model returned no tags")]
    NoTags,
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Runs the model-backed analyses. Cheap to clone.
#[derive(Clone)]
pub struct Analyzer {
    pool: SqlitePool,
    http: reqwest::Client,
    llm: Arc<dyn ChatModel>,
    max_input_chars: usize,
    limits: NormalizationLimits,
}

impl Analyzer {
    pub fn new(
        pool: SqlitePool,
        http: reqwest::Client,
        llm: Arc<dyn ChatModel>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            pool,
            http,
            llm,
            max_input_chars: budget_chars(max_input_chars),
            limits: NormalizationLimits::default(),
        }
    }

    /// First-pass translation and summary of a stored paper, followed by tagging.
    pub async fn analyze_paper(&self, paper_id: &str) -> Result<PaperAnalysis, AnalysisError> {
        let paper = fetch_paper(&self.pool, paper_id)
            .await?
            .ok_or_else(|| AnalysisError::PaperNotFound(paper_id.to_string()))?;

        let abstract_text = paper.abstract_text.as_deref().unwrap_or("");
        let (abstract_text, truncated) = truncate_chars(abstract_text, self.max_input_chars);
        if truncated {
            tracing::debug!(paper_id, "Abstract truncated for analysis prompt");
        }

        let request = ChatRequest::new(
            "analyze-paper",
            BASIC_SYSTEM_PROMPT,
            build_basic_prompt(&paper.title, &abstract_text, &paper.authors),
        );
        let reply = self.llm.complete(&request).await?;
        let raw = extract_json_object(&reply.content)?;
        let analysis = normalize_basic_analysis(paper_id, &raw, &self.limits, Utc::now());

        if let Err(error) = upsert_analysis(&self.pool, &analysis).await {
            tracing::warn!(paper_id, "Failed to store analysis: {}", error);
        }

        match extract_tags(self.llm.as_ref(), &paper.title, paper.abstract_text.as_deref().unwrap_or("")).await {
            Ok(tags) => {
                if let Err(error) = replace_paper_tags(&self.pool, paper_id, &tags).await {
                    tracing::warn!(paper_id, "Failed to store tags: {}", error);
                }
            }
            Err(error) => tracing::warn!(paper_id, "Tag extraction failed: {}", error),
        }

        Ok(analysis)
    }

    /// Structured second-pass report. Prefers full text, falls back to title and abstract.
    pub async fn deep_analyze(&self, input: &DeepAnalysisRequest) -> Result<DeepAnalysis, AnalysisError> {
        let stored = fetch_paper(&self.pool, &input.paper_id).await.unwrap_or_else(|error| {
            tracing::warn!(paper_id = %input.paper_id, "Paper lookup failed: {}", error);
            None
        });

        let pick = |given: &Option<String>, fallback: Option<&String>| -> Option<String> {
            given
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .or_else(|| fallback.cloned())
        };
        let title = pick(&input.title, stored.as_ref().map(|p| &p.title)).unwrap_or_default();
        let abstract_text =
            pick(&input.abstract_text, stored.as_ref().and_then(|p| p.abstract_text.as_ref()))
                .unwrap_or_default();
        let source_url = pick(&input.source_url, stored.as_ref().and_then(|p| p.source_url.as_ref()));
        let pdf_url = pick(&input.pdf_url, stored.as_ref().and_then(|p| p.pdf_url.as_ref()));

        let text = fulltext::fetch_text(&self.http, source_url.as_deref(), pdf_url.as_deref()).await;
        let content = if fulltext::is_usable(&text) {
            text
        } else {
            format!("{}\n\n{}", title, abstract_text)
        };
        let (content, truncated) = truncate_chars(&content, self.max_input_chars);
        tracing::info!(
            paper_id = %input.paper_id,
            chars = content.chars().count(),
            truncated,
            "Running deep analysis"
        );

        let request = ChatRequest::new("deep-analysis", DEEP_SYSTEM_PROMPT, build_deep_prompt(&content));
        let reply = self.llm.complete(&request).await?;
        let raw = extract_json_object(&reply.content)?;
        let analysis = normalize_deep_analysis(&input.paper_id, &raw, &self.limits, Utc::now());

        if let Err(error) = upsert_deep_analysis(&self.pool, &analysis).await {
            tracing::warn!(paper_id = %input.paper_id, "Failed to store deep analysis: {}", error);
        }

        Ok(analysis)
    }

    /// Tags for arbitrary text, nothing stored.
    pub async fn suggest_tags(&self, title: &str, abstract_text: &str) -> Result<Vec<String>, AnalysisError> {
        extract_tags(self.llm.as_ref(), title, abstract_text).await
    }
}

#[async_trait]
impl PaperAnalyzer for Analyzer {
    async fn analyze(&self, paper_id: &str) -> Result<(), String> {
        self.analyze_paper(paper_id)
            .await
            .map(|_| ())
            .map_err(|error| error.to_string())
    }
}

pub async fn upsert_analysis(pool: &SqlitePool, analysis: &PaperAnalysis) -> Result<(), sqlx::Error> {
    let institutions =
        serde_json::to_string(&analysis.main_institutions).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO paper_analysis (
            paper_id, title_cn, abstract_cn, main_institutions_json, insights, solutions,
            limitations, prospects, analyzed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(paper_id) DO UPDATE SET
            title_cn = excluded.title_cn,
            abstract_cn = excluded.abstract_cn,
            main_institutions_json = excluded.main_institutions_json,
            insights = excluded.insights,
            solutions = excluded.solutions,
            limitations = excluded.limitations,
            prospects = excluded.prospects,
            analyzed_at = excluded.analyzed_at
        "#,
    )
    .bind(&analysis.paper_id)
    .bind(&analysis.title_cn)
    .bind(&analysis.abstract_cn)
    .bind(&institutions)
    .bind(&analysis.insights)
    .bind(&analysis.solutions)
    .bind(&analysis.limitations)
    .bind(&analysis.prospects)
    .bind(analysis.analyzed_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_deep_analysis(pool: &SqlitePool, analysis: &DeepAnalysis) -> Result<(), sqlx::Error> {
    let to_json = |value: serde_json::Result<String>| value.unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        r#"
        INSERT INTO paper_deep_analysis (
            paper_id, motivation, insights_json, methods_json, experiments_json, results_json,
            technical_novelty_score, practical_impact_score, theoretical_contribution_score,
            confidence_score, analysis_status, analyzed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?)
        ON CONFLICT(paper_id) DO UPDATE SET
            motivation = excluded.motivation,
            insights_json = excluded.insights_json,
            methods_json = excluded.methods_json,
            experiments_json = excluded.experiments_json,
            results_json = excluded.results_json,
            technical_novelty_score = excluded.technical_novelty_score,
            practical_impact_score = excluded.practical_impact_score,
            theoretical_contribution_score = excluded.theoretical_contribution_score,
            confidence_score = excluded.confidence_score,
            analysis_status = excluded.analysis_status,
            analyzed_at = excluded.analyzed_at
        "#,
    )
    .bind(&analysis.paper_id)
    .bind(&analysis.motivation)
    .bind(to_json(serde_json::to_string(&analysis.insights)))
    .bind(to_json(serde_json::to_string(&analysis.methods)))
    .bind(to_json(serde_json::to_string(&analysis.experiments)))
    .bind(to_json(serde_json::to_string(&analysis.results)))
    .bind(analysis.technical_novelty_score)
    .bind(analysis.practical_impact_score)
    .bind(analysis.theoretical_contribution_score)
    .bind(analysis.confidence_score)
    .bind(analysis.analyzed_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::db::papers::{fetch_analysis, fetch_deep_analysis, fetch_tags, insert_paper, sample_paper};
    use crate::llm::testing::ScriptedModel;

    const DEEP_JSON: &str = r#"{
        "motivation": "Understand   folding",
        "insights": ["a", "a", "b"],
        "methods": {"overview": "MD simulation", "key_techniques": ["MD"], "innovations": []},
        "experiments": {"design": "in silico", "datasets": ["PDB"], "metrics": ["RMSD"], "baselines": []},
        "results": {"main_findings": ["faster"], "performance_gains": [], "significance": "high", "limitations": []},
        "technical_novelty_score": 8,
        "practical_impact_score": 14,
        "theoretical_contribution_score": "5",
        "confidence_score": null
    }"#;

    fn analyzer(pool: &SqlitePool, model: Arc<ScriptedModel>) -> Analyzer {
        Analyzer::new(pool.clone(), reqwest::Client::new(), model, 24_000)
    }

    fn deep_request(paper_id: &str) -> DeepAnalysisRequest {
        DeepAnalysisRequest {
            paper_id: paper_id.to_string(),
            title: Some("Folding".into()),
            abstract_text: Some("We fold proteins.".into()),
            source_url: None,
            pdf_url: None,
        }
    }

    async fn stored_paper(pool: &SqlitePool) -> String {
        let mut paper = sample_paper("10.1101/deep", "2024-03-01");
        paper.source_url = None;
        paper.pdf_url = None;
        insert_paper(pool, &paper).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn prose_wrapped_json_normalizes_like_clean_json() {
        let pool = memory_pool().await;
        let paper_id = stored_paper(&pool).await;

        let clean = Arc::new(ScriptedModel::replies([DEEP_JSON]));
        let wrapped = Arc::new(ScriptedModel::replies([format!(
            "Here is the analysis you asked for:\n```json\n{}\n```\nThanks!",
            DEEP_JSON
        )]));

        let a = analyzer(&pool, clean).deep_analyze(&deep_request(&paper_id)).await.unwrap();
        let b = analyzer(&pool, wrapped).deep_analyze(&deep_request(&paper_id)).await.unwrap();

        assert_eq!(a.motivation, "Understand folding");
        assert_eq!(a.insights, vec!["a", "b"]);
        assert_eq!(a.practical_impact_score, Some(10.0));
        assert_eq!(a.theoretical_contribution_score, Some(5.0));
        assert_eq!(a.confidence_score, None);
        assert_eq!(a.insights, b.insights);
        assert_eq!(a.methods, b.methods);
        assert_eq!(a.experiments, b.experiments);
        assert_eq!(a.results, b.results);

        let stored = fetch_deep_analysis(&pool, &paper_id).await.unwrap().unwrap();
        assert_eq!(stored.methods.key_techniques, vec!["MD"]);
        assert_eq!(stored.technical_novelty_score, Some(8.0));
    }

    #[tokio::test]
    async fn falls_back_to_title_and_abstract_without_full_text() {
        let pool = memory_pool().await;
        let paper_id = stored_paper(&pool).await;
        let model = Arc::new(ScriptedModel::replies([DEEP_JSON]));

        analyzer(&pool, model.clone())
            .deep_analyze(&deep_request(&paper_id))
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, DEEP_SYSTEM_PROMPT);
        assert!(requests[0].user.contains("【文本】\nFolding\n\nWe fold proteins.\n"));
    }

    #[tokio::test]
    async fn invalid_output_persists_nothing() {
        let pool = memory_pool().await;
        let paper_id = stored_paper(&pool).await;
        let model = Arc::new(ScriptedModel::replies(["I cannot help with that."]));

        let error = analyzer(&pool, model)
            .deep_analyze(&deep_request(&paper_id))
            .await
            .unwrap_err();

        assert!(matches!(error, AnalysisError::Llm(LlmError::InvalidJson)));
        assert!(fetch_deep_analysis(&pool, &paper_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failure_does_not_hide_the_result() {
        let pool = memory_pool().await;
        let model = Arc::new(ScriptedModel::replies([DEEP_JSON]));

        // No such paper: the foreign key rejects the row.
        let analysis = analyzer(&pool, model)
            .deep_analyze(&deep_request("missing-paper"))
            .await
            .unwrap();

        assert_eq!(analysis.paper_id, "missing-paper");
        assert!(fetch_deep_analysis(&pool, "missing-paper").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn basic_analysis_stores_result_and_tags() {
        let pool = memory_pool().await;
        let paper_id = stored_paper(&pool).await;
        let model = Arc::new(ScriptedModel::replies([
            r#"{"title_cn": "蛋白质折叠", "abstract_cn": "我们折叠蛋白质。", "main_institutions": ["MIT", "MIT"], "insights": "x"}"#,
            r#"["蛋白质结构", "分子动力学"]"#,
        ]));

        let analysis = analyzer(&pool, model.clone()).analyze_paper(&paper_id).await.unwrap();
        assert_eq!(analysis.main_institutions, vec!["MIT"]);

        let stored = fetch_analysis(&pool, &paper_id).await.unwrap().unwrap();
        assert_eq!(stored.title_cn.as_deref(), Some("蛋白质折叠"));
        assert_eq!(fetch_tags(&pool, &paper_id).await.unwrap(), vec!["分子动力学", "蛋白质"]);

        let functions: Vec<_> = model.requests().iter().map(|r| r.function).collect();
        assert_eq!(functions, vec!["analyze-paper", "extract-tags"]);
    }

    #[tokio::test]
    async fn tag_failure_does_not_fail_basic_analysis() {
        let pool = memory_pool().await;
        let paper_id = stored_paper(&pool).await;
        let model = Arc::new(ScriptedModel::replies([r#"{"title_cn": "标题"}"#, "no tags"]));

        analyzer(&pool, model).analyze_paper(&paper_id).await.unwrap();
        assert!(fetch_tags(&pool, &paper_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_paper_is_reported() {
        let pool = memory_pool().await;
        let model = Arc::new(ScriptedModel::replies(Vec::<String>::new()));
        let error = analyzer(&pool, model).analyze_paper("nope").await.unwrap_err();
        assert!(matches!(error, AnalysisError::PaperNotFound(_)));
    }
}
