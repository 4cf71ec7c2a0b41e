use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// First-pass translation and summary of a paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperAnalysis {
    pub paper_id: String,
    pub title_cn: Option<String>,
    pub abstract_cn: Option<String>,
    pub main_institutions: Vec<String>,
    pub insights: Option<String>,
    pub solutions: Option<String>,
    pub limitations: Option<String>,
    pub prospects: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct PaperAnalysisRow {
    pub paper_id: String,
    pub title_cn: Option<String>,
    pub abstract_cn: Option<String>,
    pub main_institutions_json: Option<String>,
    pub insights: Option<String>,
    pub solutions: Option<String>,
    pub limitations: Option<String>,
    pub prospects: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl From<PaperAnalysisRow> for PaperAnalysis {
    fn from(row: PaperAnalysisRow) -> Self {
        Self {
            paper_id: row.paper_id,
            title_cn: row.title_cn,
            abstract_cn: row.abstract_cn,
            main_institutions: parse_string_list_json(row.main_institutions_json),
            insights: row.insights,
            solutions: row.solutions,
            limitations: row.limitations,
            prospects: row.prospects,
            analyzed_at: row.analyzed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeepMethods {
    pub overview: String,
    pub key_techniques: Vec<String>,
    pub innovations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeepExperiments {
    pub design: String,
    pub datasets: Vec<String>,
    pub metrics: Vec<String>,
    pub baselines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeepResults {
    pub main_findings: Vec<String>,
    pub performance_gains: Vec<String>,
    pub significance: String,
    pub limitations: Vec<String>,
}

/// Structured second-pass report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeepAnalysis {
    pub paper_id: String,
    pub motivation: String,
    pub insights: Vec<String>,
    pub methods: DeepMethods,
    pub experiments: DeepExperiments,
    pub results: DeepResults,
    pub technical_novelty_score: Option<f64>,
    pub practical_impact_score: Option<f64>,
    pub theoretical_contribution_score: Option<f64>,
    pub confidence_score: Option<f64>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct DeepAnalysisRow {
    pub paper_id: String,
    pub motivation: String,
    pub insights_json: String,
    pub methods_json: String,
    pub experiments_json: String,
    pub results_json: String,
    pub technical_novelty_score: Option<f64>,
    pub practical_impact_score: Option<f64>,
    pub theoretical_contribution_score: Option<f64>,
    pub confidence_score: Option<f64>,
    pub analyzed_at: DateTime<Utc>,
}

impl From<DeepAnalysisRow> for DeepAnalysis {
    fn from(row: DeepAnalysisRow) -> Self {
        Self {
            paper_id: row.paper_id,
            motivation: row.motivation,
            insights: parse_string_list_json(Some(row.insights_json)),
            methods: serde_json::from_str(&row.methods_json).unwrap_or_default(),
            experiments: serde_json::from_str(&row.experiments_json).unwrap_or_default(),
            results: serde_json::from_str(&row.results_json).unwrap_or_default(),
            technical_novelty_score: row.technical_novelty_score,
            practical_impact_score: row.practical_impact_score,
            theoretical_contribution_score: row.theoretical_contribution_score,
            confidence_score: row.confidence_score,
            analyzed_at: row.analyzed_at,
        }
    }
}

/// Request body shared by the deep-analysis endpoint and its UI caller.
#[derive(Debug, Clone, Deserialize)]
pub struct DeepAnalysisRequest {
    #[serde(default, rename = "paperId", alias = "paper_id")]
    pub paper_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

pub fn parse_string_list_json(raw: Option<String>) -> Vec<String> {
    raw.and_then(|json_text| serde_json::from_str::<Vec<String>>(&json_text).ok())
        .unwrap_or_default()
}
