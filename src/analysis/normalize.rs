//! Cleanup of model-produced analysis JSON before it is stored.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{DeepAnalysis, DeepExperiments, DeepMethods, DeepResults, PaperAnalysis};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Per-field caps. Item counts for lists, character counts for strings.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationLimits {
    pub long_text_chars: usize,
    pub significance_chars: usize,
    pub list_item_chars: usize,
    pub insights: usize,
    pub key_techniques: usize,
    pub innovations: usize,
    pub datasets: usize,
    pub metrics: usize,
    pub baselines: usize,
    pub main_findings: usize,
    pub performance_gains: usize,
    pub limitations: usize,
    pub institutions: usize,
}

impl Default for NormalizationLimits {
    fn default() -> Self {
        Self {
            long_text_chars: 800,
            significance_chars: 500,
            list_item_chars: 300,
            insights: 6,
            key_techniques: 5,
            innovations: 4,
            datasets: 5,
            metrics: 5,
            baselines: 4,
            main_findings: 5,
            performance_gains: 4,
            limitations: 3,
            institutions: 5,
        }
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        input
    } else {
        input.chars().take(max_chars).collect()
    }
}

/// Collapses whitespace and caps length. Non-string scalars are stringified.
pub fn normalize_text(value: Option<&Value>, max_chars: usize) -> String {
    let raw = match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    };
    cap_chars(collapse_whitespace(&raw), max_chars)
}

fn optional_text(value: Option<&Value>, max_chars: usize) -> Option<String> {
    Some(normalize_text(value, max_chars)).filter(|text| !text.is_empty())
}

/// Normalizes each item, drops empties, dedups by exact equality keeping the
/// first occurrence, and keeps at most `max_items`.
///
/// A bare string is treated as a one-element list.
pub fn normalize_list(value: Option<&Value>, max_items: usize, max_item_chars: usize) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::String(_)) => vec![single],
        _ => Vec::new(),
    };

    let mut output: Vec<String> = Vec::new();
    for item in items {
        if output.len() >= max_items {
            break;
        }
        let text = normalize_text(Some(item), max_item_chars);
        if text.is_empty() || output.contains(&text) {
            continue;
        }
        output.push(text);
    }
    output
}

/// Accepts a number or numeric string and clamps it into `0..=10`.
pub fn normalize_score(value: Option<&Value>) -> Option<f64> {
    let score = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    score
        .is_finite()
        .then(|| score.clamp(SCORE_MIN, SCORE_MAX))
}

fn field<'a>(parent: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    parent.and_then(|value| value.get(key))
}

pub fn normalize_deep_analysis(
    paper_id: &str,
    raw: &Value,
    limits: &NormalizationLimits,
    analyzed_at: DateTime<Utc>,
) -> DeepAnalysis {
    let item_chars = limits.list_item_chars;
    let methods = raw.get("methods");
    let experiments = raw.get("experiments");
    let results = raw.get("results");

    DeepAnalysis {
        paper_id: paper_id.to_string(),
        motivation: normalize_text(raw.get("motivation"), limits.long_text_chars),
        insights: normalize_list(raw.get("insights"), limits.insights, item_chars),
        methods: DeepMethods {
            overview: normalize_text(field(methods, "overview"), limits.long_text_chars),
            key_techniques: normalize_list(
                field(methods, "key_techniques"),
                limits.key_techniques,
                item_chars,
            ),
            innovations: normalize_list(
                field(methods, "innovations"),
                limits.innovations,
                item_chars,
            ),
        },
        experiments: DeepExperiments {
            design: normalize_text(field(experiments, "design"), limits.long_text_chars),
            datasets: normalize_list(
                field(experiments, "datasets"),
                limits.datasets,
                item_chars,
            ),
            metrics: normalize_list(field(experiments, "metrics"), limits.metrics, item_chars),
            baselines: normalize_list(
                field(experiments, "baselines"),
                limits.baselines,
                item_chars,
            ),
        },
        results: DeepResults {
            main_findings: normalize_list(
                field(results, "main_findings"),
                limits.main_findings,
                item_chars,
            ),
            performance_gains: normalize_list(
                field(results, "performance_gains"),
                limits.performance_gains,
                item_chars,
            ),
            significance: normalize_text(
                field(results, "significance"),
                limits.significance_chars,
            ),
            limitations: normalize_list(
                field(results, "limitations"),
                limits.limitations,
                item_chars,
            ),
        },
        technical_novelty_score: normalize_score(raw.get("technical_novelty_score")),
        practical_impact_score: normalize_score(raw.get("practical_impact_score")),
        theoretical_contribution_score: normalize_score(raw.get("theoretical_contribution_score")),
        confidence_score: normalize_score(raw.get("confidence_score")),
        analyzed_at,
    }
}

pub fn normalize_basic_analysis(
    paper_id: &str,
    raw: &Value,
    limits: &NormalizationLimits,
    analyzed_at: DateTime<Utc>,
) -> PaperAnalysis {
    // Free-text sections have no fixed cap beyond what the model was asked for.
    let unbounded = usize::MAX;
    PaperAnalysis {
        paper_id: paper_id.to_string(),
        title_cn: optional_text(raw.get("title_cn"), unbounded),
        abstract_cn: optional_text(raw.get("abstract_cn"), unbounded),
        main_institutions: normalize_list(
            raw.get("main_institutions"),
            limits.institutions,
            limits.list_item_chars,
        ),
        insights: optional_text(raw.get("insights"), unbounded),
        solutions: optional_text(raw.get("solutions"), unbounded),
        limitations: optional_text(raw.get("limitations"), unbounded),
        prospects: optional_text(raw.get("prospects"), unbounded),
        analyzed_at,
    }
}
