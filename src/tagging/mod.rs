//! Topic tags: model extraction followed by keyword canonicalization.

use std::sync::LazyLock;

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::analysis::AnalysisError;
use crate::analysis::prompt::truncate_chars;
use crate::llm::{ChatModel, ChatRequest, extract_json_array};

pub const MAX_TAGS: usize = 5;
pub const MAX_TAG_CHARS: usize = 6;
pub const TAG_INPUT_CHARS: usize = 4_000;

const TAG_SYSTEM_PROMPT: &str = "只输出严格JSON数组，如[\"标签1\",\"标签2\"]。";

/// Canonical label and the case-insensitive pattern that maps onto it.
/// Rules are tried in order; the first match wins. Short latin keywords are
/// bounded by non-alphanumerics rather than `\b`, which would treat CJK
/// neighbours as word characters.
pub const TAG_RULES: &[(&str, &str)] = &[
    ("人工智能", r"人工智能|(?:^|[^a-z0-9_])ai(?:[^a-z0-9_]|$)|深度学习|机器学习|神经网络|machine learning|deep learning"),
    ("蛋白质", r"蛋白质|蛋白\b|protein"),
    ("免疫", r"免疫|t细胞|b细胞|抗体|免疫治疗|immun|t[- ]?cell|antibod"),
    ("CRISPR", r"crispr|cas9|基因编辑|(?:^|[^a-z0-9_])cas(?:[^a-z0-9_]|$)|gene editing"),
    ("塑料降解", r"塑料降解|聚合物降解|pet降解|微塑料|plastic"),
    ("癌症", r"肿瘤|癌|癌症|癌基因|肿瘤微环境|cancer|tumou?r|oncolog"),
    ("神经科学", r"神经|大脑|脑|神经元|认知|neuro|(?:^|[^a-z0-9_])brain(?:[^a-z0-9_]|$)"),
    ("微生物组", r"微生物组|肠道菌群|microbiome|菌群"),
    ("遗传学", r"遗传|基因|基因组|基因变异|群体遗传|genetic|genom"),
    ("材料", r"材料|生物材料|纳米材料|高分子|material"),
    ("生物信息学", r"生物信息|计算生物|bioinformatics"),
    ("合成生物学", r"合成生物|synthetic biology"),
    ("代谢", r"代谢|代谢通路|代谢组|metabol"),
    ("药物发现", r"药物|药物发现|药物筛选|新药|drug"),
];

pub struct TagCanonicalizer {
    rules: Vec<(String, Regex)>,
}

impl TagCanonicalizer {
    pub fn new(rules: &[(&str, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(label, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| (label.to_string(), regex))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Maps one raw phrase to its canonical label, or to its first six characters.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let phrase = raw.trim();
        if phrase.is_empty() {
            return None;
        }
        if let Some((label, _)) = self.rules.iter().find(|(_, regex)| regex.is_match(phrase)) {
            return Some(label.clone());
        }
        Some(truncate_chars(phrase, MAX_TAG_CHARS).0)
    }

    /// Canonicalizes, dedups in first-seen order and keeps at most [`MAX_TAGS`].
    pub fn canonicalize_all<S: AsRef<str>>(&self, raw: &[S]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for phrase in raw {
            let Some(tag) = self.canonicalize(phrase.as_ref()) else {
                continue;
            };
            if !tags.contains(&tag) {
                tags.push(tag);
            }
            if tags.len() >= MAX_TAGS {
                break;
            }
        }
        tags
    }
}

static CANONICALIZER: LazyLock<TagCanonicalizer> =
    LazyLock::new(|| TagCanonicalizer::new(TAG_RULES).expect("tag rule table compiles"));

pub fn canonicalizer() -> &'static TagCanonicalizer {
    &CANONICALIZER
}

fn build_tag_prompt(text: &str) -> String {
    format!(
        "请基于以下论文标题与摘要，生成3-5个“泛化一级主题标签”的中文短语。\n\
         严格要求：\n\
         1) 标签要偏“学科/领域/对象/场景”的上位词，如“人工智能”“蛋白质”“免疫”“CRISPR”“塑料降解”“癌症”“神经科学”“微生物组”“材料”等；\n\
         2) 避免过细的技术词或具体分子名，必要时向上归纳；\n\
         3) 每个标签不超过6个字；\n\
         4) 仅输出标签数组(JSON array)，不要任何解释；\n\
         5) 去除重复与同义近词。\n\
         【文本】\n{}",
        text
    )
}

/// Asks the model for topic phrases and returns at most five canonical tags.
pub async fn extract_tags(
    llm: &dyn ChatModel,
    title: &str,
    abstract_text: &str,
) -> Result<Vec<String>, AnalysisError> {
    let (text, _) = truncate_chars(&format!("{}\n\n{}", title, abstract_text), TAG_INPUT_CHARS);
    let request = ChatRequest::new("extract-tags", TAG_SYSTEM_PROMPT, build_tag_prompt(&text));

    let reply = llm.complete(&request).await?;
    let parsed = extract_json_array(&reply.content)?;
    let phrases: Vec<&str> = parsed
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let tags = canonicalizer().canonicalize_all(&phrases);
    if tags.is_empty() {
        return Err(AnalysisError::NoTags);
    }
    Ok(tags)
}

/// Replaces every tag association of a paper, creating tag rows as needed.
pub async fn replace_paper_tags(
    pool: &SqlitePool,
    paper_id: &str,
    tags: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM paper_tags WHERE paper_id = ?")
        .bind(paper_id)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    for name in tags {
        sqlx::query("INSERT OR IGNORE INTO tags (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let (tag_id,): (i64,) = sqlx::query_as("SELECT id FROM tags WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO paper_tags (paper_id, tag_id) VALUES (?, ?)")
            .bind(paper_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}
