pub const DEEP_SYSTEM_PROMPT: &str = "你是资深学术分析助手。只输出严格JSON。";
pub const BASIC_SYSTEM_PROMPT: &str = "你是专业的生物学论文翻译与分析助手。只输出严格JSON。";

pub fn truncate_chars(input: &str, max_chars: usize) -> (String, bool) {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return (input.to_string(), false);
    }

    let truncated: String = input.chars().take(max_chars).collect();
    (truncated, true)
}

pub fn build_deep_prompt(content: &str) -> String {
    format!(
        r#"请基于以下论文全文或摘要进行深度学术分析，并用JSON严格输出：
【文本】
{}

【输出要求】
{{
  "motivation": "string",
  "insights": ["string", "string"],
  "methods": {{"overview": "string", "key_techniques": ["string"], "innovations": ["string"]}},
  "experiments": {{"design": "string", "datasets": ["string"], "metrics": ["string"], "baselines": ["string"]}},
  "results": {{"main_findings": ["string"], "performance_gains": ["string"], "significance": "string", "limitations": ["string"]}},
  "technical_novelty_score": 0-10,
  "practical_impact_score": 0-10,
  "theoretical_contribution_score": 0-10,
  "confidence_score": 0-10
}}"#,
        content
    )
}

pub fn build_basic_prompt(title: &str, abstract_text: &str, authors: &[String]) -> String {
    format!(
        r#"请将以下bioRxiv论文的标题和摘要翻译为中文，并进行简要分析，用JSON严格输出：
【标题】
{}

【作者】
{}

【摘要】
{}

【输出要求】
{{
  "title_cn": "中文标题",
  "abstract_cn": "中文摘要",
  "main_institutions": ["主要研究机构"],
  "insights": "核心洞见",
  "solutions": "解决的问题与方法",
  "limitations": "局限性",
  "prospects": "应用前景"
}}"#,
        title,
        authors.join(", "),
        abstract_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let (text, truncated) = truncate_chars("蛋白质折叠", 3);
        assert_eq!(text, "蛋白质");
        assert!(truncated);

        let (text, truncated) = truncate_chars("abc", 3);
        assert_eq!(text, "abc");
        assert!(!truncated);
    }

    #[test]
    fn deep_prompt_embeds_content_and_shape() {
        let prompt = build_deep_prompt("FULL TEXT");
        assert!(prompt.contains("【文本】\nFULL TEXT\n"));
        assert!(prompt.contains("\"key_techniques\""));
        assert!(prompt.contains("\"confidence_score\": 0-10"));
    }
}
