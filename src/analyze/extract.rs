// src/analyze/extract.rs
//! Structured-extraction contract: prompt construction and strict validation of the
//! `{artist, summary, keywords, vibe}` JSON the LLM must return.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;

use super::llm::ChatMessage;
use crate::error::{PipelineError, Result};
use crate::model::Vibe;

pub const MAX_KEYWORDS: usize = 5;

const SCHEMA_HINT: &str = r##"Return JSON ONLY: {"artist": "string", "summary": "1 sentence cyberpunk vibe", "keywords": ["#tag1", "#tag2", "#tag3"], "vibe": {"excitement": 0, "shock": 0, "sadness": 0}}"##;

/// Validated extraction result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPayload {
    pub artist: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub vibe: Vibe,
}

/// Request for one staged candidate. The headline alone is enough; a snippet only adds context.
pub fn extraction_messages(title: &str, snippet: &str) -> Vec<ChatMessage> {
    let mut prompt = format!("Analyze this K-POP news: \"{}\".", title.trim());
    if !snippet.trim().is_empty() {
        prompt.push_str(&format!("\nContext: \"{}\".", snippet.trim()));
    }
    prompt.push('\n');
    prompt.push_str(SCHEMA_HINT);
    prompt.push_str("\nEach vibe value is an independent intensity from 0 to 100.");
    vec![ChatMessage::user(prompt)]
}

/// Request for an ad hoc subject: summarize the combined search snippets.
pub fn on_demand_messages(subject: &str, combined_snippets: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Summarize K-Pop news. Be witty and concise. {SCHEMA_HINT}"
        )),
        ChatMessage::user(format!(
            "Summarize news about {}:\n{}",
            subject.trim(),
            combined_snippets
        )),
    ]
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // drop the info string; it may run straight into the body on one line
    let body = rest
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// `"K pop!"` → `#Kpop`. Returns `None` for tags with nothing left.
pub fn normalize_hashtag(raw: &str) -> Option<String> {
    static RE_JUNK: OnceCell<Regex> = OnceCell::new();
    let re = RE_JUNK.get_or_init(|| Regex::new(r"[\s#,.;:!?\x22']+").unwrap());
    let body = re.replace_all(raw.trim(), "");
    if body.is_empty() {
        None
    } else {
        Some(format!("#{body}"))
    }
}

fn required_text(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(PipelineError::ExtractionParse(format!(
            "`{field}` must be a non-empty string"
        ))),
        None => Err(PipelineError::ExtractionParse(format!("missing `{field}`"))),
    }
}

fn vibe_component(vibe: &serde_json::Map<String, Value>, field: &str) -> Result<f32> {
    vibe.get(field)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .ok_or_else(|| PipelineError::ExtractionParse(format!("`vibe.{field}` must be a number")))
}

/// Parse and validate a completion. Any deviation is an `ExtractionParse` error.
pub fn parse_extraction(raw: &str) -> Result<ExtractionPayload> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::ExtractionParse(format!("invalid json: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::ExtractionParse("top level is not an object".into()))?;

    let artist = required_text(obj, "artist")?;
    let summary = required_text(obj, "summary")?;

    let raw_keywords = obj
        .get("keywords")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::ExtractionParse("`keywords` must be an array".into()))?;
    let mut keywords: Vec<String> = Vec::new();
    for k in raw_keywords {
        let s = k.as_str().ok_or_else(|| {
            PipelineError::ExtractionParse("`keywords` entries must be strings".into())
        })?;
        if let Some(tag) = normalize_hashtag(s) {
            if !keywords.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                keywords.push(tag);
            }
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }

    let vibe = obj
        .get("vibe")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::ExtractionParse("`vibe` must be an object".into()))?;
    let vibe = Vibe::new(
        vibe_component(vibe, "excitement")?,
        vibe_component(vibe, "shock")?,
        vibe_component(vibe, "sadness")?,
    );

    Ok(ExtractionPayload {
        artist,
        summary,
        keywords,
        vibe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r##"{"artist":"IVE","summary":"Neon hearts race as IVE drops a new single.",
        "keywords":["#IVE","comeback","#IVE","K pop","#"],
        "vibe":{"excitement":92,"shock":140,"sadness":-3}}"##;

    #[test]
    fn parses_and_normalizes() {
        let p = parse_extraction(GOOD).unwrap();
        assert_eq!(p.artist, "IVE");
        assert_eq!(p.keywords, vec!["#IVE", "#comeback", "#Kpop"]);
        assert_eq!(p.vibe, Vibe::new(92.0, 100.0, 0.0));
    }

    #[test]
    fn accepts_fenced_output() {
        let fenced = format!("```json\n{GOOD}\n```");
        assert!(parse_extraction(&fenced).is_ok());
        assert!(parse_extraction(&format!("```json{}```", GOOD.trim())).is_ok());
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```JSON {\"a\":1} ```"), "{\"a\":1}");
    }

    #[test]
    fn rejects_contract_violations() {
        for bad in [
            "not json",
            "[]",
            r#"{"artist":"","summary":"s","keywords":[],"vibe":{"excitement":1,"shock":1,"sadness":1}}"#,
            r#"{"artist":"a","summary":"s","keywords":"x","vibe":{"excitement":1,"shock":1,"sadness":1}}"#,
            r#"{"artist":"a","summary":"s","keywords":[],"vibe":{"excitement":"high","shock":1,"sadness":1}}"#,
            r#"{"artist":"a","summary":"s","keywords":[]}"#,
        ] {
            let err = parse_extraction(bad).unwrap_err();
            assert!(matches!(err, PipelineError::ExtractionParse(_)), "{bad}");
        }
    }

    #[test]
    fn keyword_list_is_capped() {
        let raw = r#"{"artist":"a","summary":"s","keywords":["1","2","3","4","5","6","7"],
            "vibe":{"excitement":1,"shock":1,"sadness":1}}"#;
        assert_eq!(parse_extraction(raw).unwrap().keywords.len(), MAX_KEYWORDS);
    }

    #[test]
    fn prompt_works_with_headline_only() {
        let msgs = extraction_messages("BTS announce tour", "");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].content.contains("BTS announce tour"));
        assert!(!msgs[0].content.contains("Context"));
    }
}
