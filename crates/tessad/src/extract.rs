//! Parameter extraction from natural language.
//!
//! Issues exactly one completion call with a fixed instruction set
//! enumerating the extractable fields and current vocabulary codes, then
//! parses the returned JSON object. The query compiler performs the
//! authoritative validation of every enumerated value afterwards.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use tessa_common::llm::CompletionClient;
use tessa_common::AgentError;

use crate::vocab;

/// A field the model may return as a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_list(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// Structured parameters extracted from one user request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryParameters {
    #[serde(default)]
    pub intent: Option<String>,

    #[serde(default)]
    pub priority: Option<OneOrMany>,

    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub project: Option<String>,

    /// Mandatory in the model output; missing or garbled values fall back
    /// to the default limit.
    #[serde(default, rename = "maxResults", deserialize_with = "lenient_u32")]
    pub max_results: Option<u32>,

    #[serde(default)]
    pub order: Option<String>,

    #[serde(default)]
    pub keywords: Option<OneOrMany>,

    #[serde(default)]
    pub created_after: Option<String>,

    #[serde(default)]
    pub created_before: Option<String>,

    #[serde(default)]
    pub updated_after: Option<String>,

    #[serde(default)]
    pub updated_before: Option<String>,

    /// Kept as text; the compiler parses it and reports bad values.
    #[serde(default, deserialize_with = "lenient_string")]
    pub stale_days: Option<String>,

    #[serde(default, deserialize_with = "lenient_i64")]
    pub date_number: Option<i64>,

    #[serde(default)]
    pub date_unit: Option<String>,

    #[serde(default)]
    pub date_field: Option<String>,

    #[serde(default)]
    pub date_operator: Option<String>,

    #[serde(default)]
    pub assignee: Option<String>,

    #[serde(default)]
    pub reporter: Option<String>,
}

pub const DEFAULT_RESULT_LIMIT: u32 = 20;

impl QueryParameters {
    pub fn limit(&self) -> u32 {
        self.max_results.unwrap_or(DEFAULT_RESULT_LIMIT)
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|v| v as u32),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Tokens shaped like a ticket key must actually be one.
static KEY_ATTEMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*-[0-9*]").unwrap());
static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[A-Z][A-Z0-9]+-[1-9][0-9]*$").unwrap());

static SINGLE_RESULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(a|an|one|single)\s+(ticket|issue|bug)\b").unwrap());

fn reject_malformed_keys(query: &str) -> Result<(), AgentError> {
    for word in query.split_whitespace() {
        let cleaned = word.trim_end_matches([',', '?', '.']);
        if KEY_ATTEMPT_RE.is_match(cleaned) && !KEY_RE.is_match(cleaned) {
            return Err(AgentError::validation(format!(
                "Potential ticket key '{cleaned}' has an invalid format. Keys look like \
                 'PROJ-123' and cannot contain special characters like '*'."
            )));
        }
    }
    Ok(())
}

fn build_extraction_prompt() -> String {
    format!(
        r#"You are an expert in extracting ticket-tracker query parameters from natural language prompts.
Your goal is to produce a single JSON object based on the user's request.

Extractable fields: intent, priority, program, project, maxResults, order, keywords,
created_after, created_before, updated_after, updated_before, assignee, reporter,
stale_days, date_number, date_unit, date_field, date_operator.
The "maxResults" field is MANDATORY; use 20 when the user gives no count.

Available programs: {programs}
Available priorities: {priorities}
Available projects: {projects}

Extraction rules:
- For time queries like "created in the last 2 years", emit "date_number": 2,
  "date_unit": "year", "date_field": "created", "date_operator": "after".
- For "stale tickets" or "not updated in N days", emit "stale_days". It overrides
  the other date fields.
- For "assigned to me" or "my tickets", use "assignee": "currentUser()".
- If the query contains a code from the available programs list, it MUST be the
  "program" field.
- Omit any field the user did not mention.

Example request: "show P1 or P2 bugs from last month"
{{
  "intent": "list",
  "priority": ["P1", "P2"],
  "keywords": "bug",
  "date_number": 1,
  "date_unit": "month",
  "date_field": "created",
  "date_operator": "after",
  "maxResults": 20
}}

Respond with the JSON object only."#,
        programs = vocab::program_codes().join(", "),
        priorities = vocab::priority_codes().join(", "),
        projects = vocab::project_codes().join(", "),
    )
}

/// Pull a JSON object out of a completion response, tolerating markdown
/// code fences and surrounding prose.
pub fn extract_json(response: &str) -> Option<String> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                return Some(inner.to_string());
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start < end {
        return Some(trimmed[start..=end].to_string());
    }
    None
}

/// Turns free-text requests into `QueryParameters`.
pub struct ParameterExtractor {
    llm: Arc<dyn CompletionClient>,
}

impl ParameterExtractor {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, query: &str) -> Result<QueryParameters, AgentError> {
        self.extract_with_context(query, &[]).await
    }

    /// Extraction with prior conversation turns prepended for context.
    pub async fn extract_with_context(
        &self,
        query: &str,
        prior_turns: &[String],
    ) -> Result<QueryParameters, AgentError> {
        reject_malformed_keys(query)?;

        let user_text = if prior_turns.is_empty() {
            query.to_string()
        } else {
            format!(
                "Earlier in this conversation:\n{}\n\nCurrent request: {}",
                prior_turns.join("\n"),
                query
            )
        };

        let system_prompt = build_extraction_prompt();
        let raw = self.llm.complete(&system_prompt, &user_text).await?;

        let json = extract_json(&raw).ok_or_else(|| AgentError::Extraction { raw: raw.clone() })?;
        let mut params: QueryParameters =
            serde_json::from_str(&json).map_err(|_| AgentError::Extraction { raw: raw.clone() })?;

        // "a ticket", "one issue": the user wants exactly one result.
        if SINGLE_RESULT_RE.is_match(query) {
            params.max_results = Some(1);
        }

        info!(
            "extracted parameters: intent={:?}, limit={}",
            params.intent,
            params.limit()
        );
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessa_common::llm::FakeCompletionClient;

    fn extractor_with(response: &str) -> ParameterExtractor {
        ParameterExtractor::new(Arc::new(FakeCompletionClient::always(response)))
    }

    #[tokio::test]
    async fn test_extracts_plain_json() {
        let extractor = extractor_with(
            r#"{"intent": "list", "program": "STXH", "priority": "P1", "maxResults": 5}"#,
        );
        let params = extractor.extract("show P1 tickets for STXH").await.unwrap();
        assert_eq!(params.program.as_deref(), Some("STXH"));
        assert_eq!(params.limit(), 5);
        assert_eq!(
            params.priority,
            Some(OneOrMany::One("P1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_extracts_fenced_json() {
        let extractor = extractor_with(
            "Here you go:\n```json\n{\"intent\": \"list\", \"maxResults\": 20}\n```",
        );
        let params = extractor.extract("list tickets for PLAT").await.unwrap();
        assert_eq!(params.limit(), 20);
    }

    #[tokio::test]
    async fn test_priority_list_and_string_limit() {
        let extractor = extractor_with(
            r#"{"priority": ["P1", "P2"], "maxResults": "10"}"#,
        );
        let params = extractor.extract("P1 or P2 tickets").await.unwrap();
        assert_eq!(
            params.priority.as_ref().unwrap().as_list(),
            vec!["P1".to_string(), "P2".to_string()]
        );
        assert_eq!(params.limit(), 10);
    }

    #[tokio::test]
    async fn test_garbled_limit_falls_back_to_default() {
        let extractor = extractor_with(r#"{"maxResults": "lots"}"#);
        let params = extractor.extract("tickets about timeouts").await.unwrap();
        assert_eq!(params.limit(), DEFAULT_RESULT_LIMIT);
    }

    #[tokio::test]
    async fn test_singular_phrasing_coerces_limit_to_one() {
        let extractor = extractor_with(r#"{"keywords": "boot crash", "maxResults": 20}"#);
        let params = extractor.extract("find a ticket about boot crashes").await.unwrap();
        assert_eq!(params.limit(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_an_extraction_error() {
        let extractor = extractor_with("I could not parse that request, sorry!");
        let err = extractor.extract("tickets for PLAT").await.unwrap_err();
        match err {
            AgentError::Extraction { raw } => assert!(raw.contains("sorry")),
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_key_rejected_before_llm_call() {
        let llm = Arc::new(FakeCompletionClient::always("{}"));
        let extractor = ParameterExtractor::new(llm.clone());
        let err = extractor.extract("summarize PLAT-12* please").await.unwrap_err();
        assert!(err.to_string().contains("PLAT-12*"));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_extract_json_prose_wrapped() {
        let raw = "Sure! {\"a\": 1} hope that helps";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": 1}");
        assert!(extract_json("no json here").is_none());
    }
}
