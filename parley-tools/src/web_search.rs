use crate::error::{Result, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const WEB_SEARCH_TOOL_NAME: &str = "get_web_search";

/// How many results survive into the text handed back to the model.
const RESULT_TEXT_LIMIT: usize = 2;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Zero-based results page.
    pub page: u32,
    pub safe_search: bool,
    /// BCP 47-ish language tag, e.g. "en".
    pub language: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page: 0,
            safe_search: false,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub featured_snippet: Option<String>,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse>;
}

/// The web-search capability as advertised to, and invoked by, the
/// completion provider.
#[derive(Clone)]
pub struct WebSearch {
    provider: Arc<dyn SearchProvider>,
    options: SearchOptions,
}

impl WebSearch {
    pub fn new(provider: Arc<dyn SearchProvider>, options: SearchOptions) -> Self {
        Self { provider, options }
    }

    pub fn definition() -> parley_llm::ToolDefinition {
        parley_llm::ToolDefinition {
            name: WEB_SEARCH_TOOL_NAME.to_string(),
            description: "Get the latest information from the web".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The query to search for",
                    },
                },
                "required": ["query"],
            }),
        }
    }

    /// Execute a search from the provider's JSON arguments and flatten the
    /// outcome to the text spliced back into the follow-up request.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&self, arguments_json: &str) -> Result<String> {
        let query = extract_query(arguments_json)?;
        let response = self.provider.search(&query, &self.options).await?;
        let text = flatten_response(&response)?;
        tracing::debug!(query = %query, result_len = text.len(), "web search completed");
        Ok(text)
    }
}

fn extract_query(arguments_json: &str) -> Result<String> {
    let args: serde_json::Value = serde_json::from_str(arguments_json)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments not valid JSON: {e}")))?;
    match args.get("query") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "key query must be a non-empty string, got {other:?}"
        ))),
        None => Err(ToolError::InvalidArguments("missing key: query".to_string())),
    }
}

/// Featured snippet wins outright; otherwise the top results are collapsed to
/// `"title - description"` lines serialized as a JSON array; no hits at all
/// produce an empty string (the caller treats that as "search was useless").
fn flatten_response(response: &SearchResponse) -> Result<String> {
    if let Some(snippet) = response
        .featured_snippet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Ok(snippet.to_string());
    }
    if response.results.is_empty() {
        return Ok(String::new());
    }
    let lines: Vec<String> = response
        .results
        .iter()
        .take(RESULT_TEXT_LIMIT)
        .map(|r| format!("{} - {}", r.title, r.description))
        .collect();
    Ok(serde_json::to_string(&lines)?)
}

/// Search client for a SearXNG-style JSON endpoint.
#[derive(Clone)]
pub struct SearxClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearxClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for SearxClient {
    #[tracing::instrument(level = "info", skip_all)]
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let url = format!("{}/search", self.base_url);
        let pageno = (options.page + 1).to_string();
        let safesearch = if options.safe_search { "1" } else { "0" };
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("pageno", pageno.as_str()),
                ("safesearch", safesearch),
                ("language", options.language.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ToolError::Http(format!(
                "search status={status} body={body}"
            )));
        }

        let parsed: SearxResponse = serde_json::from_str(&body)?;
        Ok(SearchResponse {
            featured_snippet: parsed.answers.into_iter().next(),
            results: parsed
                .results
                .into_iter()
                .map(|r| SearchResult {
                    title: r.title,
                    description: r.content,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    answers: Vec<String>,
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(SearchResponse);

    #[async_trait]
    impl SearchProvider for FixedProvider {
        async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<SearchResponse> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn featured_snippet_wins_over_results() {
        let text = flatten_response(&SearchResponse {
            featured_snippet: Some("the answer".to_string()),
            results: vec![SearchResult {
                title: "t".to_string(),
                description: "d".to_string(),
            }],
        })
        .expect("flatten");
        assert_eq!(text, "the answer");
    }

    #[test]
    fn results_are_capped_and_json_serialized() {
        let results = (1..=4)
            .map(|i| SearchResult {
                title: format!("title{i}"),
                description: format!("desc{i}"),
            })
            .collect();
        let text = flatten_response(&SearchResponse {
            featured_snippet: None,
            results,
        })
        .expect("flatten");
        let lines: Vec<String> = serde_json::from_str(&text).expect("json lines");
        assert_eq!(lines, vec!["title1 - desc1", "title2 - desc2"]);
    }

    #[test]
    fn empty_response_flattens_to_empty_string() {
        let text = flatten_response(&SearchResponse::default()).expect("flatten");
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn run_extracts_query_from_provider_arguments() {
        let search = WebSearch::new(
            Arc::new(FixedProvider(SearchResponse {
                featured_snippet: Some("rust is a language".to_string()),
                results: vec![],
            })),
            SearchOptions::default(),
        );
        let text = search
            .run(r#"{"query": "what is rust"}"#)
            .await
            .expect("run");
        assert_eq!(text, "rust is a language");
    }

    #[tokio::test]
    async fn run_rejects_missing_or_blank_query() {
        let search = WebSearch::new(
            Arc::new(FixedProvider(SearchResponse::default())),
            SearchOptions::default(),
        );
        assert!(matches!(
            search.run(r#"{}"#).await.unwrap_err(),
            ToolError::InvalidArguments(_)
        ));
        assert!(matches!(
            search.run(r#"{"query": "  "}"#).await.unwrap_err(),
            ToolError::InvalidArguments(_)
        ));
    }

    #[test]
    fn searx_payload_maps_answers_and_results() {
        let body = r#"{
            "answers": ["42"],
            "results": [
                {"title": "a", "content": "b", "url": "https://x"},
                {"title": "c", "content": "d"}
            ]
        }"#;
        let parsed: SearxResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.answers, vec!["42"]);
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].title, "a");
        assert_eq!(parsed.results[1].content, "d");
    }
}
