//! Completion-request protocol: request assembly, rate-limit retry, and the
//! two-phase web-search tool exchange.

use async_trait::async_trait;
use parley_llm::{ChatMessage, ChatResponse, LlmClient, LlmError, ToolDefinition};
use parley_tools::{ToolError, WebSearch};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("web search failed: {0}")]
    Search(#[from] ToolError),
}

pub type Result<T> = std::result::Result<T, CompletionError>;

/// Seam over the wire client so tests can script provider behavior.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> parley_llm::Result<ChatResponse>;
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> parley_llm::Result<ChatResponse> {
        LlmClient::chat(self, messages, tools).await
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
        }
    }
}

pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    web_search: Option<WebSearch>,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        web_search: Option<WebSearch>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            web_search,
            retry,
        }
    }

    /// One reply for the given role. `question` and `context` may each be
    /// absent; a bare system prompt is still a valid request.
    #[tracing::instrument(level = "info", skip_all, fields(search_enabled))]
    pub async fn get_reply(
        &self,
        role_description: &str,
        question: Option<&str>,
        context: &[ChatMessage],
        search_enabled: bool,
    ) -> Result<String> {
        if role_description.is_empty() && question.is_none() && context.is_empty() {
            return Err(LlmError::InvalidRequest(
                "completion request needs a system prompt, a question, or context".to_string(),
            )
            .into());
        }

        let mut messages = vec![ChatMessage::system(role_description)];
        messages.extend_from_slice(context);
        if let Some(question) = question {
            messages.push(ChatMessage::user(question));
        }

        let search = self.web_search.as_ref().filter(|_| search_enabled);
        let tools: Vec<ToolDefinition> = match search {
            Some(_) => vec![WebSearch::definition()],
            None => Vec::new(),
        };

        let first = self.chat_with_retry(&messages, &tools).await?;

        let Some((search, call)) = search.zip(first.message.function_call.clone()) else {
            return Ok(first.message.content);
        };

        tracing::info!(tool = %call.name, "provider requested web search");
        let tool_result = search.run(&call.arguments).await?;

        // A useless search with a direct answer already in hand means the
        // tool call was unnecessary.
        if tool_result.is_empty() && !first.message.content.is_empty() {
            return Ok(first.message.content);
        }

        // Splice: the tool result supersedes the original context, which is
        // dropped to keep the follow-up request's token budget bounded.
        let mut follow_up = vec![ChatMessage::system(role_description)];
        if let Some(question) = question {
            follow_up.push(ChatMessage::user(question));
        }
        follow_up.push(first.message.clone());
        follow_up.push(ChatMessage::function(call.name, tool_result));

        let second = self.chat_with_retry(&follow_up, &[]).await?;
        Ok(second.message.content)
    }

    /// Rate-limit signals retry with a growing delay; anything else
    /// propagates immediately.
    async fn chat_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.backend.chat(messages, tools).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_rate_limit() => {
                    if attempt == max_attempts {
                        return Err(LlmError::RateLimitExceeded {
                            attempts: max_attempts,
                        }
                        .into());
                    }
                    let delay = self.retry.initial_delay * attempt;
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        ?delay,
                        "completion rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("retry loop always returns");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::{Role, ToolCall, Usage};
    use parley_tools::{SearchOptions, SearchProvider, SearchResponse, SearchResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn content_response(content: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(content),
            usage: Usage::default(),
            finish_reason: "stop".to_string(),
        }
    }

    fn tool_call_response(content: &str, query: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: content.to_string(),
                name: None,
                function_call: Some(ToolCall {
                    name: "get_web_search".to_string(),
                    arguments: format!(r#"{{"query": "{query}"}}"#),
                }),
            },
            usage: Usage::default(),
            finish_reason: "function_call".to_string(),
        }
    }

    /// Backend that replays a script and records every request.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<parley_llm::Result<ChatResponse>>>,
        requests: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl ScriptedBackend {
        fn push(&self, item: parley_llm::Result<ChatResponse>) {
            self.script.lock().expect("script lock").push_back(item);
        }

        fn requests(&self) -> Vec<(Vec<ChatMessage>, usize)> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolDefinition],
        ) -> parley_llm::Result<ChatResponse> {
            self.requests
                .lock()
                .expect("requests lock")
                .push((messages.to_vec(), tools.len()));
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .expect("script exhausted")
        }
    }

    struct FixedSearch(SearchResponse);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(
            &self,
            _query: &str,
            _options: &SearchOptions,
        ) -> parley_tools::Result<SearchResponse> {
            Ok(self.0.clone())
        }
    }

    fn web_search(response: SearchResponse) -> WebSearch {
        WebSearch::new(Arc::new(FixedSearch(response)), SearchOptions::default())
    }

    fn client(backend: Arc<ScriptedBackend>, search: Option<WebSearch>) -> CompletionClient {
        CompletionClient::new(
            backend,
            search,
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_retry_with_growing_delay_then_succeed() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Err(LlmError::RateLimited("slow down".into())));
        backend.push(Err(LlmError::RateLimited("slow down".into())));
        backend.push(Ok(content_response("finally")));

        let started = tokio::time::Instant::now();
        let reply = client(backend.clone(), None)
            .get_reply("role", Some("q"), &[], false)
            .await
            .expect("reply");

        assert_eq!(reply, "finally");
        assert_eq!(backend.requests().len(), 3);
        // delays: 100ms after attempt 1, 200ms after attempt 2
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limits_surface_without_an_extra_call() {
        let backend = Arc::new(ScriptedBackend::default());
        for _ in 0..3 {
            backend.push(Err(LlmError::RateLimited("slow down".into())));
        }

        let err = client(backend.clone(), None)
            .get_reply("role", Some("q"), &[], false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CompletionError::Llm(LlmError::RateLimitExceeded { attempts: 3 })
        ));
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn non_rate_limit_errors_propagate_immediately() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Err(LlmError::Http("boom".into())));

        let err = client(backend.clone(), None)
            .get_reply("role", Some("q"), &[], false)
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Llm(LlmError::Http(_))));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn fully_empty_request_is_rejected_before_any_call() {
        let backend = Arc::new(ScriptedBackend::default());
        let err = client(backend.clone(), None)
            .get_reply("", None, &[], false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Llm(LlmError::InvalidRequest(_))
        ));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn system_prompt_alone_is_a_valid_request() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Ok(content_response("ok")));
        let reply = client(backend.clone(), None)
            .get_reply("role", None, &[], false)
            .await
            .expect("reply");
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn tool_exchange_splices_context_and_disables_tools_on_second_call() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Ok(tool_call_response("", "rust news")));
        backend.push(Ok(content_response("here is what I found")));

        let search = web_search(SearchResponse {
            featured_snippet: Some("fresh facts".to_string()),
            results: vec![],
        });
        let context = vec![ChatMessage::assistant("old answer about rust")];
        let reply = client(backend.clone(), Some(search))
            .get_reply("role", Some("what is new"), &context, true)
            .await
            .expect("reply");

        assert_eq!(reply, "here is what I found");
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);

        // First request: system + context + question, tool advertised.
        let (first_messages, first_tools) = &requests[0];
        assert_eq!(first_messages.len(), 3);
        assert_eq!(*first_tools, 1);

        // Second request: context replaced by the tool exchange, no tools.
        let (second_messages, second_tools) = &requests[1];
        assert_eq!(*second_tools, 0);
        let roles: Vec<Role> = second_messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Function]
        );
        assert!(
            second_messages
                .iter()
                .all(|m| m.content != "old answer about rust"),
            "original context must be dropped"
        );
        let function_message = &second_messages[3];
        assert_eq!(function_message.name.as_deref(), Some("get_web_search"));
        assert_eq!(function_message.content, "fresh facts");
    }

    #[tokio::test]
    async fn empty_search_with_direct_content_skips_the_second_call() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Ok(tool_call_response("direct answer", "anything")));

        let search = web_search(SearchResponse::default());
        let reply = client(backend.clone(), Some(search))
            .get_reply("role", Some("q"), &[], true)
            .await
            .expect("reply");

        assert_eq!(reply, "direct answer");
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_search_without_content_still_runs_the_follow_up() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Ok(tool_call_response("", "anything")));
        backend.push(Ok(content_response("best effort")));

        let search = web_search(SearchResponse {
            featured_snippet: None,
            results: vec![SearchResult {
                title: "t".to_string(),
                description: "d".to_string(),
            }],
        });
        let reply = client(backend.clone(), Some(search))
            .get_reply("role", Some("q"), &[], true)
            .await
            .expect("reply");

        assert_eq!(reply, "best effort");
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn tool_calls_are_ignored_when_search_is_disabled() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Ok(tool_call_response("fallback content", "q")));

        let search = web_search(SearchResponse::default());
        let reply = client(backend.clone(), Some(search))
            .get_reply("role", Some("q"), &[], false)
            .await
            .expect("reply");

        // No tools advertised, so a stray function_call is not executed.
        assert_eq!(reply, "fallback content");
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, 0);
    }
}
