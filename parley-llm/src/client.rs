use crate::error::Result;
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};

/// Model parameters carried on every completion request.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct LlmClient {
    inner: OpenAiClient,
    params: CompletionParams,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, params: CompletionParams, base_url: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            inner: OpenAiClient::new(http, api_key, base_url),
            params,
        }
    }

    pub fn model(&self) -> &str {
        &self.params.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.params.model))]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        self.inner.chat(&self.params, messages, tools).await
    }
}
