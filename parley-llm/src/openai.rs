use crate::client::CompletionParams;
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_CHAT_COMPLETIONS_URL)
                .to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(
        &self,
        params: &CompletionParams,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let req = OpenAiChatRequest::new(params, messages, tools);

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(format!(
                "chat completions status={status} body={body}"
            )));
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(LlmError::InvalidRequest(format!(
                "chat completions status={status} body={body}"
            )));
        }
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "chat completions status={status} body={body}"
            )));
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    functions: Vec<OpenAiFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<String>,
}

impl OpenAiChatRequest {
    fn new(params: &CompletionParams, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut out = Self {
            model: params.model.clone(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            messages: messages.iter().map(to_openai_message).collect(),
            functions: tools.iter().map(to_openai_function).collect(),
            function_call: None,
        };
        if !out.functions.is_empty() {
            out.function_call = Some("auto".to_string());
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_openai_function(t: &ToolDefinition) -> OpenAiFunction {
    OpenAiFunction {
        name: t.name.clone(),
        description: t.description.clone(),
        parameters: t.parameters.clone(),
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<OpenAiFunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Function => "function",
    };
    OpenAiMessage {
        role: role.to_string(),
        content: m.content.clone(),
        name: m.name.clone(),
        function_call: m.function_call.as_ref().map(|fc| OpenAiFunctionCall {
            name: fc.name.clone(),
            arguments: fc.arguments.clone(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<OpenAiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("chat response missing choices".to_string())
        })?;

        let usage = v.usage.unwrap_or(OpenAiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
                name: None,
                function_call: choice.message.function_call.map(|fc| ToolCall {
                    name: fc.name,
                    arguments: fc.arguments,
                }),
            },
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_functions_when_none_are_advertised() {
        let params = CompletionParams {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        };
        let messages = vec![ChatMessage::system("helper")];
        let req = OpenAiChatRequest::new(&params, &messages, &[]);
        let json = serde_json::to_value(&req).expect("serialize request");
        assert!(json.get("functions").is_none());
        assert!(json.get("function_call").is_none());
    }

    #[test]
    fn request_advertises_functions_with_auto_dispatch() {
        let params = CompletionParams {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        };
        let tools = vec![ToolDefinition {
            name: "get_web_search".to_string(),
            description: "Get the latest information".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let req = OpenAiChatRequest::new(&params, &[ChatMessage::system("s")], &tools);
        let json = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(json["function_call"], "auto");
        assert_eq!(json["functions"][0]["name"], "get_web_search");
    }

    #[test]
    fn response_parses_function_call_into_tool_call() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "function_call": {"name": "get_web_search", "arguments": "{\"query\":\"rust\"}"}
                },
                "finish_reason": "function_call"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let parsed: OpenAiChatResponse = serde_json::from_str(body).expect("parse");
        let resp: ChatResponse = parsed.try_into().expect("convert");
        let call = resp.message.function_call.expect("function call present");
        assert_eq!(call.name, "get_web_search");
        assert_eq!(resp.message.content, "");
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.finish_reason, "function_call");
    }

    #[test]
    fn response_without_choices_is_a_format_error() {
        let parsed: OpenAiChatResponse =
            serde_json::from_str(r#"{"choices": []}"#).expect("parse");
        let err = ChatResponse::try_from(parsed).unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }
}
