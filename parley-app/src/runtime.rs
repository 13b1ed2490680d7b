//! Process wiring: config in, lifecycle manager out.

use crate::buffers::BufferRegistry;
use crate::completion::CompletionClient;
use crate::config::ParleyConfig;
use crate::handler::{ConversationHandler, HandlerSettings};
use crate::lifecycle::{LifecycleSettings, SessionLifecycleManager};
use anyhow::Result;
use parley_llm::{CompletionParams, LlmClient};
use parley_platform::{DevConnector, PlatformConnector};
use parley_tools::{SearchOptions, SearxClient, WebSearch};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ParleyConfig::load(config_path).await?;
    tracing::info!(
        model = %cfg.general.model,
        roles = cfg.roles.len(),
        auto_reply_role = %cfg.reply.auto_reply_role,
        online_hours = ?cfg.platform.online_hours,
        activity_check_interval_secs = cfg.platform.activity_check_interval_secs,
        search_configured = cfg.search.base_url.is_some(),
        "starting parley"
    );

    let manager = build(&cfg)?;
    // Detached: a halted lifecycle stops checking but the process stays up
    // so an operator can inspect it.
    let _lifecycle = manager.run();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ParleyConfig::load(config_path).await?;
    let credential_kinds: Vec<&str> = cfg.credentials().iter().map(|c| c.kind()).collect();
    if cfg.keys.openai_api_key.is_none() {
        tracing::warn!("keys.openai_api_key is not set; serve will refuse to start");
    }
    if cfg.search.base_url.is_none() && !cfg.reply.web_search_roles.is_empty() {
        tracing::warn!(
            web_search_roles = ?cfg.reply.web_search_roles,
            "web search roles configured but search.base_url is not set"
        );
    }
    tracing::info!(
        model = %cfg.general.model,
        keywords = ?cfg.keywords(),
        auto_reply_role = %cfg.reply.auto_reply_role,
        credentials = ?credential_kinds,
        online_hours = ?cfg.platform.online_hours,
        "config ok"
    );
    Ok(())
}

/// Assemble the full pipeline behind one in-process platform connector.
fn build(cfg: &ParleyConfig) -> Result<Arc<SessionLifecycleManager>> {
    let api_key = cfg
        .keys
        .openai_api_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("keys.openai_api_key (or OPENAI_API_KEY) is required"))?;

    let llm = LlmClient::new(
        api_key,
        CompletionParams {
            model: cfg.general.model.clone(),
            temperature: cfg.general.temperature,
            max_tokens: cfg.general.max_tokens,
        },
        None,
    );

    let web_search = match cfg.search.base_url.as_deref() {
        Some(base_url) => {
            let provider = Arc::new(SearxClient::new(base_url)?);
            Some(WebSearch::new(
                provider,
                SearchOptions {
                    page: cfg.search.page,
                    safe_search: cfg.search.safe_search,
                    language: cfg.search.language.clone(),
                },
            ))
        }
        None => None,
    };

    let completion = Arc::new(CompletionClient::new(
        Arc::new(llm),
        web_search,
        Default::default(),
    ));

    let message_history = Arc::new(BufferRegistry::new(
        cfg.reply.message_buffer_size,
        Some(cfg.reply.max_question_len),
    ));
    let answer_history = Arc::new(BufferRegistry::new(cfg.reply.answer_buffer_size, None));

    let handler = Arc::new(ConversationHandler::new(
        HandlerSettings::from_config(cfg),
        completion,
        message_history,
        answer_history,
    ));

    let connector: Arc<dyn PlatformConnector> = Arc::new(DevConnector::new());
    Ok(Arc::new(SessionLifecycleManager::new(
        connector,
        cfg.credentials(),
        handler,
        LifecycleSettings::from_config(cfg),
    )))
}
