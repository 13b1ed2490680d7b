//! Configuration loader: TOML file, env overrides, fail-fast validation.

use parley_platform::Credentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ParleyConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub reply: ReplyConfig,
    /// Trigger roles in priority order; the first one is never special, but
    /// iteration order decides which keyword wins a shared prefix.
    pub roles: Vec<RoleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    256
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Serialized session cookies, tried before the password pair.
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_activity_check_interval_secs")]
    pub activity_check_interval_secs: u64,
    /// `[start, end]` hours; `start > end` wraps past midnight.
    #[serde(default = "default_online_hours")]
    pub online_hours: [u8; 2],
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            cookies: None,
            email: None,
            password: None,
            activity_check_interval_secs: default_activity_check_interval_secs(),
            online_hours: default_online_hours(),
        }
    }
}

fn default_activity_check_interval_secs() -> u64 {
    300
}

fn default_online_hours() -> [u8; 2] {
    [0, 23]
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub safe_search: bool,
    #[serde(default = "default_search_language")]
    pub language: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            page: 0,
            safe_search: false,
            language: default_search_language(),
        }
    }
}

fn default_search_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyConfig {
    /// Role used when no trigger keyword matched.
    pub auto_reply_role: String,
    #[serde(default = "default_auto_reply_chance")]
    pub auto_reply_chance: f64,
    #[serde(default = "default_min_reply_interval_ms")]
    pub min_reply_interval_ms: u64,
    #[serde(default = "default_max_question_len")]
    pub max_question_len: usize,
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,
    #[serde(default = "default_answer_buffer_size")]
    pub answer_buffer_size: usize,
    /// Roles allowed to trigger the web-search tool exchange.
    #[serde(default)]
    pub web_search_roles: Vec<String>,
    #[serde(default = "default_empty_question_reply")]
    pub empty_question_reply: String,
    #[serde(default = "default_too_long_reply")]
    pub too_long_reply: String,
}

fn default_auto_reply_chance() -> f64 {
    0.1
}

fn default_min_reply_interval_ms() -> u64 {
    20_000
}

fn default_max_question_len() -> usize {
    500
}

fn default_message_buffer_size() -> usize {
    10
}

fn default_answer_buffer_size() -> usize {
    4
}

fn default_empty_question_reply() -> String {
    "What".to_string()
}

fn default_too_long_reply() -> String {
    "You're asking for too much".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    /// Trigger keyword, matched case-insensitively against message prefixes.
    pub keyword: String,
    /// System prompt sent for this role.
    pub prompt: String,
}

impl ParleyConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: ParleyConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PARLEY_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("PLATFORM_COOKIES") {
            if !v.trim().is_empty() {
                self.platform.cookies = Some(v);
            }
        }
        if let Ok(v) = std::env::var("PLATFORM_EMAIL") {
            if !v.trim().is_empty() {
                self.platform.email = Some(v);
            }
        }
        if let Ok(v) = std::env::var("PLATFORM_PASSWORD") {
            if !v.trim().is_empty() {
                self.platform.password = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SEARCH_BASE_URL") {
            if !v.trim().is_empty() {
                self.search.base_url = Some(v);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.roles.is_empty() {
            return Err(anyhow::anyhow!("at least one [[roles]] entry is required"));
        }
        for role in &self.roles {
            if role.keyword.trim().is_empty() {
                return Err(anyhow::anyhow!("roles.keyword must not be empty"));
            }
            if role.prompt.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "roles.prompt must not be empty (keyword {:?})",
                    role.keyword
                ));
            }
        }
        if self.role_prompt(&self.reply.auto_reply_role).is_none() {
            return Err(anyhow::anyhow!(
                "reply.auto_reply_role {:?} does not name a configured role",
                self.reply.auto_reply_role
            ));
        }
        for keyword in &self.reply.web_search_roles {
            if self.role_prompt(keyword).is_none() {
                return Err(anyhow::anyhow!(
                    "reply.web_search_roles entry {:?} does not name a configured role",
                    keyword
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.reply.auto_reply_chance) {
            return Err(anyhow::anyhow!(
                "reply.auto_reply_chance must be within [0, 1]"
            ));
        }
        if self.reply.max_question_len == 0 {
            return Err(anyhow::anyhow!("reply.max_question_len must be > 0"));
        }
        if self.reply.message_buffer_size == 0 || self.reply.answer_buffer_size == 0 {
            return Err(anyhow::anyhow!(
                "reply.message_buffer_size and reply.answer_buffer_size must be > 0"
            ));
        }
        if self.platform.activity_check_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "platform.activity_check_interval_secs must be > 0"
            ));
        }
        for hour in self.platform.online_hours {
            if hour > 23 {
                return Err(anyhow::anyhow!(
                    "platform.online_hours entries must be within [0, 23]"
                ));
            }
        }
        if self.credentials().is_empty() {
            return Err(anyhow::anyhow!(
                "platform credentials required: set platform.cookies or platform.email + platform.password"
            ));
        }
        Ok(())
    }

    pub fn role_prompt(&self, keyword: &str) -> Option<&str> {
        self.roles
            .iter()
            .find(|r| r.keyword == keyword)
            .map(|r| r.prompt.as_str())
    }

    /// Trigger keywords in configuration order.
    pub fn keywords(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.keyword.as_str()).collect()
    }

    /// Credential fallback chain: stored session first, then password.
    pub fn credentials(&self) -> Vec<Credentials> {
        let mut out = Vec::new();
        if let Some(cookies) = self.platform.cookies.as_ref().filter(|c| !c.is_empty()) {
            out.push(Credentials::StoredSession {
                cookies: cookies.clone(),
            });
        }
        if let (Some(email), Some(password)) = (
            self.platform.email.as_ref().filter(|e| !e.is_empty()),
            self.platform.password.as_ref().filter(|p| !p.is_empty()),
        ) {
            out.push(Credentials::Password {
                email: email.clone(),
                password: password.clone(),
            });
        }
        out
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".parley").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[general]
model = "gpt-4o-mini"

[platform]
email = "bot@example.com"
password = "secret"

[reply]
auto_reply_role = "chat"

[[roles]]
keyword = "chat"
prompt = "You are a casual group-chat participant."

[[roles]]
keyword = "support"
prompt = "You are a support agent."
"#;

    fn parse(contents: &str) -> ParleyConfig {
        toml::from_str(contents).expect("parse config")
    }

    #[test]
    fn minimal_config_parses_and_validates() {
        let cfg = parse(MINIMAL);
        cfg.validate().expect("validate");
        assert_eq!(cfg.keywords(), vec!["chat", "support"]);
        assert_eq!(cfg.reply.empty_question_reply, "What");
        assert_eq!(cfg.reply.too_long_reply, "You're asking for too much");
        assert_eq!(cfg.platform.online_hours, [0, 23]);
    }

    #[test]
    fn auto_reply_role_must_name_a_configured_role() {
        let mut cfg = parse(MINIMAL);
        cfg.reply.auto_reply_role = "nope".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn web_search_roles_must_name_configured_roles() {
        let mut cfg = parse(MINIMAL);
        cfg.reply.web_search_roles = vec!["support".to_string()];
        cfg.validate().expect("validate");
        cfg.reply.web_search_roles = vec!["missing".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn credentials_prefer_stored_session_over_password() {
        let mut cfg = parse(MINIMAL);
        cfg.platform.cookies = Some("{\"cookies\": []}".to_string());
        let kinds: Vec<&str> = cfg.credentials().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["stored_session", "password"]);
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let mut cfg = parse(MINIMAL);
        cfg.platform.email = None;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn load_reads_file_and_rejects_bad_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        {
            let mut f = std::fs::File::create(&path).expect("create");
            f.write_all(MINIMAL.as_bytes()).expect("write");
        }
        let cfg = ParleyConfig::load(Some(path.clone())).await.expect("load");
        assert_eq!(cfg.general.model, "gpt-4o-mini");

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "not really toml [").expect("write bad");
        assert!(ParleyConfig::load(Some(bad)).await.is_err());
    }
}
