//! Provider chat client for paper conversations.
//!
//! Speaks the OpenAI chat-completions and Anthropic messages wire formats.
//! The paper context rides in the system prompt; conversation history is
//! bounded by message count and an approximate token budget before every
//! call so prompts stay a predictable size.

use chrono::{DateTime, Utc};
use paperdeck_core::{Error, PaperContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// At most this many trailing history messages are considered per call.
pub const MAX_HISTORY_MESSAGES: usize = 10;
/// Approximate token budget for system prompt + history + user message.
pub const MAX_HISTORY_TOKENS: usize = 2_000;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(Error::NotConfigured(format!("unknown provider: {other}"))),
        }
    }
}

/// Models each provider is known to serve.
pub fn available_models(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::OpenAi => &["gpt-4-turbo-preview", "gpt-4", "gpt-3.5-turbo"],
        Provider::Anthropic => &[
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
        ],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub provider: Provider,
    pub model: String,
    pub max_tokens: u64,
    pub temperature: f64,
}

impl ChatConfig {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 4_000,
            temperature: 0.7,
        }
    }
}

/// One persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    /// "user", "assistant" or "system".
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ChatMessage {
    pub fn user(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", Utc::now().timestamp_millis()),
            thread_id: thread_id.into(),
            role: "user".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Rough token count: both providers land near 4 chars/token for English
/// academic text, which is all this budget needs.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u64,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u64,
    temperature: f64,
    system: String,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

/// Chat client bound to one provider + model + key.
///
/// The API key is injected by the caller (decrypted from the key store);
/// the client never reads ambient state.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
    api_key: String,
    openai_endpoint: String,
    anthropic_endpoint: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, config: ChatConfig, api_key: impl Into<String>) -> Self {
        Self {
            http,
            config,
            api_key: api_key.into(),
            openai_endpoint: OPENAI_ENDPOINT.to_string(),
            anthropic_endpoint: ANTHROPIC_ENDPOINT.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Override provider endpoints (fixture servers in tests).
    pub fn with_endpoints(mut self, openai: &str, anthropic: &str) -> Self {
        self.openai_endpoint = openai.to_string();
        self.anthropic_endpoint = anthropic.to_string();
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// System prompt grounding the assistant in one paper.
    pub fn system_prompt(context: &PaperContext) -> String {
        format!(
            "You are an AI assistant helping users understand and discuss academic papers \
             from arXiv. You have access to the full content of a paper and can answer \
             questions about it in detail.\n\n\
             Current Paper Context:\n{}\n\n\
             Instructions:\n\
             - Answer questions directly related to this paper using the provided content\n\
             - If asked about concepts not in the paper, provide general academic knowledge but mention the limitation\n\
             - You can reference specific sections, equations, figures, or results from the paper\n\
             - If the user asks about other papers, note that you only have access to this current paper's content\n\
             - Be precise and cite specific parts of the paper when relevant\n\
             - If mathematical content is discussed, format it clearly",
            context.to_context_string()
        )
    }

    /// Select the history slice that fits the prompt budget.
    ///
    /// Considers only the last [`MAX_HISTORY_MESSAGES`] turns and stops
    /// before the running total (system + user + history) would exceed
    /// [`MAX_HISTORY_TOKENS`].
    fn select_history<'a>(
        system: &str,
        user_message: &str,
        history: &'a [ChatMessage],
    ) -> Vec<&'a ChatMessage> {
        let mut selected = Vec::new();
        let mut total = approx_tokens(system) + approx_tokens(user_message);
        let tail_start = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
        for msg in &history[tail_start..] {
            let cost = approx_tokens(&msg.content);
            if total + cost > MAX_HISTORY_TOKENS {
                break;
            }
            selected.push(msg);
            total += cost;
        }
        selected
    }

    /// Send one user message grounded in `context` and return the assistant
    /// reply as a persistable [`ChatMessage`].
    pub async fn send(
        &self,
        user_message: &str,
        context: &PaperContext,
        history: &[ChatMessage],
    ) -> Result<ChatMessage> {
        let system = Self::system_prompt(context);
        let mut messages: Vec<WireMessage> = Self::select_history(&system, user_message, history)
            .into_iter()
            .map(|m| WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();
        messages.push(WireMessage {
            role: "user".to_string(),
            content: user_message.to_string(),
        });

        let content = match self.config.provider {
            Provider::OpenAi => self.send_openai(&system, messages).await?,
            Provider::Anthropic => self.send_anthropic(&system, messages).await?,
        };

        let thread_id = history
            .first()
            .map(|m| m.thread_id.clone())
            .unwrap_or_else(|| format!("thread_{}", Utc::now().timestamp()));
        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), self.config.model.clone());
        metadata.insert("provider".to_string(), self.config.provider.as_str().to_string());
        metadata.insert("paper_id".to_string(), context.id.clone());

        Ok(ChatMessage {
            id: format!("msg_{}", Utc::now().timestamp_millis()),
            thread_id,
            role: "assistant".to_string(),
            content,
            timestamp: Utc::now(),
            metadata,
        })
    }

    async fn send_openai(&self, system: &str, mut messages: Vec<WireMessage>) -> Result<String> {
        messages.insert(
            0,
            WireMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
        );
        let req = OpenAiRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let resp = self
            .http
            .post(&self.openai_endpoint)
            .timeout(self.timeout)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("openai chat.completions HTTP {status}")));
        }
        let parsed: OpenAiResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Llm("openai response had no choices".to_string()))
    }

    async fn send_anthropic(&self, system: &str, messages: Vec<WireMessage>) -> Result<String> {
        let req = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: system.to_string(),
            messages,
        };
        let resp = self
            .http
            .post(&self.anthropic_endpoint)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("anthropic messages HTTP {status}")));
        }
        let parsed: AnthropicResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| Error::Llm("anthropic response had no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use paperdeck_core::Section;
    use std::net::SocketAddr;

    fn context() -> PaperContext {
        PaperContext {
            id: "2401.00001".to_string(),
            title: "Bandit Algorithms".to_string(),
            authors: vec!["A. Author".to_string()],
            abstract_text: "We study bandits.".to_string(),
            content: "Exploration and exploitation trade off against each other.".to_string(),
            sections: vec![Section {
                id: "intro".to_string(),
                title: "Introduction".to_string(),
                level: 2,
            }],
            references: Vec::new(),
        }
    }

    fn message(thread: &str, role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: format!("msg_test_{role}_{}", content.len()),
            thread_id: thread.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn system_prompt_embeds_the_paper_context() {
        let prompt = ChatClient::system_prompt(&context());
        assert!(prompt.contains("Title: Bandit Algorithms"));
        assert!(prompt.contains("ArXiv ID: 2401.00001"));
        assert!(prompt.contains("- Be precise and cite specific parts"));
    }

    #[test]
    fn history_selection_caps_message_count() {
        let history: Vec<ChatMessage> = (0..15)
            .map(|i| message("t1", "user", &format!("short message {i}")))
            .collect();
        let kept = ChatClient::select_history("sys", "q", &history);
        assert_eq!(kept.len(), MAX_HISTORY_MESSAGES);
        // The tail is kept, not the head.
        assert!(kept[0].content.contains("message 5"));
    }

    #[test]
    fn history_selection_respects_the_token_budget() {
        let long = "x".repeat(4_000); // ~1000 tokens each
        let history = vec![
            message("t1", "user", &long),
            message("t1", "assistant", &long),
            message("t1", "user", &long),
        ];
        let kept = ChatClient::select_history("system prompt", "question", &history);
        assert_eq!(kept.len(), 1, "second long message must overflow the budget");
    }

    async fn openai_stub() -> SocketAddr {
        let app = Router::new().route(
            "/chat",
            post(|Json(req): Json<serde_json::Value>| async move {
                // Echo whether a system message arrived first.
                let first_role = req["messages"][0]["role"].as_str().unwrap_or("").to_string();
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant",
                        "content": format!("reply (first role: {first_role})")}}]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn anthropic_stub() -> SocketAddr {
        let app = Router::new().route(
            "/messages",
            post(|Json(req): Json<serde_json::Value>| async move {
                let has_system = req.get("system").and_then(|s| s.as_str()).is_some();
                let roles_ok = req["messages"]
                    .as_array()
                    .map(|ms| ms.iter().all(|m| m["role"] != "system"))
                    .unwrap_or(false);
                Json(serde_json::json!({
                    "content": [{"type": "text",
                        "text": format!("reply (system: {has_system}, roles ok: {roles_ok})")}]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn openai_path_sends_system_message_first() {
        let addr = openai_stub().await;
        let client = ChatClient::new(
            reqwest::Client::new(),
            ChatConfig::new(Provider::OpenAi, "gpt-4"),
            "sk-test",
        )
        .with_endpoints(&format!("http://{addr}/chat"), "http://unused.invalid");

        let reply = client.send("What is explored?", &context(), &[]).await.unwrap();
        assert_eq!(reply.role, "assistant");
        assert_eq!(reply.content, "reply (first role: system)");
        assert_eq!(reply.metadata.get("provider").map(String::as_str), Some("openai"));
        assert_eq!(
            reply.metadata.get("paper_id").map(String::as_str),
            Some("2401.00001")
        );
    }

    #[tokio::test]
    async fn anthropic_path_keeps_system_out_of_the_message_list() {
        let addr = anthropic_stub().await;
        let client = ChatClient::new(
            reqwest::Client::new(),
            ChatConfig::new(Provider::Anthropic, "claude-3-haiku-20240307"),
            "sk-ant-test",
        )
        .with_endpoints("http://unused.invalid", &format!("http://{addr}/messages"));

        let history = vec![message("thread_2401.00001_1", "user", "earlier question")];
        let reply = client
            .send("And the exploitation side?", &context(), &history)
            .await
            .unwrap();
        assert_eq!(reply.content, "reply (system: true, roles ok: true)");
        assert_eq!(reply.thread_id, "thread_2401.00001_1");
    }

    #[test]
    fn provider_parses_from_str() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("cohere".parse::<Provider>().is_err());
    }
}
