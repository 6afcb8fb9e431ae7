use anyhow::{Result, anyhow};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use crate::data::DataAttachment;
use crate::enrich::{GenerationFuture, GenerationRequest, GenerationService};

mod claude;
mod gemini;
mod openai;
mod retry;

pub use claude::Claude;
pub use gemini::Gemini;
pub use openai::OpenAI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => openai::DEFAULT_MODEL,
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
            ProviderKind::Claude => claude::DEFAULT_MODEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl ProviderResponse {
    /// One-line account of which model answered and what it cost.
    pub fn usage_summary(&self) -> String {
        let model = self.model.as_deref().unwrap_or("unknown model");
        let Some(usage) = &self.usage else {
            return format!("{} reported no token usage", model);
        };
        let count = |tokens: Option<u64>| tokens.map_or("?".to_string(), |n| n.to_string());
        format!(
            "{} used {} tokens ({} prompt, {} completion)",
            model,
            count(usage.total_tokens),
            count(usage.prompt_tokens),
            count(usage.completion_tokens)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_data(data: DataAttachment) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Data(data)],
        }
    }
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

/// A hosted model that answers a conversation with free text.
pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn complete(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Gemini(Gemini),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_system_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn append_user_data(self, data: DataAttachment) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => ProviderImpl::OpenAI(provider.append_user_data(data)),
            ProviderImpl::Gemini(provider) => ProviderImpl::Gemini(provider.append_user_data(data)),
            ProviderImpl::Claude(provider) => ProviderImpl::Claude(provider.append_user_data(data)),
        }
    }

    fn complete(self) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.complete(),
            ProviderImpl::Gemini(provider) => provider.complete(),
            ProviderImpl::Claude(provider) => provider.complete(),
        }
    }
}

impl GenerationService for ProviderImpl {
    fn generate(&self, request: GenerationRequest) -> GenerationFuture {
        let mut provider = self
            .clone()
            .append_system_input(request.system_prompt)
            .append_user_input(request.user_prompt);
        if let Some(image) = request.image {
            provider = provider.append_user_data(image);
        }
        Box::pin(async move {
            let response = provider.complete().await?;
            debug!("{}", response.usage_summary());
            Ok(response.text)
        })
    }
}

pub fn build_provider(provider: ProviderKind, key: String, model: String) -> ProviderImpl {
    match provider {
        ProviderKind::OpenAI => ProviderImpl::OpenAI(OpenAI::new(key).with_model(model)),
        ProviderKind::Gemini => ProviderImpl::Gemini(Gemini::new(key).with_model(model)),
        ProviderKind::Claude => ProviderImpl::Claude(Claude::new(key).with_model(model)),
    }
}

/// Picks a provider from `model_arg` (or the available API keys) and builds
/// it with the resolved key.
pub fn connect(model_arg: Option<&str>, override_key: Option<&str>) -> Result<ProviderImpl> {
    let selection = resolve_provider_selection(model_arg, override_key)?;
    let key = resolve_key(selection.provider, override_key)?;
    let model = selection
        .requested_model
        .unwrap_or_else(|| selection.provider.default_model().to_string());
    Ok(build_provider(selection.provider, key, model))
}

pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    override_key: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg.filter(|value| !value.trim().is_empty()) {
        Some(model) => parse_model_arg(model),
        None => default_provider_selection(override_key),
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }

    match provider {
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
        ProviderKind::Gemini => get_env("GEMINI_API_KEY").or_else(|| get_env("GOOGLE_API_KEY")),
        ProviderKind::Claude => get_env("ANTHROPIC_API_KEY"),
    }
    .ok_or_else(|| anyhow!("API key not found for provider {}", provider.as_str()))
}

fn default_provider_selection(override_key: Option<&str>) -> Result<ProviderSelection> {
    let provider = if get_env("OPENAI_API_KEY").is_some() {
        ProviderKind::OpenAI
    } else if get_env("GEMINI_API_KEY").is_some() || get_env("GOOGLE_API_KEY").is_some() {
        ProviderKind::Gemini
    } else if get_env("ANTHROPIC_API_KEY").is_some() {
        ProviderKind::Claude
    } else if override_key.is_some() {
        ProviderKind::OpenAI
    } else {
        return Err(anyhow!(
            "no API keys found (checked OPENAI_API_KEY, GEMINI_API_KEY/GOOGLE_API_KEY, ANTHROPIC_API_KEY)"
        ));
    };
    Ok(ProviderSelection {
        provider,
        requested_model: None,
    })
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    let lower = raw.to_lowercase();
    if let Some(provider) = provider_from_name(&lower) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider, model)) = parse_provider_model_pair(raw) {
        return Ok(ProviderSelection {
            provider,
            requested_model: model,
        });
    }

    if let Some(provider) = provider_from_model_name(&lower) {
        return Ok(ProviderSelection {
            provider,
            requested_model: Some(raw.to_string()),
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (openai:, gemini:, claude:)",
        raw
    ))
}

fn parse_provider_model_pair(input: &str) -> Option<(ProviderKind, Option<String>)> {
    let (provider_part, model_part) = input.split_once(':')?;
    let provider = provider_from_name(&provider_part.to_lowercase())?;
    let model = if model_part.trim().is_empty() {
        None
    } else {
        Some(model_part.trim().to_string())
    };
    Some((provider, model))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "openai" => Some(ProviderKind::OpenAI),
        "gemini" | "google" => Some(ProviderKind::Gemini),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        _ => None,
    }
}

fn provider_from_model_name(model: &str) -> Option<ProviderKind> {
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        Some(ProviderKind::OpenAI)
    } else if model.starts_with("gemini-") {
        Some(ProviderKind::Gemini)
    } else if model.starts_with("claude-") {
        Some(ProviderKind::Claude)
    } else {
        None
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn base_url(env_key: &str, default: &str) -> String {
    get_env(env_key)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_arg_with_provider_prefix() {
        let selection = resolve_provider_selection(Some("claude:claude-3-opus"), None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Claude);
        assert_eq!(selection.requested_model.as_deref(), Some("claude-3-opus"));

        let selection = resolve_provider_selection(Some("google"), None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);
        assert_eq!(selection.requested_model, None);
    }

    #[test]
    fn bare_model_names_infer_provider() {
        let selection = resolve_provider_selection(Some("gpt-4o"), None).unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAI);
        assert_eq!(selection.requested_model.as_deref(), Some("gpt-4o"));
        assert!(resolve_provider_selection(Some("mistral-large"), None).is_err());
    }

    #[test]
    fn override_key_wins() {
        assert_eq!(
            resolve_key(ProviderKind::Gemini, Some("secret")).unwrap(),
            "secret"
        );
    }

    #[test]
    fn connect_uses_requested_model() {
        let provider = connect(Some("openai:gpt-4.1"), Some("sk-test")).unwrap();
        match provider {
            ProviderImpl::OpenAI(openai) => assert_eq!(openai.model(), "gpt-4.1"),
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn error_parts_are_joined() {
        assert_eq!(
            format_error_parts(Some("bad key".into()), Some("auth".into()), None),
            "bad key | type: auth"
        );
        assert_eq!(format_error_parts(None, Some(" ".into()), None), "unknown error");
    }

    #[test]
    fn usage_summary_names_model_and_tokens() {
        let response = ProviderResponse {
            text: "{}".to_string(),
            model: Some("gpt-4o-mini".to_string()),
            usage: Some(ProviderUsage {
                prompt_tokens: Some(812),
                completion_tokens: Some(64),
                total_tokens: Some(876),
            }),
        };
        assert_eq!(
            response.usage_summary(),
            "gpt-4o-mini used 876 tokens (812 prompt, 64 completion)"
        );

        let partial = ProviderResponse {
            usage: Some(ProviderUsage {
                prompt_tokens: Some(10),
                ..ProviderUsage::default()
            }),
            model: None,
            ..response
        };
        assert_eq!(
            partial.usage_summary(),
            "unknown model used ? tokens (10 prompt, ? completion)"
        );

        let silent = ProviderResponse {
            usage: None,
            ..partial
        };
        assert_eq!(silent.usage_summary(), "unknown model reported no token usage");
    }
}
