use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::send_with_retry;
use super::{
    Message, MessagePart, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    base_url, format_error_parts,
};
use crate::svg::data_uri;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_data(mut self, data: crate::data::DataAttachment) -> Self {
        self.messages.push(Message::user_data(data));
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move {
            let client = reqwest::Client::new();
            let url = format!(
                "{}/chat/completions",
                base_url("OPENAI_BASE_URL", DEFAULT_BASE_URL)
            );
            let body = request_body(&self);

            let (status, text) = send_with_retry("OpenAI", || {
                client.post(&url).bearer_auth(&self.key).json(&body)
            })
            .await?;
            if status.is_success() {
                return extract_text_response(&text, &self.model);
            }
            Err(anyhow!(
                "OpenAI API error ({}): {}",
                status,
                extract_openai_error(&text).unwrap_or(text)
            ))
        })
    }
}

fn request_body(provider: &OpenAI) -> Value {
    let messages = provider
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
            };
            let content = message
                .parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text(text) => json!({"type": "text", "text": text}),
                    MessagePart::Data(data) => json!({
                        "type": "image_url",
                        "image_url": {"url": data_uri(&data.bytes, &data.mime)}
                    }),
                })
                .collect::<Vec<_>>();
            json!({"role": role, "content": content})
        })
        .collect::<Vec<_>>();

    json!({
        "model": provider.model,
        "messages": messages,
        "response_format": {"type": "json_object"}
    })
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: OpenAIResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("no content returned from OpenAI"))?;
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataAttachment;

    #[test]
    fn extracts_message_content_and_usage() {
        let payload = r#"{
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "{\"element1\": {\"text\": \"Sale\"}}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 12, "total_tokens": 132}
        }"#;
        let response = extract_text_response(payload, DEFAULT_MODEL).unwrap();
        assert_eq!(response.text, r#"{"element1": {"text": "Sale"}}"#);
        assert_eq!(response.model.as_deref(), Some("gpt-4o-mini-2024-07-18"));
        assert_eq!(response.usage.and_then(|usage| usage.total_tokens), Some(132));
    }

    #[test]
    fn empty_content_is_an_error() {
        let payload = r#"{"choices": [{"message": {"content": null}}]}"#;
        assert!(extract_text_response(payload, DEFAULT_MODEL).is_err());
    }

    #[test]
    fn image_parts_become_data_urls() {
        let provider = OpenAI::new("sk")
            .append_system_input("rules".to_string())
            .append_user_data(DataAttachment {
                bytes: b"abc".to_vec(),
                mime: "image/png".to_string(),
                name: None,
            });
        let body = request_body(&provider);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,YWJj"
        );
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"{"error": {"message": "Incorrect API key", "type": "invalid_request_error", "code": "invalid_api_key"}}"#;
        assert_eq!(
            extract_openai_error(body).unwrap(),
            "Incorrect API key | type: invalid_request_error | code: invalid_api_key"
        );
    }
}
