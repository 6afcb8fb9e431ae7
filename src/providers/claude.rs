use anyhow::anyhow;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::send_with_retry;
use super::{
    Message, MessagePart, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    base_url, format_error_parts,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl Claude {
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
}

impl Provider for Claude {
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
            let url = base_url("ANTHROPIC_BASE_URL", DEFAULT_BASE_URL);
            let model = self.model.clone();
            let key = self.key.clone();
            let body = request_body(self.model, self.messages);

            let (status, text) = send_with_retry("Claude", || {
                client
                    .post(&url)
                    .header("x-api-key", &key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
            })
            .await?;
            if status.is_success() {
                return extract_text_response(&text, &model);
            }
            Err(anyhow!(
                "Claude API error ({}): {}",
                status,
                extract_claude_error(&text).unwrap_or(text)
            ))
        })
    }
}

fn request_body(model: String, messages: Vec<Message>) -> Value {
    let (system_inputs, user_inputs): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .partition(|message| matches!(message.role, MessageRole::System));

    let system = system_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .filter_map(|part| match part {
            MessagePart::Text(text) => Some(text),
            MessagePart::Data(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    // Claude expects alternating roles; all user parts go into one turn.
    let content = user_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .map(|part| match part {
            MessagePart::Text(text) => json!({"type": "text", "text": text}),
            MessagePart::Data(data) => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            }),
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [{"role": "user", "content": content}]
    });
    if !system.trim().is_empty() {
        body["system"] = json!(system);
    }
    body
}

fn extract_text_response(
    text: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, anyhow::Error> {
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))?;
    let content = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if content.trim().is_empty() {
        return Err(anyhow!("no text returned from Claude"));
    }
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataAttachment;

    #[test]
    fn joins_text_blocks() {
        let payload = r#"{
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "{\"element1\": "},
                {"type": "text", "text": "{\"text\": \"Hi\"}}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let response = extract_text_response(payload, DEFAULT_MODEL).unwrap();
        assert_eq!(response.text, r#"{"element1": {"text": "Hi"}}"#);
        assert_eq!(response.usage.and_then(|usage| usage.total_tokens), Some(15));
    }

    #[test]
    fn system_prompt_is_hoisted_and_image_inlined() {
        let messages = vec![
            Message::system("rules".to_string()),
            Message::user("layout".to_string()),
            Message::user_data(DataAttachment {
                bytes: b"abc".to_vec(),
                mime: "image/jpeg".to_string(),
                name: None,
            }),
        ];
        let body = request_body(DEFAULT_MODEL.to_string(), messages);
        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "layout");
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[1]["source"]["data"], "YWJj");
    }

    #[test]
    fn missing_text_is_an_error() {
        let payload = r#"{"content": [{"type": "tool_use"}]}"#;
        assert!(extract_text_response(payload, DEFAULT_MODEL).is_err());
    }
}
