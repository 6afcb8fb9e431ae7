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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub(crate) const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl Gemini {
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

impl Provider for Gemini {
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
                "{}/{}:generateContent",
                base_url("GEMINI_BASE_URL", DEFAULT_BASE_URL),
                self.model
            );
            let model = self.model.clone();
            let key = self.key.clone();
            let body = request_body(self.messages);

            let (status, text) = send_with_retry("Gemini", || {
                client
                    .post(&url)
                    .header("x-goog-api-key", &key)
                    .json(&body)
            })
            .await?;
            if status.is_success() {
                return extract_text_response(&text, &model);
            }
            Err(anyhow!(
                "Gemini API error ({}): {}",
                status,
                extract_gemini_error(&text).unwrap_or(text)
            ))
        })
    }
}

fn request_body(messages: Vec<Message>) -> Value {
    let (system_inputs, user_inputs): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .partition(|message| matches!(message.role, MessageRole::System));

    let system_instruction = system_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .filter_map(|part| match part {
            MessagePart::Text(text) => Some(text),
            MessagePart::Data(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let parts = user_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .map(|part| match part {
            MessagePart::Text(text) => json!({"text": text}),
            MessagePart::Data(data) => json!({
                "inline_data": {
                    "mime_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            }),
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "contents": [{"role": "user", "parts": parts}],
        "generationConfig": {"responseMimeType": "application/json"}
    });
    if !system_instruction.trim().is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system_instruction}]});
    }
    body
}

fn extract_text_response(
    text: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, anyhow::Error> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;
    let content = candidate
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if content.trim().is_empty() {
        return Err(anyhow!("no text returned from Gemini"));
    }

    let model = payload
        .model_version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage_metadata.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataAttachment;

    #[test]
    fn extracts_candidate_text() {
        let payload = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "{\"element1\": {\"font\": \"Arial.ttf\"}}"}]}}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10},
            "modelVersion": "gemini-1.5-flash-002"
        }"#;
        let response = extract_text_response(payload, DEFAULT_MODEL).unwrap();
        assert_eq!(response.text, r#"{"element1": {"font": "Arial.ttf"}}"#);
        assert_eq!(response.model.as_deref(), Some("gemini-1.5-flash-002"));
        assert_eq!(response.usage.and_then(|usage| usage.prompt_tokens), Some(7));
    }

    #[test]
    fn no_candidates_is_an_error() {
        assert!(extract_text_response(r#"{"candidates": []}"#, DEFAULT_MODEL).is_err());
    }

    #[test]
    fn body_carries_inline_image_and_system_instruction() {
        let messages = vec![
            Message::system("rules".to_string()),
            Message::user_data(DataAttachment {
                bytes: b"abc".to_vec(),
                mime: "image/png".to_string(),
                name: None,
            }),
        ];
        let body = request_body(messages);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(
            body["contents"][0]["parts"][0]["inline_data"]["mime_type"],
            "image/png"
        );
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }
}
