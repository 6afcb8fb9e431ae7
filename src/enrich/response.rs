//! Grammar for generation service answers: optional leading fence line
//! (three backticks plus an optional language tag), a JSON object, optional
//! trailing fence. Anything else is an invalid response.

use serde_json::{Map, Value};

use crate::color::ColorValue;
use crate::document::{EnrichmentUpdate, RegionPatch, USER_INTENTION_KEY};
use crate::error::{LayoutError, Result};

const FENCE: &str = "```";

/// Parses a raw answer into an update. Region keys are not checked against a
/// document here; `LayoutDocument::validate_update` does that.
pub fn parse_response(raw: &str) -> Result<EnrichmentUpdate> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Err(invalid("empty response"));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|err| invalid(format!("not valid JSON: {}", err)))?;
    let Value::Object(map) = value else {
        return Err(invalid("expected a JSON object keyed by region"));
    };

    let mut update = EnrichmentUpdate::new();
    for (key, value) in map {
        if key == USER_INTENTION_KEY {
            continue;
        }
        let patch = parse_patch(&key, value)?;
        update.insert(key, patch);
    }
    Ok(update)
}

pub(crate) fn strip_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix(FENCE) {
        // The rest of the opening line is a language tag.
        body = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest.trim_start_matches(|ch: char| ch.is_ascii_alphanumeric()),
        };
        body = body.trim();
    }
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest.trim_end();
    }
    body
}

fn parse_patch(key: &str, value: Value) -> Result<RegionPatch> {
    let fields = match value {
        Value::Object(map) => map,
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Object(map)) => map,
            _ => return Err(invalid(format!("{} must hold an object", key))),
        },
        _ => return Err(invalid(format!("{} must hold an object", key))),
    };

    Ok(RegionPatch {
        text: string_field(key, &fields, "text")?,
        font: string_field(key, &fields, "font")?,
        color: match fields.get("color") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                ColorValue::from_json(value)
                    .map_err(|reason| invalid(format!("{}.color: {}", key, reason)))?,
            ),
        },
    })
}

fn string_field(key: &str, fields: &Map<String, Value>, name: &str) -> Result<Option<String>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(invalid(format!(
            "{}.{} must be a string, got {}",
            key, name, other
        ))),
    }
}

fn invalid(message: impl Into<String>) -> LayoutError {
    LayoutError::InvalidResponse(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    #[test]
    fn plain_object() {
        let update = parse_response(r#"{"element1": {"text": "Grand Opening", "font": "NotoSansJP-Bold.ttf"}}"#)
            .unwrap();
        let patch = update.get("element1").unwrap();
        assert_eq!(patch.text.as_deref(), Some("Grand Opening"));
        assert_eq!(patch.font.as_deref(), Some("NotoSansJP-Bold.ttf"));
        assert_eq!(patch.color, None);
    }

    #[test]
    fn fenced_with_language_tag() {
        let raw = "```json\n{\"element2\": [{\"text\": \"夏祭り\", \"color\": [255, 200, 0]}]}\n```\n";
        let update = parse_response(raw).unwrap();
        let patch = update.get("element2").unwrap();
        assert_eq!(patch.text.as_deref(), Some("夏祭り"));
        assert_eq!(patch.color, Some(ColorValue::Resolved(Rgb::new(255, 200, 0))));
    }

    #[test]
    fn bare_fences_and_whitespace() {
        assert_eq!(strip_fences("  ```\n{}\n```  "), "{}");
        assert_eq!(strip_fences("```{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_fences("{}"), "{}");
    }

    #[test]
    fn user_intention_and_extra_fields_are_ignored() {
        let raw = r#"{"user_intention": "echo", "element1": {"text": "Hi", "left": 999}}"#;
        let update = parse_response(raw).unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update.get("element1").unwrap().text.as_deref(), Some("Hi"));
    }

    #[test]
    fn unknown_keys_survive_parsing() {
        let update = parse_response(r#"{"element7": {"text": "x"}}"#).unwrap();
        assert!(update.get("element7").is_some());
    }

    #[test]
    fn rejects_non_objects() {
        for raw in [
            "",
            "```\n```",
            "Sure! Here is your layout.",
            "[1, 2, 3]",
            r#"{"element1": "just text"}"#,
            r#"{"element1": [{"text": "a"}, {"text": "b"}]}"#,
            r#"{"element1": {"text": 42}}"#,
            r#"{"element1": {"color": "blue-ish"}}"#,
        ] {
            let err = parse_response(raw).unwrap_err();
            assert!(
                matches!(err, LayoutError::InvalidResponse(_)),
                "expected invalid response for {:?}, got {}",
                raw,
                err
            );
        }
    }
}
