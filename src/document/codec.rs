use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value, json};

use super::{LayoutDocument, REGION_PREFIX, RegionId, TextElement, USER_INTENTION_KEY};
use crate::color::ColorValue;
use crate::error::{LayoutError, Result};
use crate::geometry::Rect;

const GEOMETRY_FIELDS: [&str; 4] = ["left", "top", "width", "height"];
pub(super) const KNOWN_ELEMENT_FIELDS: [&str; 8] = [
    "text",
    "font",
    "font_size",
    "left",
    "top",
    "width",
    "height",
    "color",
];

impl LayoutDocument {
    /// Structured form: `user_intention`, `element1..N` each wrapping a single
    /// text element in a list, and any keys carried over from input. Keys come
    /// out in the order they were read; keys the input lacked are appended.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        if !self.key_order.iter().any(|key| key == USER_INTENTION_KEY) {
            root.insert(
                USER_INTENTION_KEY.to_string(),
                Value::String(self.user_intention.clone()),
            );
        }
        for key in &self.key_order {
            if let Some(value) = self.entry_value(key) {
                root.insert(key.clone(), value);
            }
        }
        for (id, element) in self.regions() {
            root.entry(id.to_string())
                .or_insert_with(|| json!([element_to_value(element)]));
        }
        for (key, value) in &self.extra {
            root.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(root)
    }

    fn entry_value(&self, key: &str) -> Option<Value> {
        if key == USER_INTENTION_KEY {
            return Some(Value::String(self.user_intention.clone()));
        }
        match RegionId::parse(key) {
            Some(id) => self.get(id).map(|element| json!([element_to_value(element)])),
            None => self.extra.get(key).cloned(),
        }
    }

    /// Pretty JSON with 4-space indentation; non-ASCII text is written as-is.
    pub fn to_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.to_value()
            .serialize(&mut serializer)
            .map_err(|err| LayoutError::Render(format!("failed to serialize document: {}", err)))?;
        String::from_utf8(out)
            .map_err(|err| LayoutError::Render(format!("document is not UTF-8: {}", err)))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| LayoutError::MalformedDocument(format!("invalid JSON: {}", err)))?;
        Self::from_value(value)
    }

    /// Parses the structured form. Nothing partial is returned: any schema
    /// violation fails the whole document.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(root) = value else {
            return Err(malformed("top level must be an object"));
        };

        let mut user_intention = String::new();
        let mut regions: Vec<(RegionId, TextElement)> = Vec::new();
        let mut extra = Map::new();
        let key_order = root.keys().cloned().collect();

        for (key, value) in root {
            if key == USER_INTENTION_KEY {
                user_intention = match value {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    _ => return Err(malformed("user_intention must be a string")),
                };
            } else if let Some(id) = RegionId::parse(&key) {
                regions.push((id, element_from_value(id, value)?));
            } else if key.starts_with(REGION_PREFIX)
                && key[REGION_PREFIX.len()..]
                    .chars()
                    .all(|ch| ch.is_ascii_digit())
            {
                return Err(malformed(format!("invalid region identifier '{}'", key)));
            } else {
                extra.insert(key, value);
            }
        }

        regions.sort_by_key(|(id, _)| *id);
        for (idx, (id, _)) in regions.iter().enumerate() {
            let expected = RegionId::from_index(idx);
            if *id != expected {
                return Err(malformed(format!(
                    "region identifiers must be contiguous from element1 (expected {}, found {})",
                    expected, id
                )));
            }
        }

        Ok(Self {
            user_intention,
            regions: regions.into_iter().map(|(_, element)| element).collect(),
            extra,
            key_order,
        })
    }
}

fn element_to_value(element: &TextElement) -> Value {
    let mut object = Map::new();
    for key in &element.key_order {
        if let Some(value) = element_field(element, key) {
            object.insert(key.clone(), value);
        }
    }
    for field in KNOWN_ELEMENT_FIELDS {
        if !object.contains_key(field) {
            if let Some(value) = element_field(element, field) {
                object.insert(field.to_string(), value);
            }
        }
    }
    for (key, value) in &element.extra {
        object.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(object)
}

fn element_field(element: &TextElement, key: &str) -> Option<Value> {
    let rect = element.geometry;
    let value = match key {
        "text" => Value::String(element.text.clone()),
        "font" => Value::String(element.font.clone()),
        "font_size" => json!(element.font_size),
        "left" => json!(rect.left),
        "top" => json!(rect.top),
        "width" => json!(rect.width),
        "height" => json!(rect.height),
        "color" => element.color.to_json(),
        _ => return element.extra.get(key).cloned(),
    };
    Some(value)
}

fn element_from_value(id: RegionId, value: Value) -> Result<TextElement> {
    let Value::Array(mut variants) = value else {
        return Err(malformed(format!("{} must be a list", id)));
    };
    if variants.len() != 1 {
        return Err(malformed(format!(
            "{} must hold exactly one text element (found {})",
            id,
            variants.len()
        )));
    }
    let Value::Object(mut object) = variants.remove(0) else {
        return Err(malformed(format!("{} entry must be an object", id)));
    };

    let [left, top, width, height] =
        GEOMETRY_FIELDS.map(|field| required_integer(id, &object, field));
    let geometry = Rect::new(left?, top?, width?, height?);
    if geometry.is_empty() {
        return Err(malformed(format!(
            "{} has zero width or height {}",
            id, geometry
        )));
    }

    let font_size = required_integer(id, &object, "font_size")?;
    let text = string_field(id, &object, "text")?;
    let font = string_field(id, &object, "font")?;
    let color = match object.get("color") {
        Some(value) => ColorValue::from_json(value)
            .map_err(|reason| malformed(format!("{}.color: {}", id, reason)))?,
        None => ColorValue::Unresolved,
    };

    let key_order = object.keys().cloned().collect();
    for field in KNOWN_ELEMENT_FIELDS {
        object.remove(field);
    }

    Ok(TextElement {
        text,
        font,
        color,
        font_size,
        geometry,
        extra: object,
        key_order,
    })
}

fn required_integer(id: RegionId, object: &Map<String, Value>, field: &str) -> Result<u32> {
    integer_field(id, object, field)?
        .ok_or_else(|| malformed(format!("{} is missing required field '{}'", id, field)))
}

fn integer_field(id: RegionId, object: &Map<String, Value>, field: &str) -> Result<Option<u32>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|number| u32::try_from(number).ok())
            .map(Some)
            .ok_or_else(|| {
                malformed(format!(
                    "{}.{} must be a non-negative integer (got {})",
                    id, field, value
                ))
            }),
    }
}

fn string_field(id: RegionId, object: &Map<String, Value>, field: &str) -> Result<String> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(malformed(format!(
            "{}.{} must be a string (got {})",
            id, field, other
        ))),
    }
}

fn malformed(message: impl Into<String>) -> LayoutError {
    LayoutError::MalformedDocument(message.into())
}
