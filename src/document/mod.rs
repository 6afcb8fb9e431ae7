mod codec;

use serde_json::{Map, Value};
use std::fmt;

use crate::color::ColorValue;
use crate::error::{LayoutError, Result};
use crate::geometry::Rect;
use crate::heuristics::Heuristics;

pub const USER_INTENTION_KEY: &str = "user_intention";
pub const REGION_PREFIX: &str = "element";

/// 1-based region identifier, rendered as `element<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u32);

impl RegionId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn ordinal(&self) -> u32 {
        self.0
    }

    /// Parses `element<N>` with `N >= 1` and no leading zeros.
    pub fn parse(key: &str) -> Option<Self> {
        let digits = key.strip_prefix(REGION_PREFIX)?;
        if digits.is_empty() || digits.starts_with('0') {
            return None;
        }
        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().map(Self)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REGION_PREFIX, self.0)
    }
}

/// Text slot of one region. Geometry and font size are fixed when the
/// region is created; only text, font and color change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    pub text: String,
    pub font: String,
    pub color: ColorValue,
    font_size: u32,
    geometry: Rect,
    extra: Map<String, Value>,
    key_order: Vec<String>,
}

impl TextElement {
    fn new(geometry: Rect, font_size: u32) -> Self {
        Self {
            text: String::new(),
            font: String::new(),
            color: ColorValue::Unresolved,
            font_size,
            geometry,
            extra: Map::new(),
            key_order: codec::KNOWN_ELEMENT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }

    pub fn font_size(&self) -> u32 {
        self.font_size
    }

    pub fn geometry(&self) -> Rect {
        self.geometry
    }

    /// Fields this crate does not interpret, kept for re-emission.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    fn apply(&mut self, patch: &RegionPatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(font) = &patch.font {
            self.font = font.clone();
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
    }
}

/// Field-level update for one region. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionPatch {
    pub text: Option<String>,
    pub font: Option<String>,
    pub color: Option<ColorValue>,
}

impl RegionPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.font.is_none() && self.color.is_none()
    }
}

/// Partial mapping from region identifier to patch, in arrival order.
/// Keys stay raw strings until merged so unknown identifiers can be reported
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentUpdate {
    patches: Vec<(String, RegionPatch)>,
}

impl EnrichmentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, patch: RegionPatch) -> Self {
        self.insert(id, patch);
        self
    }

    /// Later patches for the same identifier replace earlier ones.
    pub fn insert(&mut self, id: impl Into<String>, patch: RegionPatch) {
        let id = id.into();
        if let Some(slot) = self.patches.iter_mut().find(|(key, _)| *key == id) {
            slot.1 = patch;
        } else {
            self.patches.push((id, patch));
        }
    }

    pub fn get(&self, id: &str) -> Option<&RegionPatch> {
        self.patches
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, patch)| patch)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegionPatch)> {
        self.patches.iter().map(|(key, patch)| (key.as_str(), patch))
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Ordered regions plus the user's free-text design intention.
///
/// Key order of a parsed document is kept so that writing it back only
/// changes the values that were edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutDocument {
    user_intention: String,
    regions: Vec<TextElement>,
    extra: Map<String, Value>,
    key_order: Vec<String>,
}

impl LayoutDocument {
    /// Skeleton document with one unresolved region per rectangle, in order.
    pub fn create(rects: &[Rect], user_intention: impl Into<String>) -> Result<Self> {
        Self::create_with(rects, user_intention, &Heuristics::default())
    }

    pub fn create_with(
        rects: &[Rect],
        user_intention: impl Into<String>,
        heuristics: &Heuristics,
    ) -> Result<Self> {
        let regions = rects
            .iter()
            .enumerate()
            .map(|(idx, rect)| {
                if rect.is_empty() {
                    return Err(
                        LayoutError::geometry(*rect, "rectangle has zero area")
                            .with_region(RegionId::from_index(idx)),
                    );
                }
                Ok(TextElement::new(*rect, heuristics.font_size(rect.height)))
            })
            .collect::<Result<Vec<_>>>()?;
        let key_order = std::iter::once(USER_INTENTION_KEY.to_string())
            .chain((0..regions.len()).map(|idx| RegionId::from_index(idx).to_string()))
            .collect();
        Ok(Self {
            user_intention: user_intention.into(),
            regions,
            extra: Map::new(),
            key_order,
        })
    }

    pub fn user_intention(&self) -> &str {
        &self.user_intention
    }

    pub fn set_user_intention(&mut self, value: impl Into<String>) {
        self.user_intention = value.into();
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&TextElement> {
        self.regions.get(id.index())
    }

    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut TextElement> {
        self.regions.get_mut(id.index())
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &TextElement)> {
        self.regions
            .iter()
            .enumerate()
            .map(|(idx, element)| (RegionId::from_index(idx), element))
    }

    /// Top-level keys this crate does not interpret, kept for re-emission.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Resolves an update key to a region of this document.
    pub fn resolve_id(&self, key: &str) -> Result<RegionId> {
        RegionId::parse(key)
            .filter(|id| id.index() < self.regions.len())
            .ok_or_else(|| LayoutError::UnknownRegion(key.to_string()))
    }

    /// Checks every key of `update` without touching the document.
    pub fn validate_update(&self, update: &EnrichmentUpdate) -> Result<()> {
        for (key, _) in update.iter() {
            self.resolve_id(key)?;
        }
        Ok(())
    }

    /// Overwrites the supplied text/font/color fields. All identifiers are
    /// checked first, so an unknown one leaves the document untouched.
    pub fn merge_enrichment(&mut self, update: &EnrichmentUpdate) -> Result<()> {
        let targets = update
            .iter()
            .map(|(key, patch)| Ok((self.resolve_id(key)?, patch)))
            .collect::<Result<Vec<_>>>()?;
        for (id, patch) in targets {
            self.regions[id.index()].apply(patch);
        }
        Ok(())
    }

    /// Regions whose text has not been generated yet.
    pub fn unresolved_regions(&self) -> Vec<RegionId> {
        self.regions()
            .filter(|(_, element)| !element.has_text())
            .map(|(id, _)| id)
            .collect()
    }
}
