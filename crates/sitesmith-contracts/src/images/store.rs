use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resolver::{resolve_image, ImageResolution};
use super::slots::image_fields;
use crate::page::PageDocument;

/// Where a stored image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "src", rename_all = "snake_case")]
pub enum ImageRef {
    /// Field value was already a URL or data blob.
    Literal(String),
    /// Produced by the image generator.
    Generated(String),
    /// Fallback stored after a failed generation.
    Placeholder(String),
}

impl ImageRef {
    pub fn src(&self) -> &str {
        match self {
            Self::Literal(src) | Self::Generated(src) | Self::Placeholder(src) => src.as_str(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

/// Slot key to image reference. Also used as the patch type returned by an
/// image batch; merging is a plain map union where the patch wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageStore {
    entries: BTreeMap<String, ImageRef>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &str) -> Option<&ImageRef> {
        self.entries.get(slot)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.entries.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageRef)> {
        self.entries.iter().map(|(slot, image)| (slot.as_str(), image))
    }

    pub fn insert(&mut self, slot: impl Into<String>, image: ImageRef) {
        self.entries.insert(slot.into(), image);
    }

    pub fn merge(&mut self, patch: &ImageStore) {
        for (slot, image) in &patch.entries {
            self.entries.insert(slot.clone(), image.clone());
        }
    }

    /// Copy of this store with `patch` applied on top.
    pub fn merged(&self, patch: &ImageStore) -> ImageStore {
        let mut next = self.clone();
        next.merge(patch);
        next
    }

    pub fn placeholder_slots(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, image)| image.is_placeholder())
            .map(|(slot, _)| slot.as_str())
            .collect()
    }
}

impl FromIterator<(String, ImageRef)> for ImageStore {
    fn from_iter<T: IntoIterator<Item = (String, ImageRef)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Slots of ordered sections whose field asks for an image but have no store
/// entry. Empty once generation has settled.
pub fn unresolved_slots(document: &PageDocument, images: &ImageStore) -> Vec<String> {
    let mut missing = Vec::new();
    for (key, data) in document.ordered_sections() {
        for field in image_fields(key, data) {
            if resolve_image(field.value.as_deref()) == ImageResolution::Nothing {
                continue;
            }
            if !images.contains(&field.slot) {
                missing.push(field.slot);
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::{json, Map};

    use super::{unresolved_slots, ImageRef, ImageStore};
    use crate::page::PageDocument;

    #[test]
    fn merge_is_a_union_where_the_patch_wins() {
        let mut store = ImageStore::new();
        store.insert("hero", ImageRef::Generated("data:a".to_string()));
        store.insert("logo", ImageRef::Literal("https://x/logo.png".to_string()));

        let mut patch = ImageStore::new();
        patch.insert("hero", ImageRef::Placeholder("placeholder".to_string()));
        patch.insert("gallery_0", ImageRef::Generated("data:b".to_string()));

        let merged = store.merged(&patch);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("hero").map(ImageRef::src), Some("placeholder"));
        assert_eq!(merged.placeholder_slots(), vec!["hero"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn serializes_as_a_flat_map() -> anyhow::Result<()> {
        let mut store = ImageStore::new();
        store.insert("hero", ImageRef::Generated("data:a".to_string()));
        let value = serde_json::to_value(&store)?;
        assert_eq!(value, json!({"hero": {"kind": "generated", "src": "data:a"}}));
        let parsed: ImageStore = serde_json::from_value(value)?;
        assert_eq!(parsed, store);
        Ok(())
    }

    #[test]
    fn unresolved_slots_ignores_empty_fields_and_detached_sections() -> anyhow::Result<()> {
        let mut sections = IndexMap::new();
        sections.insert(
            "testimonials".to_string(),
            json!({"items": [{"avatar": "a"}, {"name": "no avatar"}]}),
        );
        sections.insert("gallery".to_string(), json!({"images": ["x"]}));
        let document = PageDocument::new(vec!["testimonials".to_string()], sections, Map::new())?;

        let mut images = ImageStore::new();
        assert_eq!(unresolved_slots(&document, &images), vec!["testimonial_0"]);
        images.insert("testimonial_0", ImageRef::Generated("data:a".to_string()));
        assert!(unresolved_slots(&document, &images).is_empty());
        Ok(())
    }
}
