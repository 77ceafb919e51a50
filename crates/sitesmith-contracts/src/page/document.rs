use std::sync::Arc;

use anyhow::bail;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::images::ImageStore;

/// A page: the ordered section list, every section record, and the
/// cross-cutting settings (SEO, cart, booking, stripe, scripts) that ride
/// alongside the sections.
///
/// Every key in `section_order` has a record in `sections`. The reverse does
/// not hold: a section removed from the order keeps its record (and its
/// images) so that re-adding it is a plain reorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDocument {
    section_order: Vec<String>,
    sections: IndexMap<String, Value>,
    #[serde(default)]
    extras: Map<String, Value>,
}

impl PageDocument {
    pub fn new(
        section_order: Vec<String>,
        sections: IndexMap<String, Value>,
        extras: Map<String, Value>,
    ) -> anyhow::Result<Self> {
        let document = Self {
            section_order,
            sections,
            extras,
        };
        document.validate()?;
        Ok(document)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn section_order(&self) -> &[String] {
        &self.section_order
    }

    pub fn sections(&self) -> &IndexMap<String, Value> {
        &self.sections
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.sections.get(key)
    }

    pub fn has_section(&self, key: &str) -> bool {
        self.sections.contains_key(key)
    }

    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }

    /// Sections in render order.
    pub fn ordered_sections(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.section_order.iter().filter_map(|key| {
            self.sections
                .get(key)
                .map(|section| (key.as_str(), section))
        })
    }

    /// Records retained after their key left the order.
    pub fn detached_sections(&self) -> Vec<&str> {
        self.sections
            .keys()
            .filter(|key| !self.section_order.contains(key))
            .map(String::as_str)
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let missing = self
            .section_order
            .iter()
            .filter(|key| !self.sections.contains_key(key.as_str()))
            .cloned()
            .collect::<Vec<String>>();
        if !missing.is_empty() {
            bail!(
                "section order references sections without records: [{}]",
                missing.join(", ")
            );
        }
        let mut seen = std::collections::HashSet::new();
        for key in &self.section_order {
            if !seen.insert(key.as_str()) {
                bail!("section order lists '{key}' more than once");
            }
        }
        Ok(())
    }

    /// Copy of this document with a new order. Every key must already have a
    /// record.
    pub fn with_order(&self, order: Vec<String>) -> anyhow::Result<Self> {
        let mut next = self.clone();
        next.section_order = order;
        next.validate()?;
        Ok(next)
    }

    /// Copy of this document with `key` set to `data`. The order is untouched.
    pub fn with_section(&self, key: &str, data: Value) -> Self {
        let mut next = self.clone();
        next.sections.insert(key.to_string(), data);
        next
    }

    /// Copy of this document with several records set and a new order,
    /// validated as one unit.
    pub fn with_sections_and_order(
        &self,
        records: impl IntoIterator<Item = (String, Value)>,
        order: Vec<String>,
    ) -> anyhow::Result<Self> {
        let mut next = self.clone();
        for (key, data) in records {
            next.sections.insert(key, data);
        }
        next.section_order = order;
        next.validate()?;
        Ok(next)
    }

    /// Replaces the record under `from` with `data` under `to`, keeping its
    /// position in both the order and the record map.
    pub fn replace_section(&self, from: &str, to: &str, data: Value) -> Self {
        let mut next = self.clone();
        let mut sections = IndexMap::with_capacity(next.sections.len());
        let mut placed = false;
        for (key, value) in std::mem::take(&mut next.sections) {
            if key == from {
                sections.insert(to.to_string(), data.clone());
                placed = true;
            } else if key != to {
                sections.insert(key, value);
            }
        }
        if !placed {
            sections.insert(to.to_string(), data);
        }
        next.sections = sections;
        let mut order = Vec::with_capacity(next.section_order.len());
        for key in &next.section_order {
            let mapped = if key == from { to } else { key.as_str() };
            if !order.iter().any(|existing: &String| existing == mapped) {
                order.push(mapped.to_string());
            }
        }
        next.section_order = order;
        next
    }
}

/// A coherent `{document, images}` pair, handed to persistence as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    pub document: Arc<PageDocument>,
    pub images: Arc<ImageStore>,
}

impl PageSnapshot {
    pub fn new(document: PageDocument, images: ImageStore) -> Self {
        Self {
            document: Arc::new(document),
            images: Arc::new(images),
        }
    }

    pub fn to_value(&self) -> anyhow::Result<Value> {
        Ok(serde_json::json!({
            "document": serde_json::to_value(self.document.as_ref())?,
            "images": serde_json::to_value(self.images.as_ref())?,
        }))
    }

    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        let document: PageDocument = serde_json::from_value(
            value.get("document").cloned().unwrap_or(Value::Null),
        )?;
        document.validate()?;
        let images: ImageStore = match value.get("images") {
            Some(images) => serde_json::from_value(images.clone())?,
            None => ImageStore::new(),
        };
        Ok(Self::new(document, images))
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::{json, Map, Value};

    use super::PageDocument;

    fn doc(order: &[&str], keys: &[&str]) -> anyhow::Result<PageDocument> {
        let mut sections = IndexMap::new();
        for key in keys {
            sections.insert(key.to_string(), json!({ "title": key }));
        }
        PageDocument::new(
            order.iter().map(|key| key.to_string()).collect(),
            sections,
            Map::new(),
        )
    }

    #[test]
    fn new_rejects_order_keys_without_records() {
        let err = doc(&["hero", "pricing"], &["hero"]).err();
        assert!(err
            .map(|err| err.to_string().contains("pricing"))
            .unwrap_or(false));
    }

    #[test]
    fn new_rejects_duplicate_order_keys() {
        assert!(doc(&["hero", "hero"], &["hero"]).is_err());
    }

    #[test]
    fn with_order_keeps_detached_records() -> anyhow::Result<()> {
        let before = doc(&["hero", "testimonials", "footer"], &["hero", "testimonials", "footer"])?;
        let after = before.with_order(vec!["footer".to_string(), "hero".to_string()])?;
        assert_eq!(after.section_order(), ["footer", "hero"]);
        assert_eq!(after.detached_sections(), vec!["testimonials"]);
        assert_eq!(after.section("hero"), before.section("hero"));
        assert_eq!(before.section_order(), ["hero", "testimonials", "footer"]);
        Ok(())
    }

    #[test]
    fn replace_section_keeps_position() -> anyhow::Result<()> {
        let before = doc(
            &["hero", "generatedProducts", "footer"],
            &["hero", "generatedProducts", "footer"],
        )?;
        let after = before.replace_section("generatedProducts", "products", json!({"itemIds": []}));
        assert_eq!(after.section_order(), ["hero", "products", "footer"]);
        assert_eq!(
            after.sections().keys().cloned().collect::<Vec<String>>(),
            vec!["hero", "products", "footer"]
        );
        after.validate()?;
        Ok(())
    }

    #[test]
    fn ordered_sections_follow_order_not_insertion() -> anyhow::Result<()> {
        let page = doc(&["footer", "hero"], &["hero", "footer"])?;
        let keys = page
            .ordered_sections()
            .map(|(key, _)| key.to_string())
            .collect::<Vec<String>>();
        assert_eq!(keys, vec!["footer", "hero"]);
        Ok(())
    }

    #[test]
    fn serializes_with_camel_case_fields() -> anyhow::Result<()> {
        let page = doc(&["hero"], &["hero"])?;
        let value = serde_json::to_value(&page)?;
        assert_eq!(value["sectionOrder"], json!(["hero"]));
        assert_eq!(value["sections"]["hero"]["title"], Value::String("hero".to_string()));
        Ok(())
    }
}
