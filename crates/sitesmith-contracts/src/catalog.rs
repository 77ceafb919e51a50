use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::page::GENERATED_PRODUCTS_KEY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCategory {
    pub id: String,
    pub name: String,
}

/// A persisted catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// A catalog record before persistence, as proposed by the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// The generated-products pseudo-section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedProducts {
    pub title: String,
    pub subtitle: String,
    pub items: Vec<NewCatalogItem>,
}

impl GeneratedProducts {
    /// Parses the pseudo-section. Items that do not deserialize are reported
    /// back by index instead of failing the whole section.
    pub fn from_value(value: &Value) -> anyhow::Result<(Self, Vec<usize>)> {
        let Some(obj) = value.as_object() else {
            anyhow::bail!("{GENERATED_PRODUCTS_KEY} section is not an object");
        };
        let mut skipped = Vec::new();
        let mut items = Vec::new();
        let rows = obj
            .get("items")
            .or_else(|| obj.get("products"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for (idx, row) in rows.into_iter().enumerate() {
            match serde_json::from_value::<NewCatalogItem>(row) {
                Ok(item) if !item.name.trim().is_empty() => items.push(item),
                _ => skipped.push(idx),
            }
        }
        Ok((
            Self {
                title: text(obj, "title"),
                subtitle: text(obj, "subtitle"),
                items,
            },
            skipped,
        ))
    }

    /// The thin reference section that replaces the pseudo-section.
    pub fn reference_section(&self, item_ids: &[String]) -> Value {
        json!({
            "title": self.title,
            "subtitle": self.subtitle,
            "itemIds": item_ids,
        })
    }
}

/// Matches `proposed` against the known categories by id or by name
/// (case-insensitive) and returns the canonical name. On a miss, falls back to
/// the first known category, then to `default_category`.
pub fn validate_category(
    proposed: &str,
    categories: &[CatalogCategory],
    default_category: &str,
) -> (String, bool) {
    let needle = proposed.trim();
    if let Some(found) = categories.iter().find(|category| {
        category.id == needle || category.name.eq_ignore_ascii_case(needle)
    }) {
        return (found.name.clone(), true);
    }
    let fallback = categories
        .first()
        .map(|category| category.name.clone())
        .unwrap_or_else(|| default_category.to_string());
    (fallback, false)
}

fn text(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
