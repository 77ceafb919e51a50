use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogCategory, CatalogItem};

/// Snapshot of everything one "Generate" action needs. Built once, shared
/// read-only for the rest of the session (incremental section generation
/// reuses its brief, tone, palette, industry and media library).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub brief: String,
    pub tone: String,
    pub palette: Vec<String>,
    pub industry: String,
    pub section_order: Vec<String>,
    #[serde(default)]
    pub media_library: Vec<String>,
    #[serde(default)]
    pub categories: Vec<CatalogCategory>,
    #[serde(default)]
    pub products: Vec<CatalogItem>,
    /// Old-site and inspiration URLs.
    #[serde(default)]
    pub style_refs: Vec<String>,
}

impl GenerationRequest {
    pub fn new(brief: impl Into<String>, section_order: Vec<String>) -> Self {
        Self {
            brief: brief.into(),
            tone: "friendly".to_string(),
            section_order,
            ..Self::default()
        }
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_palette(mut self, palette: Vec<String>) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = industry.into();
        self
    }

    pub fn with_media_library(mut self, media_library: Vec<String>) -> Self {
        self.media_library = media_library;
        self
    }

    pub fn with_categories(mut self, categories: Vec<CatalogCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_products(mut self, products: Vec<CatalogItem>) -> Self {
        self.products = products;
        self
    }

    pub fn with_style_refs(mut self, style_refs: Vec<String>) -> Self {
        self.style_refs = style_refs;
        self
    }
}
