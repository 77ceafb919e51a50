use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sitesmith_contracts::catalog::{CatalogItem, NewCatalogItem};
use sitesmith_contracts::page::{PageDocument, PageSnapshot};
use sitesmith_contracts::request::GenerationRequest;

use crate::context::CallContext;

/// Produces page content from a brief.
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Full page document for the request's section order.
    fn generate_structure(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<PageDocument>;

    /// One section record, generated on its own.
    fn generate_section(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
        section_key: &str,
    ) -> Result<Value>;
}

/// Turns a prompt into an image reference (URL or data blob).
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate_image(&self, ctx: &CallContext, prompt: &str, aspect_ratio: &str)
        -> Result<String>;
}

pub trait CatalogStore: Send + Sync {
    fn create_item(
        &self,
        ctx: &CallContext,
        owner_id: &str,
        item: &NewCatalogItem,
    ) -> Result<CatalogItem>;

    fn delete_item(&self, ctx: &CallContext, owner_id: &str, item_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPage {
    pub id: String,
    pub title: String,
    pub snapshot: PageSnapshot,
    pub request: Option<GenerationRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedPage {
    pub id: String,
    pub saved_at: String,
}

/// Where pages are loaded from.
pub trait PageSource: Send + Sync {
    fn list_pages(&self, ctx: &CallContext) -> Result<Vec<PageSummary>>;
    fn fetch_page(&self, ctx: &CallContext, page_id: &str) -> Result<StoredPage>;
}

/// Where pages are saved to.
pub trait PageSink: Send + Sync {
    fn save(
        &self,
        ctx: &CallContext,
        page_id: &str,
        snapshot: &PageSnapshot,
        request: Option<&GenerationRequest>,
        config: &Map<String, Value>,
    ) -> Result<SavedPage>;
}

/// The collaborators a session runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub catalog: Arc<dyn CatalogStore>,
}

#[derive(Default)]
pub struct ImageGeneratorRegistry {
    generators: BTreeMap<String, Arc<dyn ImageGenerator>>,
}

impl ImageGeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Arc::new(generator));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageGenerator>> {
        self.generators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}
