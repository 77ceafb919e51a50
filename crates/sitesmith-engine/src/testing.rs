//! Scripted collaborators for session tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use sitesmith_contracts::catalog::{CatalogItem, NewCatalogItem};
use sitesmith_contracts::page::{PageDocument, GENERATED_PRODUCTS_KEY};
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::{
    CatalogStore, Collaborators, ContentGenerator, ImageGenerator, PageSource, PageSummary,
    StoredPage,
};
use crate::context::CallContext;
use crate::error::EngineError;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Content with fixed, recognisable prompts. `hook` runs with the section key
/// (or `"structure"`) before each call returns. The hook is called without
/// the slot lock held, so calls from several threads may block in it at once.
#[derive(Default)]
pub struct ScriptedContent {
    pub fail_structure: bool,
    pub fail_sections: HashSet<String>,
    pub overrides: HashMap<String, Value>,
    pub section_calls: Mutex<Vec<String>>,
    pub structure_calls: AtomicUsize,
    pub hook: Mutex<Option<Hook>>,
}

impl ScriptedContent {
    pub fn set_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.hook.lock() {
            *slot = Some(Arc::new(hook));
        }
    }

    pub fn section_calls(&self) -> Vec<String> {
        self.section_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn run_hook(&self, key: &str) {
        let hook = self.hook.lock().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(key);
        }
    }

    fn record(&self, key: &str) -> Value {
        if let Some(data) = self.overrides.get(key) {
            return data.clone();
        }
        match key {
            "hero" => json!({
                "headline": "Fresh bread daily",
                "backgroundType": "image",
                "backgroundImage": "warm bakery interior at dawn",
            }),
            "testimonials" => json!({
                "items": (0..3)
                    .map(|idx| json!({
                        "quote": format!("Quote {idx}"),
                        "avatar": format!("avatar of customer {idx}"),
                    }))
                    .collect::<Vec<Value>>(),
            }),
            "gallery" => json!({
                "images": ["gallery shot 0", "gallery shot 1"],
            }),
            "pricing" => json!({ "plans": [{ "name": "Basic", "price": 9 }] }),
            other => json!({ "title": format!("{other} section") }),
        }
    }
}

impl ContentGenerator for ScriptedContent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_structure(
        &self,
        _ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<PageDocument> {
        self.structure_calls.fetch_add(1, Ordering::SeqCst);
        self.run_hook("structure");
        if self.fail_structure {
            bail!("structure model refused");
        }
        let mut sections = IndexMap::new();
        let mut order = Vec::new();
        for key in &request.section_order {
            if key == "products" {
                sections.insert(
                    GENERATED_PRODUCTS_KEY.to_string(),
                    json!({
                        "title": "Our bakes",
                        "subtitle": "Straight from the oven",
                        "items": [
                            { "name": "Sourdough", "price": 6.5, "category": "bread" },
                            { "name": "Rocket", "price": 1.0, "category": "Spaceships" },
                            { "name": "Cheesecake", "price": 4.0, "category": "cakes" },
                        ],
                    }),
                );
                order.push(GENERATED_PRODUCTS_KEY.to_string());
            } else {
                sections.insert(key.clone(), self.record(key));
                order.push(key.clone());
            }
        }
        PageDocument::new(order, sections, Map::new())
    }

    fn generate_section(
        &self,
        _ctx: &CallContext,
        _request: &GenerationRequest,
        section_key: &str,
    ) -> Result<Value> {
        if let Ok(mut calls) = self.section_calls.lock() {
            calls.push(section_key.to_string());
        }
        self.run_hook(section_key);
        if self.fail_sections.contains(section_key) {
            bail!("section model refused '{section_key}'");
        }
        Ok(self.record(section_key))
    }
}

/// Returns `gen://<prompt>`; fails for prompts containing any of `fail_on`.
#[derive(Default)]
pub struct RecordingImages {
    pub fail_on: Vec<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingImages {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: vec![needle.to_string()],
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl ImageGenerator for RecordingImages {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate_image(
        &self,
        _ctx: &CallContext,
        prompt: &str,
        _aspect_ratio: &str,
    ) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if self.fail_on.iter().any(|needle| prompt.contains(needle)) {
            bail!("image model rejected prompt");
        }
        Ok(format!("gen://{prompt}"))
    }
}

/// Hands out `sku-<n>` ids. Creation number `fail_on_create` (0-based) fails.
#[derive(Default)]
pub struct ScriptedCatalog {
    pub fail_on_create: Option<usize>,
    pub fail_delete: HashSet<String>,
    pub creates: AtomicUsize,
    pub live: Mutex<Vec<CatalogItem>>,
}

impl ScriptedCatalog {
    pub fn live_ids(&self) -> Vec<String> {
        self.live
            .lock()
            .map(|items| items.iter().map(|item| item.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn live_items(&self) -> Vec<CatalogItem> {
        self.live
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }
}

impl CatalogStore for ScriptedCatalog {
    fn create_item(
        &self,
        _ctx: &CallContext,
        _owner_id: &str,
        item: &NewCatalogItem,
    ) -> Result<CatalogItem> {
        let idx = self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_create == Some(idx) {
            bail!("catalog write rejected");
        }
        let record = CatalogItem {
            id: format!("sku-{idx}"),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            category: item.category.clone(),
            image: item.image.clone(),
        };
        self.live
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))?
            .push(record.clone());
        Ok(record)
    }

    fn delete_item(&self, _ctx: &CallContext, _owner_id: &str, item_id: &str) -> Result<()> {
        if self.fail_delete.contains(item_id) {
            bail!("catalog delete rejected for {item_id}");
        }
        self.live
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))?
            .retain(|item| item.id != item_id);
        Ok(())
    }
}

/// Times out `timeouts` times, then serves `page`.
pub struct FlakySource {
    pub timeouts: usize,
    pub calls: AtomicUsize,
    pub page: StoredPage,
}

impl FlakySource {
    fn attempt(&self, operation: &str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.timeouts {
            return Err(anyhow!("upstream stalled").context(EngineError::Timeout {
                operation: operation.to_string(),
            }));
        }
        Ok(())
    }
}

impl PageSource for FlakySource {
    fn list_pages(&self, _ctx: &CallContext) -> Result<Vec<PageSummary>> {
        self.attempt("list_pages")?;
        Ok(vec![PageSummary {
            id: self.page.id.clone(),
            title: self.page.title.clone(),
            updated_at: None,
        }])
    }

    fn fetch_page(&self, _ctx: &CallContext, page_id: &str) -> Result<StoredPage> {
        self.attempt("fetch_page")?;
        if page_id != self.page.id {
            bail!("no page '{page_id}'");
        }
        Ok(self.page.clone())
    }
}

pub fn collaborators(
    content: &Arc<ScriptedContent>,
    images: &Arc<RecordingImages>,
    catalog: &Arc<ScriptedCatalog>,
) -> Collaborators {
    Collaborators {
        content: content.clone(),
        images: images.clone(),
        catalog: catalog.clone(),
    }
}
