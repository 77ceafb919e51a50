use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sitesmith_contracts::catalog::{CatalogItem, NewCatalogItem};
use sitesmith_contracts::page::PageSnapshot;
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::{
    CatalogStore, PageSink, PageSource, PageSummary, SavedPage, StoredPage,
};
use crate::context::CallContext;
use crate::{now_utc_iso, short_id};

/// One pretty-printed JSON file per page under `<root>/pages/`, plus the
/// product catalog those pages reference in `<root>/catalog.json`.
#[derive(Debug, Clone)]
pub struct FilePageStore {
    root: PathBuf,
}

impl FilePageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(&self, page_id: &str) -> Result<PathBuf> {
        let valid = !page_id.is_empty()
            && page_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            bail!("invalid page id '{page_id}' (use letters, digits, '-' or '_')");
        }
        Ok(self.root.join("pages").join(format!("{page_id}.json")))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    /// Catalog records for `owner_id`, in creation order.
    pub fn catalog_items(&self, owner_id: &str) -> Result<Vec<CatalogItem>> {
        Ok(self
            .read_catalog()?
            .items
            .into_iter()
            .filter(|entry| entry.owner == owner_id)
            .map(|entry| entry.item)
            .collect())
    }

    fn read_catalog(&self) -> Result<CatalogFile> {
        let path = self.catalog_path();
        if !path.exists() {
            return Ok(CatalogFile::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading catalog {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("catalog {} is not valid JSON", path.display()))
    }

    fn write_catalog(&self, catalog: &CatalogFile) -> Result<()> {
        let path = self.catalog_path();
        fs::create_dir_all(&self.root)?;
        fs::write(&path, serde_json::to_string_pretty(catalog)?)
            .with_context(|| format!("failed writing catalog {}", path.display()))
    }
}

/// `next_id` only grows, so ids of deleted records are never reissued.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    items: Vec<CatalogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogEntry {
    owner: String,
    item: CatalogItem,
}

impl CatalogStore for FilePageStore {
    fn create_item(
        &self,
        ctx: &CallContext,
        owner_id: &str,
        item: &NewCatalogItem,
    ) -> Result<CatalogItem> {
        ctx.ensure_active()?;
        let mut catalog = self.read_catalog()?;
        let record = CatalogItem {
            id: format!("item-{}", short_id(&item.name, catalog.next_id)),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            category: item.category.clone(),
            image: item.image.clone(),
        };
        catalog.next_id += 1;
        catalog.items.push(CatalogEntry {
            owner: owner_id.to_string(),
            item: record.clone(),
        });
        self.write_catalog(&catalog)?;
        Ok(record)
    }

    fn delete_item(&self, _ctx: &CallContext, owner_id: &str, item_id: &str) -> Result<()> {
        let mut catalog = self.read_catalog()?;
        let before = catalog.items.len();
        catalog
            .items
            .retain(|entry| !(entry.owner == owner_id && entry.item.id == item_id));
        if catalog.items.len() == before {
            bail!("catalog item '{item_id}' not found for owner '{owner_id}'");
        }
        self.write_catalog(&catalog)
    }
}

impl PageSource for FilePageStore {
    fn list_pages(&self, ctx: &CallContext) -> Result<Vec<PageSummary>> {
        ctx.ensure_active()?;
        let dir = self.root.join("pages");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut pages = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("failed listing {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(payload) = read_json_object(&path) else {
                continue;
            };
            let id = text(&payload, "id").unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default()
                    .to_string()
            });
            pages.push(PageSummary {
                title: text(&payload, "title").unwrap_or_else(|| id.clone()),
                updated_at: text(&payload, "updatedAt"),
                id,
            });
        }
        pages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pages)
    }

    fn fetch_page(&self, ctx: &CallContext, page_id: &str) -> Result<StoredPage> {
        ctx.ensure_active()?;
        let path = self.page_path(page_id)?;
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading page {}", path.display()))?;
        let payload: Value = serde_json::from_str(&raw)
            .with_context(|| format!("page {} is not valid JSON", path.display()))?;
        let snapshot = PageSnapshot::from_value(payload.get("snapshot").unwrap_or(&Value::Null))
            .with_context(|| format!("page {} holds an invalid snapshot", path.display()))?;
        let request = match payload.get("request") {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value::<GenerationRequest>(value.clone())?),
        };
        Ok(StoredPage {
            id: page_id.to_string(),
            title: payload
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(page_id)
                .to_string(),
            snapshot,
            request,
        })
    }
}

impl PageSink for FilePageStore {
    fn save(
        &self,
        ctx: &CallContext,
        page_id: &str,
        snapshot: &PageSnapshot,
        request: Option<&GenerationRequest>,
        config: &Map<String, Value>,
    ) -> Result<SavedPage> {
        ctx.ensure_active()?;
        let path = self.page_path(page_id)?;
        let saved_at = now_utc_iso();
        // A save without page settings keeps the ones already on disk.
        let previous = read_json_object(&path);
        let config = match previous.as_ref().and_then(|page| page.get("config")) {
            Some(Value::Object(stored)) if config.is_empty() => stored.clone(),
            _ => config.clone(),
        };
        let title = text(&config, "title")
            .or_else(|| previous.as_ref().and_then(|page| text(page, "title")))
            .or_else(|| {
                snapshot
                    .document
                    .extras()
                    .get("seo")
                    .and_then(|seo| seo.get("title"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| page_id.to_string());
        let payload = json!({
            "id": page_id,
            "title": title,
            "updatedAt": saved_at,
            "config": config,
            "request": request,
            "snapshot": snapshot.to_value()?,
        });
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed writing page {}", path.display()))?;
        Ok(SavedPage {
            id: page_id.to_string(),
            saved_at,
        })
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}
