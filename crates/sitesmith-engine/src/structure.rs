use anyhow::{Context, Result};
use serde_json::json;
use sitesmith_contracts::catalog::{validate_category, CatalogItem, GeneratedProducts};
use sitesmith_contracts::events::EventWriter;
use sitesmith_contracts::images::{image_fields, resolve_image, ImageRef, ImageResolution, ImageStore};
use sitesmith_contracts::page::{PageDocument, GENERATED_PRODUCTS_KEY, PRODUCTS_KEY};
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::{CatalogStore, ContentGenerator};
use crate::config::EngineConfig;
use crate::context::{CallContext, StatusSink};
use crate::error::EngineError;
use crate::orchestrator::{ImageJob, ImageOrchestrator};
use crate::{error_chain_text, map_object};

/// A freshly generated page. `document` and `images` only ever travel
/// together.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPage {
    pub document: PageDocument,
    pub images: ImageStore,
    pub created_items: Vec<CatalogItem>,
}

pub struct PageStructureGenerator<'a> {
    pub content: &'a dyn ContentGenerator,
    pub catalog: &'a dyn CatalogStore,
    pub orchestrator: ImageOrchestrator<'a>,
    pub config: &'a EngineConfig,
    pub events: &'a EventWriter,
}

impl PageStructureGenerator<'_> {
    /// Structure, then product sync, then images. Content failures and
    /// catalog failures abort; image failures become placeholders.
    pub fn generate(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
        status: &dyn StatusSink,
    ) -> Result<GeneratedPage> {
        status.set_stage(Some("Generating page structure"));
        let document = self
            .content
            .generate_structure(ctx, request)
            .and_then(|document| {
                document.validate()?;
                Ok(document)
            })
            .with_context(|| EngineError::content("structure"))?;
        ctx.ensure_active()?;
        self.events.emit(
            "content_generated",
            map_object(json!({
                "provider": self.content.name(),
                "sections": document.section_order(),
            })),
        )?;

        let (document, created_items) = if document.has_section(GENERATED_PRODUCTS_KEY) {
            status.set_stage(Some("Creating products"));
            self.sync_products(ctx, request, document)?
        } else {
            (document, Vec::new())
        };
        ctx.ensure_active()?;

        let (mut images, jobs) = collect_image_work(&document);
        if !jobs.is_empty() {
            status.set_stage(Some("Generating images"));
            let patch = self.orchestrator.generate_batch(ctx, &jobs);
            images.merge(&patch);
        }

        Ok(GeneratedPage {
            document,
            images,
            created_items,
        })
    }

    /// Persists every generated product and swaps the pseudo-section for a
    /// `{title, subtitle, itemIds}` reference section. If any creation fails,
    /// the items created so far are deleted again before the error is
    /// returned.
    fn sync_products(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
        document: PageDocument,
    ) -> Result<(PageDocument, Vec<CatalogItem>)> {
        let raw = document
            .section(GENERATED_PRODUCTS_KEY)
            .cloned()
            .unwrap_or_default();
        let (section, skipped) = GeneratedProducts::from_value(&raw)
            .with_context(|| EngineError::content("generated products"))?;

        let mut created: Vec<CatalogItem> = Vec::new();
        for item in &section.items {
            let (category, matched) = validate_category(
                &item.category,
                &request.categories,
                &self.config.default_category,
            );
            if !matched {
                self.events.emit(
                    "product_category_substituted",
                    map_object(json!({
                        "product": item.name,
                        "proposed": item.category,
                        "category": category,
                    })),
                )?;
            }
            let mut validated = item.clone();
            validated.category = category;

            let result = ctx.ensure_active().and_then(|_| {
                self.catalog
                    .create_item(ctx, &self.config.owner_id, &validated)
            });
            match result {
                Ok(record) => created.push(record),
                Err(err) => return Err(self.roll_back_products(ctx, created, err)),
            }
        }

        let item_ids = created
            .iter()
            .map(|item| item.id.clone())
            .collect::<Vec<String>>();
        self.events.emit(
            "products_synced",
            map_object(json!({
                "item_ids": item_ids,
                "skipped_rows": skipped,
            })),
        )?;
        let reference = section.reference_section(&item_ids);
        let document = document.replace_section(GENERATED_PRODUCTS_KEY, PRODUCTS_KEY, reference);
        Ok((document, created))
    }

    fn roll_back_products(
        &self,
        ctx: &CallContext,
        created: Vec<CatalogItem>,
        err: anyhow::Error,
    ) -> anyhow::Error {
        let created_ids = created
            .iter()
            .map(|item| item.id.clone())
            .collect::<Vec<String>>();
        let mut rolled_back = Vec::new();
        let mut orphaned = Vec::new();
        // Compensating deletes run even for a cancelled session.
        let cleanup_ctx = CallContext::new(ctx.epoch());
        for item in created.iter().rev() {
            match self
                .catalog
                .delete_item(&cleanup_ctx, &self.config.owner_id, &item.id)
            {
                Ok(()) => rolled_back.push(item.id.clone()),
                Err(delete_err) => {
                    let _ = self.events.emit(
                        "catalog_rollback_failed",
                        map_object(json!({
                            "item_id": item.id,
                            "error": error_chain_text(&delete_err, 512),
                        })),
                    );
                    orphaned.push(item.id.clone());
                }
            }
        }
        let _ = self.events.emit(
            "catalog_rollback",
            map_object(json!({
                "created": created_ids,
                "rolled_back": rolled_back,
                "orphaned": orphaned,
                "error": error_chain_text(&err, 1024),
            })),
        );
        err.context(EngineError::CatalogSync {
            created: created_ids,
            rolled_back,
            orphaned,
        })
    }
}

/// Literal image fields go straight into the store; prompts become jobs.
pub fn collect_image_work(document: &PageDocument) -> (ImageStore, Vec<ImageJob>) {
    let mut images = ImageStore::new();
    let mut jobs = Vec::new();
    for (key, data) in document.sections() {
        for field in image_fields(key, data) {
            match resolve_image(field.value.as_deref()) {
                ImageResolution::Nothing => {}
                ImageResolution::Literal(src) => images.insert(field.slot, ImageRef::Literal(src)),
                ImageResolution::Prompt(prompt) => {
                    jobs.push(ImageJob::new(field.slot, prompt, field.aspect_ratio))
                }
            }
        }
    }
    (images, jobs)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::{json, Map};
    use sitesmith_contracts::images::ImageRef;
    use sitesmith_contracts::page::PageDocument;

    use super::collect_image_work;
    use crate::orchestrator::ImageJob;

    #[test]
    fn literals_are_stored_and_prompts_become_jobs() -> anyhow::Result<()> {
        let mut sections = IndexMap::new();
        sections.insert(
            "hero".to_string(),
            json!({
                "layout": "split",
                "splitImage": "baker kneading dough",
                "backgroundType": "image",
                "backgroundImage": "data:image/png;base64,AAAA",
            }),
        );
        sections.insert(
            "nav".to_string(),
            json!({ "logoType": "image", "logoImage": "https://cdn.example.com/logo.png" }),
        );
        sections.insert(
            "gallery".to_string(),
            json!({ "images": ["https://cdn.example.com/1.jpg", { "image": "harbour at dusk" }] }),
        );
        sections.insert("footer".to_string(), json!({ "text": "Open daily" }));
        let document = PageDocument::new(
            vec![
                "nav".to_string(),
                "hero".to_string(),
                "gallery".to_string(),
                "footer".to_string(),
            ],
            sections,
            Map::new(),
        )?;

        let (images, jobs) = collect_image_work(&document);

        assert_eq!(
            images.get("logo"),
            Some(&ImageRef::Literal("https://cdn.example.com/logo.png".to_string()))
        );
        assert_eq!(
            images.get("gallery_0"),
            Some(&ImageRef::Literal("https://cdn.example.com/1.jpg".to_string()))
        );
        assert_eq!(images.len(), 2);
        assert_eq!(
            jobs,
            vec![
                ImageJob::new("hero_split", "baker kneading dough", "4:5"),
                ImageJob::new("gallery_1", "harbour at dusk", "4:3"),
            ]
        );
        Ok(())
    }
}
