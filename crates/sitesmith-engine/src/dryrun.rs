use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use indexmap::IndexMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sitesmith_contracts::catalog::{CatalogItem, NewCatalogItem};
use sitesmith_contracts::page::{PageDocument, SectionKind, GENERATED_PRODUCTS_KEY, PRODUCTS_KEY};
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::{CatalogStore, ContentGenerator, ImageGenerator};
use crate::context::CallContext;
use crate::{map_object, short_id};

/// Offline content generator: deterministic section records built from the
/// brief, with image prompts wherever a section owns image slots.
pub struct DryrunContentGenerator;

impl ContentGenerator for DryrunContentGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_structure(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<PageDocument> {
        let mut order = Vec::new();
        let mut sections = IndexMap::new();
        for key in &request.section_order {
            ctx.ensure_active()?;
            // The catalog section comes back as the pseudo-section; the
            // generator on the engine side turns it into real records.
            let (key, data) = if key == PRODUCTS_KEY {
                (GENERATED_PRODUCTS_KEY.to_string(), generated_products(request))
            } else {
                (key.clone(), self.generate_section(ctx, request, key)?)
            };
            if sections.contains_key(&key) {
                continue;
            }
            order.push(key.clone());
            sections.insert(key, data);
        }
        let extras = map_object(json!({
            "seo": {
                "title": headline(request),
                "description": truncate_brief(&request.brief, 150),
            },
            "scripts": [],
        }));
        PageDocument::new(order, sections, extras)
    }

    fn generate_section(
        &self,
        _ctx: &CallContext,
        request: &GenerationRequest,
        section_key: &str,
    ) -> Result<Value> {
        let subject = subject(request);
        let section = match SectionKind::from_key(section_key) {
            SectionKind::Hero => json!({
                "headline": headline(request),
                "subheadline": truncate_brief(&request.brief, 120),
                "layout": "centered",
                "backgroundType": "image",
                "backgroundImage": format!("{subject}, wide establishing shot, {} mood", request.tone),
                "cta": {"label": "Get started", "href": "#contact"},
            }),
            SectionKind::Nav => json!({
                "logoType": "image",
                "logoImage": format!("minimal logo mark for {subject}"),
                "links": ["About", "Services", "Contact"],
            }),
            SectionKind::Testimonials => {
                let items = ["Ana", "Bo", "Cy"]
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "quote": format!("{name} loved working with us."),
                            "avatar": format!("friendly portrait of {name}, a happy {subject} customer"),
                        })
                    })
                    .collect::<Vec<Value>>();
                json!({ "title": "What people say", "items": items })
            }
            SectionKind::Gallery => json!({
                "title": "Gallery",
                "images": (1..=4).map(|idx| json!({
                    "image": format!("{subject}, detail shot {idx}"),
                    "caption": format!("Moment {idx}"),
                })).collect::<Vec<Value>>(),
            }),
            SectionKind::Course => json!({
                "title": format!("{} masterclass", title_case(&request.industry)),
                "mediaType": "image",
                "bannerImage": format!("{subject}, online course banner"),
                "chapters": [
                    {"id": "basics", "title": "Basics", "image": format!("{subject}, first steps"), "lessons": [
                        {"id": "basics-1", "title": "Welcome"},
                        {"id": "basics-2", "title": "Tools", "image": format!("{subject}, tools laid out")},
                    ]},
                    {"id": "advanced", "title": "Advanced", "lessons": []},
                ],
            }),
            SectionKind::Products | SectionKind::GeneratedProducts => {
                json!({"title": "Shop", "subtitle": "", "itemIds": []})
            }
            SectionKind::Other => json!({
                "title": title_case(section_key),
                "body": format!("{} for {}.", title_case(section_key), headline(request)),
            }),
        };
        Ok(section)
    }
}

fn generated_products(request: &GenerationRequest) -> Value {
    let subject = subject(request);
    let category = request
        .categories
        .first()
        .map(|category| category.name.clone())
        .unwrap_or_else(|| title_case(&request.industry));
    json!({
        "title": "Shop",
        "subtitle": format!("Favourites from {}", headline(request)),
        "items": (1..=3).map(|idx| json!({
            "name": format!("{} item {idx}", title_case(&request.industry)),
            "description": format!("A {subject} favourite."),
            "price": 10.0 * idx as f64,
            "category": category,
            "image": format!("{subject}, product photo {idx}"),
        })).collect::<Vec<Value>>(),
    })
}

fn subject(request: &GenerationRequest) -> String {
    if request.industry.trim().is_empty() {
        truncate_brief(&request.brief, 60)
    } else {
        request.industry.trim().to_string()
    }
}

fn headline(request: &GenerationRequest) -> String {
    let first = request
        .brief
        .split(['.', '\n'])
        .next()
        .unwrap_or("")
        .trim();
    if first.is_empty() {
        "Welcome".to_string()
    } else {
        truncate_brief(first, 80)
    }
}

fn truncate_brief(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

fn title_case(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Section".to_string(),
    }
}

/// Offline image generator: a small solid-colour PNG whose colour is derived
/// from the prompt, returned as a `data:` blob.
pub struct DryrunImageGenerator;

impl ImageGenerator for DryrunImageGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_image(
        &self,
        _ctx: &CallContext,
        prompt: &str,
        aspect_ratio: &str,
    ) -> Result<String> {
        let (width, height) = thumbnail_dims(aspect_ratio);
        let (r, g, b) = color_from_prompt(prompt);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
    }
}

fn thumbnail_dims(aspect_ratio: &str) -> (u32, u32) {
    let parsed = aspect_ratio.split_once(':').and_then(|(w, h)| {
        let w = w.trim().parse::<u32>().ok()?;
        let h = h.trim().parse::<u32>().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    });
    let (w, h) = parsed.unwrap_or((1, 1));
    let scale = 64.0 / w.max(h) as f64;
    (
        ((w as f64 * scale).round() as u32).max(1),
        ((h as f64 * scale).round() as u32).max(1),
    )
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// In-process catalog. Ids come from a counter that only grows, so a
/// deleted item's id is never handed out again.
#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<Vec<(String, CatalogItem)>>,
    next_id: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self, owner_id: &str) -> Vec<CatalogItem> {
        self.items
            .lock()
            .map(|items| {
                items
                    .iter()
                    .filter(|(owner, _)| owner == owner_id)
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl CatalogStore for MemoryCatalog {
    fn create_item(
        &self,
        _ctx: &CallContext,
        owner_id: &str,
        item: &NewCatalogItem,
    ) -> Result<CatalogItem> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        let record = CatalogItem {
            id: format!(
                "item-{}",
                short_id(&item.name, self.next_id.fetch_add(1, Ordering::Relaxed))
            ),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            category: item.category.clone(),
            image: item.image.clone(),
        };
        items.push((owner_id.to_string(), record.clone()));
        Ok(record)
    }

    fn delete_item(&self, _ctx: &CallContext, owner_id: &str, item_id: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        let before = items.len();
        items.retain(|(owner, item)| !(owner == owner_id && item.id == item_id));
        if items.len() == before {
            anyhow::bail!("catalog item '{item_id}' not found for owner '{owner_id}'");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sitesmith_contracts::catalog::NewCatalogItem;
    use sitesmith_contracts::images::slot_keys;
    use sitesmith_contracts::page::GENERATED_PRODUCTS_KEY;
    use sitesmith_contracts::request::GenerationRequest;

    use super::{thumbnail_dims, DryrunContentGenerator, DryrunImageGenerator, MemoryCatalog};
    use crate::collaborators::{CatalogStore, ContentGenerator, ImageGenerator};
    use crate::context::CallContext;

    fn request(order: &[&str]) -> GenerationRequest {
        GenerationRequest::new(
            "Family bakery in Lisbon. Fresh bread every morning.",
            order.iter().map(|key| key.to_string()).collect(),
        )
        .with_industry("bakery")
    }

    #[test]
    fn structure_follows_requested_order() -> anyhow::Result<()> {
        let document = DryrunContentGenerator
            .generate_structure(&CallContext::detached(), &request(&["hero", "testimonials", "footer"]))?;
        assert_eq!(document.section_order(), ["hero", "testimonials", "footer"]);
        let hero = document.section("hero").cloned().unwrap_or_default();
        assert_eq!(slot_keys("hero", &hero), vec!["hero"]);
        assert_eq!(
            document.extras()["seo"]["title"],
            serde_json::json!("Family bakery in Lisbon")
        );
        Ok(())
    }

    #[test]
    fn products_come_back_as_pseudo_section() -> anyhow::Result<()> {
        let document = DryrunContentGenerator
            .generate_structure(&CallContext::detached(), &request(&["hero", "products"]))?;
        assert_eq!(document.section_order(), ["hero", GENERATED_PRODUCTS_KEY]);
        let items = document
            .section(GENERATED_PRODUCTS_KEY)
            .and_then(|section| section.get("items"))
            .and_then(|items| items.as_array())
            .map(Vec::len);
        assert_eq!(items, Some(3));
        Ok(())
    }

    #[test]
    fn dryrun_images_are_deterministic_png_blobs() -> anyhow::Result<()> {
        let ctx = CallContext::detached();
        let first = DryrunImageGenerator.generate_image(&ctx, "bread", "16:9")?;
        let second = DryrunImageGenerator.generate_image(&ctx, "bread", "16:9")?;
        let other = DryrunImageGenerator.generate_image(&ctx, "cake", "16:9")?;
        assert!(first.starts_with("data:image/png;base64,"));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(thumbnail_dims("16:9"), (64, 36));
        assert_eq!(thumbnail_dims("4:5"), (51, 64));
        assert_eq!(thumbnail_dims("bogus"), (64, 64));
        Ok(())
    }

    #[test]
    fn memory_catalog_creates_and_deletes() -> anyhow::Result<()> {
        let ctx = CallContext::detached();
        let catalog = MemoryCatalog::new();
        let item = NewCatalogItem {
            name: "Sourdough".to_string(),
            description: String::new(),
            price: 6.5,
            category: "Bread".to_string(),
            image: None,
        };
        let created = catalog.create_item(&ctx, "owner-1", &item)?;
        assert!(created.id.starts_with("item-"));
        assert_eq!(catalog.items("owner-1").len(), 1);
        assert!(catalog.items("owner-2").is_empty());
        catalog.delete_item(&ctx, "owner-1", &created.id)?;
        assert!(catalog.items("owner-1").is_empty());
        assert!(catalog.delete_item(&ctx, "owner-1", &created.id).is_err());
        Ok(())
    }

    #[test]
    fn memory_catalog_never_reuses_a_deleted_id() -> anyhow::Result<()> {
        let ctx = CallContext::detached();
        let catalog = MemoryCatalog::new();
        let item = |name: &str| NewCatalogItem {
            name: name.to_string(),
            description: String::new(),
            price: 4.0,
            category: "Cakes".to_string(),
            image: None,
        };
        let first = catalog.create_item(&ctx, "owner-1", &item("Eclair"))?;
        let second = catalog.create_item(&ctx, "owner-1", &item("Tart"))?;
        catalog.delete_item(&ctx, "owner-1", &first.id)?;
        let third = catalog.create_item(&ctx, "owner-1", &item("Tart"))?;

        assert_ne!(third.id, second.id);
        catalog.delete_item(&ctx, "owner-1", &second.id)?;
        let left: Vec<String> = catalog
            .items("owner-1")
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(left, vec![third.id]);
        Ok(())
    }
}
