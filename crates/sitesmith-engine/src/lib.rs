use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sitesmith_contracts::events::{EventPayload, EventWriter};
use sitesmith_contracts::images::{resolve_image, ImageRef, ImageResolution, ImageStore};
use sitesmith_contracts::page::PageSnapshot;
use sitesmith_contracts::request::GenerationRequest;

pub mod collaborators;
pub mod config;
pub mod context;
pub mod diff;
pub mod dryrun;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod structure;

#[cfg(test)]
mod testing;

pub use collaborators::{
    CatalogStore, Collaborators, ContentGenerator, ImageGenerator, ImageGeneratorRegistry,
    PageSink, PageSource, PageSummary, SavedPage, StoredPage,
};
pub use config::EngineConfig;
pub use context::{CallContext, NoStatus, StatusSink};
pub use diff::{OrderSync, OrderSyncState};
pub use error::{engine_error, EngineError};
pub use orchestrator::{ImageJob, ImageOrchestrator};
pub use retry::{load_with_retry, RetryPolicy};
pub use store::FilePageStore;

use diff::{added_sections, build_addition, OrderBegin, SectionAddition};
use dryrun::{DryrunContentGenerator, DryrunImageGenerator, MemoryCatalog};
use http::{HttpContentGenerator, HttpImageGenerator};
use reconcile::plan_edit;
use structure::PageStructureGenerator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderChangeOutcome {
    /// The order (possibly a newer one that superseded the request) is in
    /// place; `added` lists the sections generated for it.
    Applied {
        order: Vec<String>,
        added: Vec<String>,
    },
    /// Another change was in flight; this order will be applied when it
    /// completes.
    Deferred,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    pub regenerated: Vec<String>,
    pub literals: Vec<String>,
}

pub fn default_image_generators() -> ImageGeneratorRegistry {
    let mut generators = ImageGeneratorRegistry::new();
    generators.register(DryrunImageGenerator);
    if let Some(http) = HttpImageGenerator::from_env() {
        generators.register(http);
    }
    generators
}

impl Collaborators {
    /// Fully offline collaborators.
    pub fn dryrun() -> Self {
        Self {
            content: Arc::new(DryrunContentGenerator),
            images: Arc::new(DryrunImageGenerator),
            catalog: Arc::new(MemoryCatalog::new()),
        }
    }

    /// HTTP content generation when `SITESMITH_CONTENT_ENDPOINT` is set, the
    /// named image generator, and the given catalog. Pages are saved with
    /// item ids from `catalog`, so it must outlive the process when they do.
    pub fn from_env(image_provider: &str, catalog: Arc<dyn CatalogStore>) -> Result<Self> {
        let generators = default_image_generators();
        let Some(images) = generators.get(image_provider) else {
            bail!(
                "image provider '{}' not registered (available: [{}])",
                image_provider,
                generators.names().join(", ")
            );
        };
        let content: Arc<dyn ContentGenerator> = match HttpContentGenerator::from_env() {
            Some(http) => Arc::new(http),
            None => Arc::new(DryrunContentGenerator),
        };
        Ok(Self {
            content,
            images,
            catalog,
        })
    }
}

struct SessionState {
    snapshot: PageSnapshot,
    request: Option<Arc<GenerationRequest>>,
    page_id: Option<String>,
    order_sync: OrderSync,
    context: CallContext,
}

/// One editing session: the page document, its image store, the brief it was
/// generated from, and the order-change guard, all behind one lock.
///
/// Collaborator calls run without the lock held. Results are committed by
/// swapping in new `Arc`s, and only if the session is still on the epoch the
/// operation started under; otherwise they are discarded.
pub struct PageSession {
    session_id: String,
    events: EventWriter,
    config: EngineConfig,
    collaborators: Collaborators,
    state: Mutex<SessionState>,
}

impl PageSession {
    pub fn new(
        events_path: impl Into<PathBuf>,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        let events = EventWriter::new(events_path.into(), session_id.clone());
        events.emit(
            "session_started",
            map_object(json!({
                "content_provider": collaborators.content.name(),
                "image_provider": collaborators.images.name(),
                "placeholder_image": config.placeholder_image,
            })),
        )?;
        Ok(Self {
            session_id,
            events,
            config,
            collaborators,
            state: Mutex::new(SessionState {
                snapshot: PageSnapshot::default(),
                request: None,
                page_id: None,
                order_sync: OrderSync::default(),
                context: CallContext::new(1),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        self.events.emit(event_type, payload)
    }

    /// The current `{document, images}` pair.
    pub fn snapshot(&self) -> PageSnapshot {
        self.lock_state().snapshot.clone()
    }

    pub fn section_order(&self) -> Vec<String> {
        self.lock_state().snapshot.document.section_order().to_vec()
    }

    pub fn request(&self) -> Option<Arc<GenerationRequest>> {
        self.lock_state().request.clone()
    }

    pub fn page_id(&self) -> Option<String> {
        self.lock_state().page_id.clone()
    }

    pub fn order_sync_state(&self) -> OrderSyncState {
        self.lock_state().order_sync.state().clone()
    }

    /// Generates a whole page from `request` and replaces the session's
    /// document and images with it.
    pub fn generate_page(
        &self,
        request: GenerationRequest,
        status: &dyn StatusSink,
    ) -> Result<PageSnapshot> {
        let ctx = self.begin();
        let request = Arc::new(request);
        self.events.emit(
            "generation_started",
            map_object(json!({
                "sections": request.section_order,
                "industry": request.industry,
                "tone": request.tone,
            })),
        )?;

        let generator = PageStructureGenerator {
            content: self.collaborators.content.as_ref(),
            catalog: self.collaborators.catalog.as_ref(),
            orchestrator: self.orchestrator(),
            config: &self.config,
            events: &self.events,
        };
        let result = generator.generate(&ctx, &request, status);
        status.set_stage(None);
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.events.emit(
                    "generation_failed",
                    map_object(json!({ "error": error_chain_text(&err, 2048) })),
                )?;
                return Err(err);
            }
        };

        let created_ids = page
            .created_items
            .iter()
            .map(|item| item.id.clone())
            .collect::<Vec<String>>();
        let snapshot = self.commit(&ctx, "generate_page", |state| {
            state.snapshot = PageSnapshot::new(page.document, page.images);
            state.request = Some(request.clone());
            Ok(state.snapshot.clone())
        })?;
        self.events.emit(
            "page_generated",
            map_object(json!({
                "sections": snapshot.document.section_order(),
                "images": snapshot.images.len(),
                "placeholders": snapshot.images.placeholder_slots(),
                "created_items": created_ids,
            })),
        )?;
        Ok(snapshot)
    }

    /// Reacts to a new section order. Sections already in the document are
    /// only reordered; new keys are generated one by one and merged in a
    /// single commit. If any addition fails nothing is applied and the order
    /// stays as it was.
    ///
    /// A change arriving while another is in flight is recorded and returns
    /// [`OrderChangeOutcome::Deferred`]; the in-flight call applies it next and
    /// reports the final outcome.
    pub fn apply_section_order_change(
        &self,
        new_order: Vec<String>,
        status: &dyn StatusSink,
    ) -> Result<OrderChangeOutcome> {
        let begin = self.lock_state().order_sync.begin(new_order.clone());
        let token = match begin {
            OrderBegin::Started(token) => token,
            OrderBegin::Deferred => {
                self.events.emit(
                    "section_order_deferred",
                    map_object(json!({ "order": new_order })),
                )?;
                return Ok(OrderChangeOutcome::Deferred);
            }
        };

        let mut current = new_order;
        loop {
            let result = self.apply_order(&current, status);
            let next = self.lock_state().order_sync.finish(token);
            match next {
                Some(next_order) => current = next_order,
                None => {
                    status.set_stage(None);
                    return result;
                }
            }
        }
    }

    fn apply_order(&self, order: &[String], status: &dyn StatusSink) -> Result<OrderChangeOutcome> {
        let ctx = self.begin();
        let (document, request) = {
            let state = self.lock_state();
            (state.snapshot.document.clone(), state.request.clone())
        };
        let previous = document.section_order().to_vec();
        let added = added_sections(order, &document);

        if added.is_empty() {
            self.commit(&ctx, "section_order", |state| {
                let next = state.snapshot.document.with_order(order.to_vec())?;
                state.snapshot = PageSnapshot {
                    document: Arc::new(next),
                    images: state.snapshot.images.clone(),
                };
                Ok(())
            })?;
            self.events.emit(
                "section_order_applied",
                map_object(json!({
                    "previous_order": previous,
                    "order": order,
                    "added": [],
                })),
            )?;
            return Ok(OrderChangeOutcome::Applied {
                order: order.to_vec(),
                added,
            });
        }

        let committed = self
            .fetch_additions(&ctx, request.as_deref(), &added, status)
            .and_then(|additions| {
                self.commit(&ctx, "section_order", |state| {
                    let records = additions
                        .iter()
                        .map(|addition| (addition.key.clone(), addition.data.clone()));
                    let document = state
                        .snapshot
                        .document
                        .with_sections_and_order(records, order.to_vec())?;
                    let mut patch = ImageStore::new();
                    for addition in &additions {
                        patch.merge(&addition.images);
                    }
                    let images = state.snapshot.images.merged(&patch);
                    state.snapshot = PageSnapshot::new(document, images);
                    Ok(())
                })?;
                Ok(additions)
            });

        let additions = match committed {
            Ok(additions) => additions,
            Err(err) => {
                self.events.emit(
                    "section_order_rolled_back",
                    map_object(json!({
                        "previous_order": previous,
                        "attempted_order": order,
                        "added": added,
                        "error": error_chain_text(&err, 2048),
                    })),
                )?;
                return Err(err);
            }
        };

        for addition in &additions {
            self.events.emit(
                "section_added",
                map_object(json!({
                    "section": addition.key,
                    "slots": addition.images.keys().collect::<Vec<&str>>(),
                    "generated_slot": addition.generated_slot,
                })),
            )?;
        }
        self.events.emit(
            "section_order_applied",
            map_object(json!({
                "previous_order": previous,
                "order": order,
                "added": added,
            })),
        )?;
        Ok(OrderChangeOutcome::Applied {
            order: order.to_vec(),
            added,
        })
    }

    fn fetch_additions(
        &self,
        ctx: &CallContext,
        request: Option<&GenerationRequest>,
        added: &[String],
        status: &dyn StatusSink,
    ) -> Result<Vec<SectionAddition>> {
        let Some(request) = request else {
            return Err(EngineError::MissingBrief.into());
        };
        let orchestrator = self.orchestrator();
        let mut additions = Vec::with_capacity(added.len());
        for key in added {
            status.set_stage(Some(&format!("Adding section: {key}")));
            additions.push(build_addition(
                ctx,
                self.collaborators.content.as_ref(),
                &orchestrator,
                request,
                key,
            )?);
        }
        Ok(additions)
    }

    /// Applies a manual edit to one section. Only image slots whose value
    /// changed are regenerated; the record is replaced either way.
    pub fn apply_section_edit(
        &self,
        section_key: &str,
        new_data: Value,
        status: &dyn StatusSink,
    ) -> Result<EditOutcome> {
        let ctx = self.begin();
        let old = self
            .lock_state()
            .snapshot
            .document
            .section(section_key)
            .cloned()
            .unwrap_or(Value::Null);
        let plan = plan_edit(section_key, &old, &new_data);

        let mut patch = plan.literals.clone();
        if !plan.jobs.is_empty() {
            status.set_stage(Some("Regenerating images"));
            patch.merge(&self.orchestrator().generate_batch(&ctx, &plan.jobs));
            status.set_stage(None);
        }

        self.commit(&ctx, "section_edit", |state| {
            let document = state.snapshot.document.with_section(section_key, new_data);
            let images = state.snapshot.images.merged(&patch);
            state.snapshot = PageSnapshot::new(document, images);
            Ok(())
        })?;

        let outcome = EditOutcome {
            regenerated: plan.jobs.iter().map(|job| job.slot.clone()).collect(),
            literals: plan.literals.keys().map(str::to_string).collect(),
        };
        self.events.emit(
            "section_edit_applied",
            map_object(json!({
                "section": section_key,
                "regenerated": outcome.regenerated,
                "literals": outcome.literals,
                "placeholders": plan
                    .jobs
                    .iter()
                    .filter(|job| patch.get(&job.slot).map(ImageRef::is_placeholder).unwrap_or(false))
                    .map(|job| job.slot.as_str())
                    .collect::<Vec<&str>>(),
            })),
        )?;
        Ok(outcome)
    }

    /// Regenerates (or, for a URL/data blob, directly stores) one slot.
    pub fn regenerate_single_image(
        &self,
        slot: &str,
        prompt: &str,
        aspect_ratio: &str,
        status: &dyn StatusSink,
    ) -> Result<ImageRef> {
        let ctx = self.begin();
        let image = match resolve_image(Some(prompt)) {
            ImageResolution::Nothing => bail!("nothing to generate for slot '{slot}': empty prompt"),
            ImageResolution::Literal(src) => ImageRef::Literal(src),
            ImageResolution::Prompt(prompt) => {
                status.set_stage(Some("Regenerating image"));
                let orchestrator = self.orchestrator();
                let patch = orchestrator
                    .generate_batch(&ctx, &[ImageJob::new(slot, prompt, aspect_ratio)]);
                status.set_stage(None);
                patch
                    .get(slot)
                    .cloned()
                    .unwrap_or_else(|| orchestrator.placeholder())
            }
        };

        self.commit(&ctx, "regenerate_image", |state| {
            let mut images = state.snapshot.images.as_ref().clone();
            images.insert(slot, image.clone());
            state.snapshot = PageSnapshot {
                document: state.snapshot.document.clone(),
                images: Arc::new(images),
            };
            Ok(())
        })?;
        self.events.emit(
            "image_regenerated",
            map_object(json!({
                "slot": slot,
                "placeholder": image.is_placeholder(),
            })),
        )?;
        Ok(image)
    }

    /// Leaves the current page: in-flight work is cancelled and anything it
    /// produces later is discarded.
    pub fn abandon(&self) -> Result<()> {
        let epoch = {
            let mut state = self.lock_state();
            state.context.cancel();
            state.context = CallContext::new(state.context.epoch() + 1);
            state.order_sync.reset();
            state.context.epoch()
        };
        self.events.emit(
            "session_abandoned",
            map_object(json!({ "epoch": epoch })),
        )?;
        Ok(())
    }

    /// Lists pages, retrying timeouts.
    pub fn load_page_list(&self, source: &dyn PageSource) -> Result<Vec<PageSummary>> {
        let ctx = self.begin();
        load_with_retry(&self.config.retry, "list_pages", &self.events, |_| {
            source.list_pages(&ctx)
        })
    }

    /// Fetches a page, retrying timeouts, and makes it the session's page.
    pub fn open_page(
        &self,
        source: &dyn PageSource,
        page_id: &str,
        status: &dyn StatusSink,
    ) -> Result<PageSnapshot> {
        status.set_stage(Some("Loading page"));
        let ctx = self.begin();
        let fetched = load_with_retry(&self.config.retry, "fetch_page", &self.events, |_| {
            source.fetch_page(&ctx, page_id)
        });
        status.set_stage(None);
        let page = fetched?;
        self.commit(&ctx, "open_page", |_| Ok(()))?;
        self.install(Some(page.id), page.snapshot, page.request)
    }

    /// Replaces the session's page wholesale, abandoning in-flight work.
    pub fn install(
        &self,
        page_id: Option<String>,
        snapshot: PageSnapshot,
        request: Option<GenerationRequest>,
    ) -> Result<PageSnapshot> {
        snapshot.document.validate()?;
        self.abandon()?;
        let installed = {
            let mut state = self.lock_state();
            state.snapshot = snapshot;
            state.request = request.map(Arc::new);
            state.page_id = page_id.clone();
            state.snapshot.clone()
        };
        self.events.emit(
            "session_loaded",
            map_object(json!({
                "page_id": page_id,
                "sections": installed.document.section_order(),
                "images": installed.images.len(),
            })),
        )?;
        Ok(installed)
    }

    /// Hands the current pair to `sink`. Uses `page_id` or, failing that, the
    /// id the page was opened or last saved under.
    pub fn save(
        &self,
        sink: &dyn PageSink,
        page_id: Option<&str>,
        config: &Map<String, Value>,
    ) -> Result<SavedPage> {
        let ctx = self.begin();
        let (snapshot, request, known_id) = {
            let state = self.lock_state();
            (
                state.snapshot.clone(),
                state.request.clone(),
                state.page_id.clone(),
            )
        };
        let Some(page_id) = page_id.map(str::to_string).or(known_id) else {
            bail!("no page id to save under");
        };
        let saved = sink.save(&ctx, &page_id, &snapshot, request.as_deref(), config)?;
        self.commit(&ctx, "save", |state| {
            state.page_id = Some(page_id.clone());
            Ok(())
        })?;
        self.events.emit(
            "page_saved",
            map_object(json!({
                "page_id": saved.id,
                "saved_at": saved.saved_at,
            })),
        )?;
        Ok(saved)
    }

    fn orchestrator(&self) -> ImageOrchestrator<'_> {
        ImageOrchestrator::new(
            self.collaborators.images.as_ref(),
            &self.config.placeholder_image,
            &self.events,
        )
    }

    fn begin(&self) -> CallContext {
        self.lock_state().context.clone()
    }

    fn commit<R>(
        &self,
        ctx: &CallContext,
        operation: &str,
        apply: impl FnOnce(&mut SessionState) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.lock_state();
        if ctx.is_cancelled() || state.context.epoch() != ctx.epoch() {
            drop(state);
            let _ = self.events.emit(
                "result_discarded",
                map_object(json!({
                    "operation": operation,
                    "epoch": ctx.epoch(),
                })),
            );
            return Err(EngineError::Cancelled.into());
        }
        apply(&mut state)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSession")
            .field("session_id", &self.session_id)
            .field("events", &self.events.path())
            .finish_non_exhaustive()
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn short_id(seed: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
