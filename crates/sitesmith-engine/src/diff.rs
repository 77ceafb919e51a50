use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::Value;
use sitesmith_contracts::images::{image_fields, resolve_image, ImageRef, ImageResolution, ImageStore};
use sitesmith_contracts::page::PageDocument;
use sitesmith_contracts::request::GenerationRequest;

use crate::collaborators::ContentGenerator;
use crate::context::CallContext;
use crate::error::EngineError;
use crate::orchestrator::{ImageJob, ImageOrchestrator};

/// Guard for section order changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrderSyncState {
    #[default]
    Idle,
    /// A change is being applied.
    Applying { order: Vec<String> },
    /// A change is being applied and a newer one is waiting for it.
    Superseded {
        applying: Vec<String>,
        next: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBegin {
    /// Caller owns the apply loop now and must hand the token back to
    /// [`OrderSync::finish`].
    Started(u64),
    /// Recorded as the next order; the in-flight loop will pick it up.
    Deferred,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSync {
    state: OrderSyncState,
    /// Bumped by `reset`; a loop started before the bump no longer owns
    /// the state.
    generation: u64,
}

impl OrderSync {
    pub fn state(&self) -> &OrderSyncState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == OrderSyncState::Idle
    }

    pub fn begin(&mut self, order: Vec<String>) -> OrderBegin {
        let state = std::mem::take(&mut self.state);
        let (next, begin) = match state {
            OrderSyncState::Idle => (
                OrderSyncState::Applying { order },
                OrderBegin::Started(self.generation),
            ),
            OrderSyncState::Applying { order: applying }
            | OrderSyncState::Superseded { applying, .. } => (
                OrderSyncState::Superseded {
                    applying,
                    next: order,
                },
                OrderBegin::Deferred,
            ),
        };
        self.state = next;
        begin
    }

    /// Ends the in-flight change. Returns the superseding order, now in
    /// flight, if one arrived meanwhile. A token from before the last
    /// `reset` leaves the state alone and returns `None`.
    pub fn finish(&mut self, token: u64) -> Option<Vec<String>> {
        if token != self.generation {
            return None;
        }
        match std::mem::take(&mut self.state) {
            OrderSyncState::Idle | OrderSyncState::Applying { .. } => None,
            OrderSyncState::Superseded { next, .. } => {
                self.state = OrderSyncState::Applying {
                    order: next.clone(),
                };
                Some(next)
            }
        }
    }

    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = OrderSyncState::Idle;
    }
}

/// Keys in `new_order` with no record in the document, first occurrence
/// order. Keys whose record was kept after an earlier removal are not
/// additions.
pub fn added_sections(new_order: &[String], document: &PageDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    new_order
        .iter()
        .filter(|key| !document.has_section(key) && seen.insert(key.as_str()))
        .cloned()
        .collect()
}

/// A generated section ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionAddition {
    pub key: String,
    pub data: Value,
    pub images: ImageStore,
    pub generated_slot: Option<String>,
}

/// Generates one section on its own, plus at most one image: the first
/// image field with a value decides. A prompt there is generated; a literal
/// is stored. Remaining literal fields are stored, remaining prompt fields get
/// the placeholder so every slot resolves.
pub fn build_addition(
    ctx: &CallContext,
    content: &dyn ContentGenerator,
    orchestrator: &ImageOrchestrator<'_>,
    request: &GenerationRequest,
    key: &str,
) -> Result<SectionAddition> {
    let data = content
        .generate_section(ctx, request, key)
        .with_context(|| EngineError::content(format!("section '{key}'")))?;
    ctx.ensure_active()?;

    let mut images = ImageStore::new();
    let mut primary: Option<ImageJob> = None;
    let mut primary_decided = false;
    for field in image_fields(key, &data) {
        match resolve_image(field.value.as_deref()) {
            ImageResolution::Nothing => {}
            ImageResolution::Literal(src) => {
                primary_decided = true;
                images.insert(field.slot, ImageRef::Literal(src));
            }
            ImageResolution::Prompt(prompt) => {
                if primary_decided {
                    images.insert(field.slot, orchestrator.placeholder());
                } else {
                    primary_decided = true;
                    primary = Some(ImageJob::new(field.slot, prompt, field.aspect_ratio));
                }
            }
        }
    }

    let generated_slot = primary.as_ref().map(|job| job.slot.clone());
    if let Some(job) = primary {
        let patch = orchestrator.generate_batch(ctx, std::slice::from_ref(&job));
        images.merge(&patch);
    }

    Ok(SectionAddition {
        key: key.to_string(),
        data,
        images,
        generated_slot,
    })
}
