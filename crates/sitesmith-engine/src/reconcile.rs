use std::collections::HashMap;

use serde_json::Value;
use sitesmith_contracts::images::{image_fields, resolve_image, ImageRef, ImageResolution, ImageStore};

use crate::orchestrator::ImageJob;

/// What a single-section edit needs from the image side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditPlan {
    /// Slots whose prompt changed; sent to the image generator.
    pub jobs: Vec<ImageJob>,
    /// Slots whose value changed to a URL or data blob; stored as-is.
    pub literals: ImageStore,
}

impl EditPlan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.literals.is_empty()
    }
}

/// Compares the image fields of both versions slot by slot. A slot is only
/// touched when its value changed; unchanged slots keep their image.
pub fn plan_edit(section_key: &str, old: &Value, new: &Value) -> EditPlan {
    let previous = image_fields(section_key, old)
        .into_iter()
        .map(|field| (field.slot, field.value))
        .collect::<HashMap<String, Option<String>>>();

    let mut plan = EditPlan::default();
    for field in image_fields(section_key, new) {
        let old_value = previous.get(&field.slot).cloned().flatten();
        if normalized(old_value.as_deref()) == normalized(field.value.as_deref()) {
            continue;
        }
        match resolve_image(field.value.as_deref()) {
            ImageResolution::Nothing => {}
            ImageResolution::Literal(src) => plan.literals.insert(field.slot, ImageRef::Literal(src)),
            ImageResolution::Prompt(prompt) => {
                plan.jobs
                    .push(ImageJob::new(field.slot, prompt, field.aspect_ratio))
            }
        }
    }
    plan
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
