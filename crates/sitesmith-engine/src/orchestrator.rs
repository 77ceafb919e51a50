use std::thread;
use std::time::Instant;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde_json::json;
use sitesmith_contracts::events::EventWriter;
use sitesmith_contracts::images::{ImageRef, ImageStore};

use crate::collaborators::ImageGenerator;
use crate::context::CallContext;
use crate::{error_chain_text, map_object, truncate_text};

/// One slot to fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub slot: String,
    pub prompt: String,
    pub aspect_ratio: String,
}

impl ImageJob {
    pub fn new(
        slot: impl Into<String>,
        prompt: impl Into<String>,
        aspect_ratio: impl Into<String>,
    ) -> Self {
        Self {
            slot: slot.into(),
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.into(),
        }
    }
}

/// Fans a batch of jobs out to the image generator, one worker per job, and
/// waits for every worker. The returned patch holds exactly one entry per
/// distinct slot: the generated image, or the placeholder when generation
/// failed. The batch itself never fails.
pub struct ImageOrchestrator<'a> {
    generator: &'a dyn ImageGenerator,
    placeholder: &'a str,
    events: &'a EventWriter,
}

impl<'a> ImageOrchestrator<'a> {
    pub fn new(
        generator: &'a dyn ImageGenerator,
        placeholder: &'a str,
        events: &'a EventWriter,
    ) -> Self {
        Self {
            generator,
            placeholder,
            events,
        }
    }

    pub fn placeholder(&self) -> ImageRef {
        ImageRef::Placeholder(self.placeholder.to_string())
    }

    pub fn generate_batch(&self, ctx: &CallContext, jobs: &[ImageJob]) -> ImageStore {
        // A slot listed twice is generated once, with its last prompt.
        let mut unique: IndexMap<&str, &ImageJob> = IndexMap::new();
        for job in jobs {
            unique.insert(job.slot.as_str(), job);
        }
        if unique.is_empty() {
            return ImageStore::new();
        }

        let _ = self.events.emit(
            "image_batch_started",
            map_object(json!({
                "provider": self.generator.name(),
                "slots": unique.keys().collect::<Vec<_>>(),
            })),
        );
        let started = Instant::now();

        let outcomes = thread::scope(|scope| {
            let handles = unique
                .values()
                .map(|job| {
                    let job: &ImageJob = job;
                    (job, scope.spawn(move || self.run_job(ctx, job)))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(job, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("image worker panicked")));
                    (job, outcome)
                })
                .collect::<Vec<_>>()
        });

        let mut patch = ImageStore::new();
        let mut failed = Vec::new();
        for (job, outcome) in outcomes {
            match outcome {
                Ok(src) => {
                    patch.insert(job.slot.clone(), ImageRef::Generated(src));
                }
                Err(err) => {
                    let _ = self.events.emit(
                        "image_generation_failed",
                        map_object(json!({
                            "slot": job.slot,
                            "provider": self.generator.name(),
                            "prompt": truncate_text(&job.prompt, 160),
                            "error": error_chain_text(&err, 1024),
                            "placeholder": self.placeholder,
                        })),
                    );
                    failed.push(job.slot.clone());
                    patch.insert(job.slot.clone(), self.placeholder());
                }
            }
        }

        let _ = self.events.emit(
            "image_batch_finished",
            map_object(json!({
                "requested": patch.len(),
                "failed": failed,
                "elapsed_s": started.elapsed().as_secs_f64(),
            })),
        );
        patch
    }

    fn run_job(&self, ctx: &CallContext, job: &ImageJob) -> Result<String> {
        ctx.ensure_active()?;
        let src = self
            .generator
            .generate_image(ctx, &job.prompt, &job.aspect_ratio)?;
        if src.trim().is_empty() {
            bail!("{} returned an empty image reference", self.generator.name());
        }
        let _ = self.events.emit(
            "image_generated",
            map_object(json!({
                "slot": job.slot,
                "provider": self.generator.name(),
                "aspect_ratio": job.aspect_ratio,
            })),
        );
        Ok(src)
    }
}
