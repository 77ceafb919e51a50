use thiserror::Error;

/// Failures a caller needs to tell apart. Attached to the underlying error as
/// anyhow context, so `err.downcast_ref::<EngineError>()` finds them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("content generation failed ({stage})")]
    ContentGeneration { stage: String },

    #[error(
        "catalog sync failed after creating {} item(s); rolled back {}, orphaned [{}]",
        .created.len(),
        .rolled_back.len(),
        .orphaned.join(", ")
    )]
    CatalogSync {
        created: Vec<String>,
        rolled_back: Vec<String>,
        orphaned: Vec<String>,
    },

    #[error("operation result discarded: session moved on")]
    Cancelled,

    #[error("no brief recorded for this session; generate or open a page first")]
    MissingBrief,

    #[error("{operation} timed out")]
    Timeout { operation: String },
}

impl EngineError {
    pub fn content(stage: impl Into<String>) -> Self {
        Self::ContentGeneration {
            stage: stage.into(),
        }
    }
}

pub fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.downcast_ref::<EngineError>()
}
