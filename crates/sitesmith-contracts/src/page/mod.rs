mod document;
mod kind;

pub use document::{PageDocument, PageSnapshot};
pub use kind::{SectionKind, GENERATED_PRODUCTS_KEY, PRODUCTS_KEY};
