mod resolver;
mod slots;
mod store;

pub use resolver::{is_literal, resolve_image, ImageResolution};
pub use slots::{image_fields, slot_keys, ImageField};
pub use store::{unresolved_slots, ImageRef, ImageStore};
