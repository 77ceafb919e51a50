/// Key of the generation-time products pseudo-section.
pub const GENERATED_PRODUCTS_KEY: &str = "generatedProducts";

/// Key of the thin reference section that replaces the pseudo-section.
pub const PRODUCTS_KEY: &str = "products";

/// Section type, derived from the section key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Hero,
    Nav,
    Testimonials,
    Gallery,
    Course,
    Products,
    GeneratedProducts,
    Other,
}

impl SectionKind {
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "hero" => Self::Hero,
            "nav" | "navbar" | "header" => Self::Nav,
            "testimonials" => Self::Testimonials,
            "gallery" => Self::Gallery,
            "course" => Self::Course,
            PRODUCTS_KEY => Self::Products,
            GENERATED_PRODUCTS_KEY => Self::GeneratedProducts,
            _ => Self::Other,
        }
    }

    pub fn owns_images(self) -> bool {
        matches!(
            self,
            Self::Hero | Self::Nav | Self::Testimonials | Self::Gallery | Self::Course
        )
    }
}
