/// What an image-bearing field asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResolution {
    /// Absent or blank: nothing to store, nothing to generate.
    Nothing,
    /// Already a URL or inline data blob; stored as-is.
    Literal(String),
    /// A generation prompt.
    Prompt(String),
}

impl ImageResolution {
    pub fn needs_generation(&self) -> bool {
        matches!(self, Self::Prompt(_))
    }

    pub fn prompt(&self) -> Option<&str> {
        match self {
            Self::Prompt(prompt) => Some(prompt.as_str()),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            Self::Literal(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

pub fn is_literal(value: &str) -> bool {
    value.starts_with("http") || value.starts_with("data:")
}

pub fn resolve_image(value: Option<&str>) -> ImageResolution {
    let Some(raw) = value else {
        return ImageResolution::Nothing;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ImageResolution::Nothing;
    }
    if is_literal(trimmed) {
        return ImageResolution::Literal(trimmed.to_string());
    }
    ImageResolution::Prompt(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{resolve_image, ImageResolution};

    #[test]
    fn urls_and_data_blobs_are_literal() {
        assert_eq!(
            resolve_image(Some("https://cdn.example.com/a.png")),
            ImageResolution::Literal("https://cdn.example.com/a.png".to_string())
        );
        assert_eq!(
            resolve_image(Some("http://example.com/b.jpg")).literal(),
            Some("http://example.com/b.jpg")
        );
        let blob = resolve_image(Some("data:image/png;base64,AAAA"));
        assert!(!blob.needs_generation());
        assert_eq!(blob.literal(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn other_text_is_a_prompt() {
        let resolved = resolve_image(Some("  sunrise over a bakery  "));
        assert!(resolved.needs_generation());
        assert_eq!(resolved.prompt(), Some("sunrise over a bakery"));
    }

    #[test]
    fn missing_or_blank_is_nothing() {
        assert_eq!(resolve_image(None), ImageResolution::Nothing);
        assert_eq!(resolve_image(Some("")), ImageResolution::Nothing);
        assert_eq!(resolve_image(Some("   ")), ImageResolution::Nothing);
    }
}
