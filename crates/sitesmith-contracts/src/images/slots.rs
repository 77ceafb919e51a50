use serde_json::Value;

use super::resolver::resolve_image;
use crate::page::SectionKind;

const WIDE: &str = "16:9";
const PORTRAIT: &str = "4:5";
const SQUARE: &str = "1:1";
const GALLERY: &str = "4:3";

/// One image-bearing field of a section: the slot it fills, the raw field
/// value (prompt, URL, data blob, or absent) and the aspect ratio its image
/// is generated at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageField {
    pub slot: String,
    pub value: Option<String>,
    pub aspect_ratio: &'static str,
}

impl ImageField {
    fn new(slot: impl Into<String>, value: Option<&str>, aspect_ratio: &'static str) -> Self {
        Self {
            slot: slot.into(),
            value: value.map(str::to_string),
            aspect_ratio,
        }
    }
}

/// Slot keys a section can own, in field order.
pub fn slot_keys(section_key: &str, data: &Value) -> Vec<String> {
    image_fields(section_key, data)
        .into_iter()
        .map(|field| field.slot)
        .collect()
}

/// Image-bearing fields of a section.
///
/// - `hero`: `hero_split` for a split layout with a split image prompt,
///   `hero` for an image background with a prompt, `hero_slider_<i>` per slide
///   of a slider background
/// - `nav`: `logo` when the logo type is image
/// - `testimonials`: `testimonial_<i>` per item
/// - `gallery`: `gallery_<i>` per image
/// - `course`: `course_banner` when the media type is image or unset,
///   `chapter_<id>` / `lesson_<id>` per chapter or lesson with an image prompt
///
/// Every other section owns no slots.
pub fn image_fields(section_key: &str, data: &Value) -> Vec<ImageField> {
    match SectionKind::from_key(section_key) {
        SectionKind::Hero => hero_fields(data),
        SectionKind::Nav => nav_fields(data),
        SectionKind::Testimonials => list_fields(data, "items", "avatar", "testimonial", SQUARE),
        SectionKind::Gallery => list_fields(data, "images", "image", "gallery", GALLERY),
        SectionKind::Course => course_fields(data),
        SectionKind::Products | SectionKind::GeneratedProducts | SectionKind::Other => {
            Vec::new()
        }
    }
}

fn hero_fields(data: &Value) -> Vec<ImageField> {
    let mut fields = Vec::new();
    let split_image = str_field(data, "splitImage");
    if str_field(data, "layout") == Some("split") && has_prompt(split_image) {
        fields.push(ImageField::new("hero_split", split_image, PORTRAIT));
    }
    match str_field(data, "backgroundType") {
        Some("image") => {
            let background = str_field(data, "backgroundImage");
            if has_prompt(background) {
                fields.push(ImageField::new("hero", background, WIDE));
            }
        }
        Some("slider") => {
            for (idx, slide) in array_field(data, "slides").iter().enumerate() {
                fields.push(ImageField::new(
                    format!("hero_slider_{idx}"),
                    item_image(slide, "image"),
                    WIDE,
                ));
            }
        }
        _ => {}
    }
    fields
}

fn nav_fields(data: &Value) -> Vec<ImageField> {
    if str_field(data, "logoType") != Some("image") {
        return Vec::new();
    }
    vec![ImageField::new("logo", str_field(data, "logoImage"), SQUARE)]
}

fn list_fields(
    data: &Value,
    list_key: &str,
    image_key: &str,
    slot_prefix: &str,
    aspect_ratio: &'static str,
) -> Vec<ImageField> {
    array_field(data, list_key)
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            ImageField::new(
                format!("{slot_prefix}_{idx}"),
                item_image(item, image_key),
                aspect_ratio,
            )
        })
        .collect()
}

fn course_fields(data: &Value) -> Vec<ImageField> {
    let mut fields = Vec::new();
    if matches!(str_field(data, "mediaType"), None | Some("image")) {
        fields.push(ImageField::new(
            "course_banner",
            str_field(data, "bannerImage"),
            WIDE,
        ));
    }
    for (chapter_idx, chapter) in array_field(data, "chapters").iter().enumerate() {
        let chapter_image = str_field(chapter, "image");
        if has_prompt(chapter_image) {
            let id = id_field(chapter).unwrap_or_else(|| chapter_idx.to_string());
            fields.push(ImageField::new(format!("chapter_{id}"), chapter_image, WIDE));
        }
        for (lesson_idx, lesson) in array_field(chapter, "lessons").iter().enumerate() {
            let lesson_image = str_field(lesson, "image");
            if has_prompt(lesson_image) {
                let id = id_field(lesson)
                    .unwrap_or_else(|| format!("{chapter_idx}_{lesson_idx}"));
                fields.push(ImageField::new(format!("lesson_{id}"), lesson_image, WIDE));
            }
        }
    }
    fields
}

fn has_prompt(value: Option<&str>) -> bool {
    resolve_image(value).needs_generation()
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn array_field<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn item_image<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.as_str().or_else(|| str_field(item, key))
}

fn id_field(data: &Value) -> Option<String> {
    match data.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{image_fields, slot_keys};

    #[test]
    fn hero_split_and_image_background() {
        let data = json!({
            "layout": "split",
            "splitImage": "chef plating dessert",
            "backgroundType": "image",
            "backgroundImage": "warm kitchen",
        });
        assert_eq!(slot_keys("hero", &data), vec!["hero_split", "hero"]);
    }

    #[test]
    fn hero_split_needs_a_prompt() {
        let data = json!({
            "layout": "split",
            "splitImage": "https://cdn.example.com/split.png",
            "backgroundType": "color",
        });
        assert!(slot_keys("hero", &data).is_empty());
    }

    #[test]
    fn hero_slider_gets_one_slot_per_slide() {
        let data = json!({
            "backgroundType": "slider",
            "slides": [{"image": "a"}, {"image": "b"}, {"title": "no image"}],
        });
        assert_eq!(
            slot_keys("hero", &data),
            vec!["hero_slider_0", "hero_slider_1", "hero_slider_2"]
        );
        let fields = image_fields("hero", &data);
        assert_eq!(fields[2].value, None);
        assert_eq!(fields[0].aspect_ratio, "16:9");
    }

    #[test]
    fn nav_logo_only_for_image_logos() {
        assert_eq!(
            slot_keys("nav", &json!({"logoType": "image", "logoImage": "fox mark"})),
            vec!["logo"]
        );
        assert!(slot_keys("nav", &json!({"logoType": "text", "logoText": "Fox"})).is_empty());
    }

    #[test]
    fn testimonials_and_gallery_get_one_slot_per_item() {
        let testimonials = json!({"items": [
            {"name": "Ana", "avatar": "smiling woman"},
            {"name": "Bo", "avatar": "https://cdn.example.com/bo.png"},
            {"name": "Cy"},
        ]});
        assert_eq!(
            slot_keys("testimonials", &testimonials),
            vec!["testimonial_0", "testimonial_1", "testimonial_2"]
        );
        let gallery = json!({"images": ["plated pasta", {"image": "wine cellar"}]});
        let fields = image_fields("gallery", &gallery);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].slot, "gallery_0");
        assert_eq!(fields[1].value.as_deref(), Some("wine cellar"));
    }

    #[test]
    fn course_banner_chapters_and_lessons() {
        let data = json!({
            "bannerImage": "laptop on desk",
            "chapters": [
                {"id": "intro", "image": "open book", "lessons": [
                    {"id": 7, "image": "whiteboard"},
                    {"id": 8},
                ]},
                {"id": "deep", "lessons": []},
            ],
        });
        assert_eq!(
            slot_keys("course", &data),
            vec!["course_banner", "chapter_intro", "lesson_7"]
        );
    }

    #[test]
    fn course_video_media_has_no_banner() {
        let data = json!({"mediaType": "video", "bannerImage": "ignored"});
        assert!(slot_keys("course", &data).is_empty());
    }

    #[test]
    fn other_sections_own_no_slots() {
        assert!(slot_keys("pricing", &json!({"plans": [{"image": "x"}]})).is_empty());
        assert!(slot_keys("products", &json!({"itemIds": ["p1"]})).is_empty());
        assert!(slot_keys("footer", &json!(null)).is_empty());
    }
}
