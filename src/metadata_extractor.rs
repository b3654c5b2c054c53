use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag};
use log::debug;
use std::collections::BTreeMap;
use std::io::Cursor;

/// EXIF metadata pulled from original screenshot bytes.
///
/// The tag map is preserved as an opaque JSON blob on the screenshot row;
/// only `taken_at` participates in application logic.
#[derive(Debug, Default)]
pub struct ScreenshotMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub exif_json: Option<String>,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn extract(bytes: &[u8]) -> ScreenshotMetadata {
        let mut metadata = ScreenshotMetadata::default();

        let mut cursor = Cursor::new(bytes);
        let exif_reader = match Reader::new().read_from_container(&mut cursor) {
            Ok(reader) => reader,
            Err(e) => {
                debug!("No EXIF data in image: {}", e);
                return metadata;
            }
        };

        // Try date tags in order of preference, take the first that parses.
        metadata.taken_at = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
            .iter()
            .filter_map(|tag| exif_reader.get_field(*tag, In::PRIMARY))
            .filter_map(|field| Self::parse_exif_datetime(&field.display_value().to_string()))
            .next();

        let mut tags: BTreeMap<String, String> = BTreeMap::new();
        for field in exif_reader.fields() {
            if field.ifd_num != In::PRIMARY {
                continue;
            }
            let value = Self::clean_exif_string(field.display_value().with_unit(&exif_reader));
            if !value.is_empty() {
                tags.insert(field.tag.to_string(), value);
            }
        }

        if !tags.is_empty() {
            metadata.exif_json = serde_json::to_string(&tags).ok();
        }

        metadata
    }

    /// EXIF dates look like "2024-01-21 15:44:02" or "2024:01:21 15:44:02".
    fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
        let cleaned = value.trim().trim_matches('"');
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, fmt) {
                return Some(naive.and_utc());
            }
        }
        None
    }

    fn clean_exif_string(value: impl std::fmt::Display) -> String {
        value
            .to_string()
            .replace('\0', "")
            .trim()
            .trim_matches('"')
            .trim()
            .to_string()
    }
}
