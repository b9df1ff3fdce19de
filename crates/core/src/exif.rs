use std::io::Cursor;

use chrono::NaiveDateTime;

/// The EXIF fields the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifInfo {
    /// Orientation tag (1-8), 1 when missing.
    pub orientation: u8,
    pub captured_at: Option<NaiveDateTime>,
}

impl Default for ExifInfo {
    fn default() -> Self {
        Self {
            orientation: 1,
            captured_at: None,
        }
    }
}

/// Read orientation and capture time from an in-memory image container.
/// Missing or unparseable EXIF yields the defaults, never an error.
pub fn read_exif(bytes: &[u8]) -> ExifInfo {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(e) => e,
        Err(_) => return ExifInfo::default(),
    };

    let orientation = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
        .map(|v| v as u8)
        .unwrap_or(1);

    let captured_at = [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .iter()
        .filter_map(|&tag| exif.get_field(tag, exif::In::PRIMARY))
        .find_map(|field| match field.value {
            exif::Value::Ascii(ref parts) => parts
                .first()
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(parse_exif_datetime),
            _ => None,
        });

    ExifInfo {
        orientation,
        captured_at,
    }
}

/// Parse "YYYY:MM:DD HH:MM:SS" (raw EXIF) or "YYYY-MM-DD HH:MM:SS".
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('\0');
    NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}
