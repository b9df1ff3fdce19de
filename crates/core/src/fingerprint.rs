use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::domain::{FileRecord, MediaKind};
use crate::hasher::perceptual::{compute_perceptual_hash, PerceptualHash};
use crate::hasher::{self, ContentDigests};
use crate::imaging::OrientedImage;

/// Structural metadata. Size, mime and creation time come from the record;
/// the image fields only when decoding succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBag {
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub captured_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintFailure {
    /// The byte accessor failed; no digests could be computed.
    Unreadable(String),
    /// Bytes were read but the declared image could not be decoded.
    Undecodable(String),
}

/// Everything the evaluator needs to know about one file.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub file_id: String,
    pub kind: MediaKind,
    pub digests: Option<ContentDigests>,
    pub perceptual: Option<PerceptualHash>,
    pub metadata: MetadataBag,
    pub failure: Option<FingerprintFailure>,
}

impl Fingerprint {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn sha256(&self) -> Option<&str> {
        self.digests.as_ref().map(|d| d.sha256.as_str())
    }
}

/// Fingerprint one file. Total: failures are recorded on the result, never returned.
pub fn extract(file: &FileRecord) -> Fingerprint {
    let kind = file.kind();
    let mut fp = Fingerprint {
        file_id: file.id.clone(),
        kind,
        digests: None,
        perceptual: None,
        metadata: MetadataBag {
            size: file.size,
            mime_type: file.mime_type.clone(),
            created_at: file.created_at,
            width: None,
            height: None,
            captured_at: None,
        },
        failure: None,
    };

    if kind != MediaKind::Image {
        match hasher::compute_digests(&file.source) {
            Ok(d) => fp.digests = Some(d),
            Err(e) => {
                warn!(file = %file.id, error = %e, "unreadable file");
                fp.failure = Some(FingerprintFailure::Unreadable(e.to_string()));
            }
        }
        return fp;
    }

    // Images are decoded anyway, so read them whole and hash the buffer
    let bytes = match file.source.read_all() {
        Ok(b) => b,
        Err(e) => {
            warn!(file = %file.id, error = %e, "unreadable image");
            fp.failure = Some(FingerprintFailure::Unreadable(e.to_string()));
            return fp;
        }
    };
    fp.digests = Some(hasher::digest_bytes(&bytes));

    match OrientedImage::decode(&bytes) {
        Ok(image) => {
            fp.metadata.width = Some(image.width as u32);
            fp.metadata.height = Some(image.height as u32);
            fp.metadata.captured_at = image.exif.captured_at;
            fp.perceptual = compute_perceptual_hash(&image);
        }
        Err(e) => {
            warn!(file = %file.id, error = %e, "image could not be decoded");
            fp.failure = Some(FingerprintFailure::Undecodable(e.to_string()));
        }
    }

    fp
}
