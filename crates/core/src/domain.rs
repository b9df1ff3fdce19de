use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Coarse content family, derived from the mime type.
/// Candidate generation never compares content signals across families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Text,
    Other,
}

impl MediaKind {
    /// Classify a mime type. Only raster formats the decoder handles count as images.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" | "image/png" | "image/gif"
            | "image/webp" | "image/bmp" | "image/x-ms-bmp" | "image/tiff" => MediaKind::Image,
            "application/json" | "application/xml" => MediaKind::Text,
            _ if essence.starts_with("text/") => MediaKind::Text,
            _ => MediaKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Text => "text",
            MediaKind::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess a mime type from a file extension. Unknown extensions map to
/// `application/octet-stream`.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Accessor for a file's bytes. The engine only ever reads through it.
#[derive(Debug, Clone)]
pub enum ByteSource {
    Memory(Arc<[u8]>),
    Path(PathBuf),
}

impl ByteSource {
    /// Open a streaming reader over the content.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match self {
            ByteSource::Memory(bytes) => Ok(Box::new(io::Cursor::new(&bytes[..]))),
            ByteSource::Path(path) => {
                let file = fs::File::open(path)?;
                Ok(Box::new(io::BufReader::with_capacity(64 * 1024, file)))
            }
        }
    }

    /// Read the whole content into memory.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        match self {
            ByteSource::Memory(bytes) => Ok(bytes.to_vec()),
            ByteSource::Path(path) => fs::read(path),
        }
    }
}

/// Immutable input record, owned by the upload subsystem.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub source: ByteSource,
}

impl FileRecord {
    /// Build a record over in-memory bytes. The size is taken from the buffer.
    pub fn in_memory(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        created_at: DateTime<Utc>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            id: id.into(),
            name: name.into(),
            size: bytes.len() as u64,
            mime_type: mime_type.into(),
            created_at,
            source: ByteSource::Memory(bytes),
        }
    }

    /// Build a record for a file already persisted on disk.
    /// The id is the path as given; the mime type is guessed from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let id = path.to_string_lossy().to_string();
        Self::from_path_with_id(path, id)
    }

    fn from_path_with_id(path: &Path, id: String) -> Result<Self> {
        let meta = fs::metadata(path)?;
        // Creation time is not available on every filesystem
        let created = meta.created().or_else(|_| meta.modified())?;
        let mime = path
            .extension()
            .and_then(|e| e.to_str())
            .map(mime_for_extension)
            .unwrap_or("application/octet-stream");

        Ok(Self {
            id,
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: meta.len(),
            mime_type: mime.to_string(),
            created_at: DateTime::<Utc>::from(created),
            source: ByteSource::Path(path.to_path_buf()),
        })
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }
}

/// Collect records for every regular file under `dir`, in file-name order.
/// Ids are the paths relative to `dir`, using `/` separators.
pub fn records_from_dir(dir: &Path) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        records.push(FileRecord::from_path_with_id(entry.path(), rel)?);
    }
    Ok(records)
}

/// Per-request scan options. Defaults mirror the upload API's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub enable_hash_scanning: bool,
    pub enable_content_scanning: bool,
    pub enable_metadata_scanning: bool,
    pub similarity_threshold: f64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            enable_hash_scanning: true,
            enable_content_scanning: true,
            enable_metadata_scanning: true,
            similarity_threshold: 0.85,
        }
    }
}

impl ScanOptions {
    pub const MIN_THRESHOLD: f64 = 0.5;
    pub const MAX_THRESHOLD: f64 = 1.0;

    pub fn validate(&self) -> Result<()> {
        let t = self.similarity_threshold;
        if t.is_nan() || !(Self::MIN_THRESHOLD..=Self::MAX_THRESHOLD).contains(&t) {
            return Err(Error::InvalidThreshold(t));
        }
        Ok(())
    }

    /// True when at least one scanning flag is set.
    pub fn any_enabled(&self) -> bool {
        self.enable_hash_scanning || self.enable_content_scanning || self.enable_metadata_scanning
    }
}

/// The signal that decided a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Visual,
    Content,
    Metadata,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Visual => "visual",
            MatchType::Content => "content",
            MatchType::Metadata => "metadata",
        }
    }

    /// Group-level reason when every match in a group shares this type.
    pub fn group_reason(&self) -> &'static str {
        match self {
            MatchType::Exact => "Exact hash match",
            MatchType::Visual => "Visual similarity (perceptual hash)",
            MatchType::Content => "Content similarity (embedding)",
            MatchType::Metadata => "Metadata match",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a file in the result: the record's descriptors plus
/// what fingerprinting learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub hash_short: Option<String>,
    pub hash_sha256: Option<String>,
    pub perceptual_hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl FileSummary {
    pub fn from_parts(file: &FileRecord, fingerprint: &Fingerprint) -> Self {
        Self {
            id: file.id.clone(),
            original_name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            created_at: file.created_at,
            hash_short: fingerprint.digests.as_ref().map(|d| d.short.clone()),
            hash_sha256: fingerprint.digests.as_ref().map(|d| d.sha256.clone()),
            perceptual_hash: fingerprint.perceptual.map(|p| p.to_hex()),
            width: fingerprint.metadata.width,
            height: fingerprint.metadata.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub file: FileSummary,
    pub similarity: f64,
    pub reason: String,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: String,
    pub group_index: usize,
    pub keep_file: FileSummary,
    pub duplicates: Vec<DuplicateMatch>,
    pub reason: String,
    pub total_size_saved: u64,
}

impl DuplicateGroup {
    /// Number of files in the group, keep file included.
    pub fn member_count(&self) -> usize {
        self.duplicates.len() + 1
    }
}

/// Pipeline stages, in execution order. A scan is idle before the first and
/// done once `scan` returns, so neither gets a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStage {
    Fingerprinting,
    Embedding,
    Evaluating,
    Grouping,
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStage::Fingerprinting => "fingerprinting",
            ScanStage::Embedding => "embedding",
            ScanStage::Evaluating => "evaluating",
            ScanStage::Grouping => "grouping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: ScanStage,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub upload_id: String,
    pub groups: Vec<DuplicateGroup>,
    pub total_files: usize,
    pub duplicates_found: usize,
    pub size_saved: u64,
    pub scan_time: f64,
    pub scan_options: ScanOptions,
    /// Set when content scanning was requested but the embedding backend failed.
    pub content_scanning_skipped: bool,
    pub stage_timings: Vec<StageTiming>,
}
