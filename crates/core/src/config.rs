use std::path::Path;

use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};

use crate::domain::ScanOptions;
use crate::error::{Error, Result};

/// Which scan option, if any, switches the perceptual (visual) signal on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptualGate {
    /// Compare images visually whenever both carry a perceptual hash.
    #[default]
    Always,
    /// Only when `enable_content_scanning` is set.
    WithContent,
    /// Only when `enable_metadata_scanning` is set.
    WithMetadata,
}

impl PerceptualGate {
    pub fn is_open(&self, options: &ScanOptions) -> bool {
        match self {
            PerceptualGate::Always => true,
            PerceptualGate::WithContent => options.enable_content_scanning,
            PerceptualGate::WithMetadata => options.enable_metadata_scanning,
        }
    }
}

/// Components of the metadata signal. Pairs are only scored when both sides
/// carry a capture time, and `capture_time` must outweigh the other weights
/// combined, so a capture-time mismatch never reaches the lowest threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataWeights {
    pub mime: f64,
    pub size: f64,
    pub dimensions: f64,
    pub capture_time: f64,
    /// Largest relative size difference still counted as "same size".
    pub size_tolerance: f64,
}

impl Default for MetadataWeights {
    fn default() -> Self {
        Self {
            mime: 0.1,
            size: 0.2,
            dimensions: 0.15,
            capture_time: 0.55,
            size_tolerance: 0.01,
        }
    }
}

impl MetadataWeights {
    pub fn total(&self) -> f64 {
        self.mime + self.size + self.dimensions + self.capture_time
    }

    /// Upper bound on the metadata score of any pair for which a component
    /// carrying `weight` scored zero.
    pub fn ceiling_without(&self, weight: f64) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        1.0 - weight / total
    }

    pub fn validate(&self) -> Result<()> {
        let weights = [self.mime, self.size, self.dimensions, self.capture_time];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::InvalidConfig(
                "metadata weights must be finite and non-negative".to_string(),
            ));
        }
        if self.total() <= 0.0 {
            return Err(Error::InvalidConfig(
                "at least one metadata weight must be positive".to_string(),
            ));
        }
        if self.ceiling_without(self.capture_time) >= ScanOptions::MIN_THRESHOLD {
            return Err(Error::InvalidConfig(format!(
                "capture_time weight ({}) must exceed the other metadata weights combined",
                self.capture_time
            )));
        }
        if !(0.0..1.0).contains(&self.size_tolerance) {
            return Err(Error::InvalidConfig(format!(
                "size_tolerance must be within [0, 1), got {}",
                self.size_tolerance
            )));
        }
        Ok(())
    }
}

/// Engine tunables that are not part of a scan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    pub perceptual_gate: PerceptualGate,
    pub metadata: MetadataWeights,
    pub embed_batch_size: usize,
    /// Text is truncated to this many characters before embedding.
    pub max_text_chars: usize,
    /// Bounds the worker pool of each parallel stage. `None` uses rayon's global pool.
    pub max_workers: Option<usize>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            perceptual_gate: PerceptualGate::default(),
            metadata: MetadataWeights::default(),
            embed_batch_size: 32,
            max_text_chars: 10_000,
            max_workers: None,
        }
    }
}

impl ScanPolicy {
    pub fn validate(&self) -> Result<()> {
        self.metadata.validate()?;
        if self.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("embed_batch_size must be at least 1".to_string()));
        }
        if self.max_text_chars == 0 {
            return Err(Error::InvalidConfig("max_text_chars must be at least 1".to_string()));
        }
        if self.max_workers == Some(0) {
            return Err(Error::InvalidConfig("max_workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: ScanPolicy,
}

impl EngineConfig {
    /// Load from an optional config file (any format the `config` crate
    /// recognises by extension) layered under `RECLAIM_*` environment
    /// variables, e.g. `RECLAIM_POLICY__EMBED_BATCH_SIZE=16`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(ConfigFile::from(path).required(true));
        }
        let cfg: EngineConfig = builder
            .add_source(
                Environment::with_prefix("RECLAIM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.policy.validate()?;
        Ok(cfg)
    }
}
