use std::fmt;

use crate::config::MetadataWeights;
use crate::fingerprint::MetadataBag;

/// True when the relative size difference is at most `tolerance`.
/// Monotone in the larger size, so a sorted sweep may stop at the first miss.
pub fn sizes_within_tolerance(a: u64, b: u64, tolerance: f64) -> bool {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if hi == 0 {
        return true;
    }
    (hi - lo) as f64 <= tolerance * hi as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataComponent {
    Mime,
    Size,
    Dimensions,
    CaptureTime,
}

impl MetadataComponent {
    pub fn label(&self) -> &'static str {
        match self {
            MetadataComponent::Mime => "type",
            MetadataComponent::Size => "size",
            MetadataComponent::Dimensions => "dimensions",
            MetadataComponent::CaptureTime => "capture time",
        }
    }
}

impl fmt::Display for MetadataComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataScore {
    pub score: f64,
    /// Components that agreed, in declaration order.
    pub matched: Vec<MetadataComponent>,
}

/// Weighted agreement over the components applicable to this pair.
///
/// Only pairs that both carry a capture time are scored: type, size and
/// dimensions alone are shared by too many unrelated files. Mime and size
/// then always apply, dimensions only when both sides carry them.
pub fn metadata_similarity(a: &MetadataBag, b: &MetadataBag, weights: &MetadataWeights) -> Option<MetadataScore> {
    let (ca, cb) = (a.captured_at?, b.captured_at?);

    let mut applicable = 0.0;
    let mut agreed = 0.0;
    let mut matched = Vec::new();

    let mut component = |kind: MetadataComponent, weight: f64, equal: bool| {
        applicable += weight;
        if equal {
            agreed += weight;
            matched.push(kind);
        }
    };

    component(
        MetadataComponent::Mime,
        weights.mime,
        a.mime_type.eq_ignore_ascii_case(&b.mime_type),
    );
    component(
        MetadataComponent::Size,
        weights.size,
        sizes_within_tolerance(a.size, b.size, weights.size_tolerance),
    );
    if let (Some(wa), Some(ha), Some(wb), Some(hb)) = (a.width, a.height, b.width, b.height) {
        component(MetadataComponent::Dimensions, weights.dimensions, wa == wb && ha == hb);
    }
    component(MetadataComponent::CaptureTime, weights.capture_time, ca == cb);

    if applicable <= 0.0 {
        return None;
    }
    Some(MetadataScore {
        score: (agreed / applicable).clamp(0.0, 1.0),
        matched,
    })
}

/// "type and size", "type, size and dimensions", ...
pub fn join_components(components: &[MetadataComponent]) -> String {
    let labels: Vec<&str> = components.iter().map(|c| c.label()).collect();
    match labels.as_slice() {
        [] => "nothing".to_string(),
        [one] => (*one).to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
