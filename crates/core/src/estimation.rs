//! Processing-deadline estimation from preset complexity.
//!
//! Presets are develop-settings text (XMP or serialized Lua tables). The
//! worker never parses them structurally; it scans for the markers that
//! correlate with long render times and scales its local deadline from
//! those. The scan is a policy knob, not a contract: a wrong estimate only
//! widens or narrows the deadline, never the server-side timeout sweep.

use std::time::Duration;

/// Marker for AI-mask correction groups. Its presence puts the preset in
/// the masked tier regardless of other operations.
const MASK_GROUP_MARKER: &str = "MaskGroupBasedCorrections";

/// Each occurrence is one rendered mask layer inside a correction group.
const MASK_LAYER_MARKER: &str = "What = \"Mask/Image\"";

/// Operations that render slowly but without mask layers. Counted by
/// presence, not occurrences.
const COMPLEX_OPERATION_MARKERS: [&str; 4] = [
    "LocalizedCorrections",
    "CircularGradientBasedCorrections",
    "GradientBasedCorrections",
    "RetouchAreas",
];

/// Complexity tier read out of a preset body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetComplexity {
    /// Global adjustments only.
    Simple,
    /// One or more slow operations present; `operations` counts distinct
    /// marker kinds, not occurrences.
    Complex { operations: usize },
    /// Mask-based corrections present; `layers` counts individual mask
    /// layers.
    Masked { layers: usize },
}

impl PresetComplexity {
    pub fn from_preset(text: &str) -> Self {
        if text.contains(MASK_GROUP_MARKER) {
            return PresetComplexity::Masked {
                layers: text.matches(MASK_LAYER_MARKER).count(),
            };
        }
        let operations = COMPLEX_OPERATION_MARKERS
            .iter()
            .filter(|marker| text.contains(*marker))
            .count();
        if operations > 0 {
            PresetComplexity::Complex { operations }
        } else {
            PresetComplexity::Simple
        }
    }
}

/// Deadline scaling parameters. Defaults mirror field-tuned values for
/// Lightroom-class editors; workers add their own fixed buffer on top.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    /// Floor for any preset.
    pub base: Duration,
    /// Added per mask layer in the masked tier.
    pub per_mask_layer: Duration,
    /// Added per distinct slow operation in the complex tier.
    pub per_complex_op: Duration,
    /// Ceiling for the masked tier.
    pub max_masked: Duration,
    /// Ceiling for the complex tier.
    pub max_complex: Duration,
    /// Used when the preset body cannot be read at all.
    pub unreadable_default: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            per_mask_layer: Duration::from_secs(2),
            per_complex_op: Duration::from_secs(3),
            max_masked: Duration::from_secs(120),
            max_complex: Duration::from_secs(60),
            unreadable_default: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    /// Deadline for a preset body that was read successfully.
    pub fn estimate(&self, preset_text: &str) -> Duration {
        match PresetComplexity::from_preset(preset_text) {
            PresetComplexity::Simple => self.base,
            PresetComplexity::Complex { operations } => {
                (self.base + self.per_complex_op * operations as u32).min(self.max_complex)
            }
            PresetComplexity::Masked { layers } => {
                (self.base + self.per_mask_layer * layers as u32).min(self.max_masked)
            }
        }
    }
}
