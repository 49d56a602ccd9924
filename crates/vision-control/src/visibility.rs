//! Overlay labels and the visibility set handed to the pipeline.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Overlay layers the pipeline knows how to draw.
pub enum OverlayLabel {
    /// Detection bounding boxes.
    Boxes,
    /// Body-pose skeleton keypoints and limbs.
    BodyPose,
}

impl OverlayLabel {
    /// Every label, in display order.
    pub const ALL: [OverlayLabel; 2] = [OverlayLabel::Boxes, OverlayLabel::BodyPose];

    /// Identifier used by the pipeline's parameter setter.
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayLabel::Boxes => "boxes",
            OverlayLabel::BodyPose => "bodypose",
        }
    }
}

impl fmt::Display for OverlayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown overlay label {0:?} (expected one of: boxes, bodypose)")]
pub struct ParseLabelError(pub String);

impl FromStr for OverlayLabel {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        OverlayLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseLabelError(trimmed.to_string()))
    }
}

/// Set of overlay labels currently enabled for rendering.
///
/// Only the latest value is meaningful; it mirrors toggle state and is never
/// treated as an event log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisibilitySet {
    labels: BTreeSet<OverlayLabel>,
}

impl VisibilitySet {
    /// No overlays shown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every overlay shown.
    pub fn all() -> Self {
        OverlayLabel::ALL.into_iter().collect()
    }

    pub fn contains(&self, label: OverlayLabel) -> bool {
        self.labels.contains(&label)
    }

    /// Returns `true` when the label was not already present.
    pub fn insert(&mut self, label: OverlayLabel) -> bool {
        self.labels.insert(label)
    }

    /// Returns `true` when the label was present.
    pub fn remove(&mut self, label: OverlayLabel) -> bool {
        self.labels.remove(&label)
    }

    /// Force a label on or off.
    pub fn set(&mut self, label: OverlayLabel, visible: bool) {
        if visible {
            self.labels.insert(label);
        } else {
            self.labels.remove(&label);
        }
    }

    /// Flip a label and return its new visibility.
    pub fn toggle(&mut self, label: OverlayLabel) -> bool {
        let visible = !self.contains(label);
        self.set(label, visible);
        visible
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = OverlayLabel> + '_ {
        self.labels.iter().copied()
    }
}

impl FromIterator<OverlayLabel> for VisibilitySet {
    fn from_iter<I: IntoIterator<Item = OverlayLabel>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[OverlayLabel; N]> for VisibilitySet {
    fn from(labels: [OverlayLabel; N]) -> Self {
        labels.into_iter().collect()
    }
}

impl fmt::Display for VisibilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, label) in self.labels.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_is_case_insensitive() {
        assert_eq!("boxes".parse::<OverlayLabel>(), Ok(OverlayLabel::Boxes));
        assert_eq!(" BodyPose ".parse::<OverlayLabel>(), Ok(OverlayLabel::BodyPose));
        assert_eq!(
            "skeleton".parse::<OverlayLabel>(),
            Err(ParseLabelError("skeleton".to_string()))
        );
    }

    #[test]
    fn test_set_has_no_duplicates() {
        let mut set = VisibilitySet::empty();
        assert!(set.insert(OverlayLabel::Boxes));
        assert!(!set.insert(OverlayLabel::Boxes));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_set_equality_ignores_insertion_order() {
        let a = VisibilitySet::from([OverlayLabel::BodyPose, OverlayLabel::Boxes]);
        let b = VisibilitySet::from([OverlayLabel::Boxes, OverlayLabel::BodyPose]);
        assert_eq!(a, b);
        assert_eq!(a, VisibilitySet::all());
    }

    #[test]
    fn test_toggle_flips_membership() {
        let mut set = VisibilitySet::all();
        assert!(!set.toggle(OverlayLabel::Boxes));
        assert!(!set.contains(OverlayLabel::Boxes));
        assert!(set.toggle(OverlayLabel::Boxes));
        assert!(set.contains(OverlayLabel::Boxes));
    }

    #[test]
    fn test_display() {
        assert_eq!(VisibilitySet::empty().to_string(), "{}");
        assert_eq!(VisibilitySet::all().to_string(), "{boxes, bodypose}");
    }

    #[test]
    fn test_serde_uses_pipeline_identifiers() {
        let json = serde_json::to_string(&VisibilitySet::all()).unwrap();
        assert_eq!(json, r#"["boxes","bodypose"]"#);
        let back: VisibilitySet = serde_json::from_str(r#"["bodypose"]"#).unwrap();
        assert_eq!(back, VisibilitySet::from([OverlayLabel::BodyPose]));
    }
}
