// Safety verdict types - pure data plus a deterministic merge
use serde::{Deserialize, Serialize};

/// Graded signal level reported by the content classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    Unknown,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

/// Per-category safety signals for one piece of media.
///
/// Every field is optional: a classifier may report only a subset, and a
/// later verdict fills in or overrides individual fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adult: Option<Likelihood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violence: Option<Likelihood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub racy: Option<Likelihood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical: Option<Likelihood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof: Option<Likelihood>,
}

impl ModerationVerdict {
    /// Merge `incoming` over `existing`, field by field.
    ///
    /// Fields present in `incoming` win; fields it leaves unset keep the
    /// existing value. Applying the same verdict twice yields the same result.
    pub fn merged(existing: Option<&ModerationVerdict>, incoming: &ModerationVerdict) -> Self {
        let base = existing.cloned().unwrap_or_default();
        Self {
            adult: incoming.adult.or(base.adult),
            violence: incoming.violence.or(base.violence),
            racy: incoming.racy.or(base.racy),
            medical: incoming.medical.or(base.medical),
            spoof: incoming.spoof.or(base.spoof),
        }
    }

    /// True when adult, violent or racy content is at least likely.
    pub fn is_flagged(&self) -> bool {
        [self.adult, self.violence, self.racy]
            .into_iter()
            .flatten()
            .any(|level| level >= Likelihood::Likely)
    }
}
