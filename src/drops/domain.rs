// Domain types - Pure, immutable, no side effects
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::geo::LatLng;
use crate::moderation::ModerationVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Text,
    Photo,
    Audio,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "TEXT",
            ContentType::Photo => "PHOTO",
            ContentType::Audio => "AUDIO",
            ContentType::Video => "VIDEO",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(ContentType::Text),
            "PHOTO" => Ok(ContentType::Photo),
            "AUDIO" => Ok(ContentType::Audio),
            "VIDEO" => Ok(ContentType::Video),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// A location-anchored note as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRecord {
    /// Empty until the catalog assigns one
    #[serde(default)]
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub created_by: String,
    #[serde(default)]
    pub group_code: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub content_type: ContentType,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_storage_path: Option<String>,
    #[serde(default)]
    pub moderation: Option<ModerationVerdict>,
    #[serde(default)]
    pub collected_by: BTreeMap<String, bool>,
    #[serde(default)]
    pub liked_by: BTreeMap<String, bool>,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl DropRecord {
    pub fn location(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    /// Users with a truthy entry in the collector map.
    pub fn collectors(&self) -> BTreeSet<&str> {
        truthy_keys(&self.collected_by)
    }

    pub fn has_liked(&self, user_id: &str) -> bool {
        self.liked_by.get(user_id).copied().unwrap_or(false)
    }

    /// Apply a like/unlike by `user_id`.
    ///
    /// Returns `Cow::Borrowed(self)` when the user is already in the target
    /// state, so callers can skip the write entirely. Otherwise returns an
    /// updated copy whose `like_count` is recounted from `liked_by`.
    pub fn set_liked(&self, user_id: &str, liked: bool) -> Cow<'_, DropRecord> {
        if self.has_liked(user_id) == liked {
            return Cow::Borrowed(self);
        }

        let mut updated = self.clone();
        if liked {
            updated.liked_by.insert(user_id.to_string(), true);
        } else {
            updated.liked_by.remove(user_id);
        }
        updated.like_count = truthy_keys(&updated.liked_by).len() as u32;
        Cow::Owned(updated)
    }

    /// Mark `user_id` as a collector. Borrowed when already collected.
    pub fn with_collector(&self, user_id: &str) -> Cow<'_, DropRecord> {
        if self.collected_by.get(user_id).copied().unwrap_or(false) {
            return Cow::Borrowed(self);
        }

        let mut updated = self.clone();
        updated.collected_by.insert(user_id.to_string(), true);
        Cow::Owned(updated)
    }

    /// Group visibility: groupless drops are always visible, grouped drops
    /// only when their normalized code is in `allowed`.
    pub fn visible_to_groups(&self, allowed: &BTreeSet<String>) -> bool {
        match self.group_code.as_deref().and_then(normalize_group_code) {
            None => true,
            Some(code) => allowed.contains(&code),
        }
    }

    /// Client-editable fields from `self`, server-owned state from `stored`.
    ///
    /// Collectors, likes and the creation time always come from the stored
    /// version. The verdict is kept while the media reference is unchanged;
    /// new media starts unmoderated.
    pub fn edited_over(mut self, stored: &DropRecord) -> DropRecord {
        self.moderation = if self.media_storage_path == stored.media_storage_path {
            stored.moderation.clone()
        } else {
            None
        };
        self.collected_by = stored.collected_by.clone();
        self.liked_by = stored.liked_by.clone();
        self.like_count = stored.like_count;
        self.created_at = stored.created_at;
        self
    }

    /// A freshly submitted drop carries no server-owned state.
    pub fn as_submitted(mut self) -> DropRecord {
        self.moderation = None;
        self.collected_by.clear();
        self.liked_by.clear();
        self.like_count = 0;
        self
    }

    /// Self-contained copy of what a collector keeps.
    pub fn snapshot(&self) -> DropSnapshot {
        DropSnapshot {
            drop_id: self.id.clone(),
            text: self.text.clone(),
            media_url: self.media_storage_path.clone(),
            content_type: self.content_type,
            lat: self.lat,
            lng: self.lng,
            group_code: self.group_code.clone(),
            created_at: self.created_at,
        }
    }
}

/// Content captured at trigger time so a pick-up works without a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropSnapshot {
    pub drop_id: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub content_type: ContentType,
    pub lat: f64,
    pub lng: f64,
    pub group_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Before/after images of one drop document write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropWrite {
    pub before: Option<DropRecord>,
    pub after: Option<DropRecord>,
}

impl DropWrite {
    /// Collectors present after the write but not before, minus the creator.
    pub fn new_collectors(&self) -> Vec<String> {
        let Some(after) = &self.after else {
            return Vec::new();
        };
        let before = self
            .before
            .as_ref()
            .map(|d| d.collectors())
            .unwrap_or_default();

        after
            .collectors()
            .into_iter()
            .filter(|uid| !before.contains(uid) && *uid != after.created_by)
            .map(str::to_string)
            .collect()
    }
}

/// Trim and uppercase a group code; empty codes normalize to `None`.
pub fn normalize_group_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

pub fn normalize_groups<I, S>(codes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    codes
        .into_iter()
        .filter_map(|c| normalize_group_code(c.as_ref()))
        .collect()
}

fn truthy_keys(map: &BTreeMap<String, bool>) -> BTreeSet<&str> {
    map.iter()
        .filter(|(_, v)| **v)
        .map(|(k, _)| k.as_str())
        .collect()
}

#[cfg(test)]
pub(crate) fn sample_drop(id: &str, lat: f64, lng: f64, created_by: &str) -> DropRecord {
    DropRecord {
        id: id.to_string(),
        lat,
        lng,
        created_by: created_by.to_string(),
        group_code: None,
        is_deleted: false,
        content_type: ContentType::Text,
        text: Some(format!("hello from {}", id)),
        media_storage_path: None,
        moderation: None,
        collected_by: BTreeMap::new(),
        liked_by: BTreeMap::new(),
        like_count: 0,
        created_at: Utc::now(),
    }
}
