//! Read-only track handle consumed by the playback engine
//!
//! Tracks are owned by the collection/playlist layer. The engine only keeps
//! cheap clones of the handle while a track is playing and reads a handful
//! of tags from it:
//!
//! - `__length`: duration in seconds
//! - `__startoffset`: where playback begins, in seconds from file start
//! - `__stopoffset`: where playback stops, `0` meaning end of track
//!
//! Two handles are equal only when they refer to the same track object, so
//! "is this stream playing *that* track" checks work like identity checks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// A single tag value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Numeric tag (`__length`, `__bitrate`, `__playcount`, ...)
    Number(f64),
    /// Text tag; most tags can carry several values
    Text(Vec<String>),
}

impl TagValue {
    /// Numeric view of the value; text is parsed from its first entry
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Number(n) => Some(*n),
            TagValue::Text(values) => values.first().and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Display form: numbers as-is, multiple values joined with " / "
    pub fn display(&self) -> String {
        match self {
            TagValue::Number(n) => n.to_string(),
            TagValue::Text(values) => values.join(" / "),
        }
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Number(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(vec![value.to_string()])
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(vec![value])
    }
}

impl From<Vec<String>> for TagValue {
    fn from(value: Vec<String>) -> Self {
        TagValue::Text(value)
    }
}

/// Tag changes to apply; `None` removes the tag
pub type TagUpdate = BTreeMap<String, Option<TagValue>>;

struct TrackInner {
    id: u64,
    uri: String,
    tags: RwLock<BTreeMap<String, TagValue>>,
}

/// Shared handle to a track
#[derive(Clone)]
pub struct Track {
    inner: Arc<TrackInner>,
}

impl Track {
    /// Create a track for a URI with no tags
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
                uri: uri.into(),
                tags: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Create a track with a known length in seconds
    pub fn with_length(uri: impl Into<String>, length: f64) -> Self {
        let track = Self::new(uri);
        track.set_tag_raw("__length", Some(TagValue::Number(length)));
        track
    }

    /// Process-unique id of this track object
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Location of the media
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// URI scheme, `None` for bare paths
    pub fn scheme(&self) -> Option<&str> {
        self.inner.uri.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Whether the media lives on a local filesystem
    pub fn is_local(&self) -> bool {
        matches!(self.scheme(), None | Some("file"))
    }

    /// Raw tag value
    pub fn get_tag_raw(&self, tag: &str) -> Option<TagValue> {
        self.inner
            .tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
    }

    /// Tag formatted for display
    pub fn get_tag_display(&self, tag: &str) -> Option<String> {
        self.get_tag_raw(tag).map(|value| value.display())
    }

    /// Set or remove one tag
    pub fn set_tag_raw(&self, tag: &str, value: Option<TagValue>) {
        let mut update = TagUpdate::new();
        update.insert(tag.to_string(), value);
        self.set_tags(update);
    }

    /// Apply several tag changes at once and return the keys that changed
    pub fn set_tags(&self, update: TagUpdate) -> Vec<String> {
        let mut tags = self
            .inner
            .tags
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut changed = Vec::new();

        for (key, value) in update {
            let differs = match &value {
                Some(v) => tags.get(&key) != Some(v),
                None => tags.contains_key(&key),
            };
            if !differs {
                continue;
            }
            match value {
                Some(v) => {
                    tags.insert(key.clone(), v);
                }
                None => {
                    tags.remove(&key);
                }
            }
            changed.push(key);
        }

        changed
    }

    /// Length in seconds, `None` when unknown (streams)
    pub fn length(&self) -> Option<f64> {
        self.number_tag("__length").filter(|len| *len > 0.0)
    }

    /// Start offset in seconds, `0` when unset
    pub fn start_offset(&self) -> f64 {
        self.number_tag("__startoffset").unwrap_or(0.0).max(0.0)
    }

    /// Stop offset in seconds, `0` meaning end of track
    pub fn stop_offset(&self) -> f64 {
        self.number_tag("__stopoffset").unwrap_or(0.0).max(0.0)
    }

    fn number_tag(&self, tag: &str) -> Option<f64> {
        self.get_tag_raw(tag).and_then(|v| v.as_f64())
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Track {}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.inner.id)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_tag_display("title") {
            Some(title) => write!(f, "{} ({})", title, self.inner.uri),
            None => write!(f, "{}", self.inner.uri),
        }
    }
}
