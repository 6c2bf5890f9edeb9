//! Tags reported by the framework for network streams

use exaile_core::media::{TagList, TagListValue};
use exaile_core::{TagUpdate, TagValue, Track};
use std::collections::BTreeMap;

const KEEP: &[&str] = &[
    "bitrate",
    "duration",
    "track-number",
    "track-count",
    "album-disc-number",
    "album-disc-count",
    "album",
    "artist",
    "genre",
    "comment",
    "title",
    "datetime",
];

/// Result of [`parse_stream_tags`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTags {
    /// Changes to apply to the track
    pub update: TagUpdate,
    /// The raw title changed, i.e. the stream moved on to a new song
    pub new_song: bool,
}

/// Translate a stream tag message into track tag changes
///
/// Nothing is written to `track`; it is only read to decide how titles and
/// albums are filled in.
pub fn parse_stream_tags(track: &Track, tag_list: &TagList) -> StreamTags {
    let mut tags: BTreeMap<&str, Vec<&TagListValue>> = BTreeMap::new();
    for (name, value) in tag_list.iter() {
        if KEEP.contains(&name) {
            tags.entry(name).or_default().push(value);
        }
    }

    let mut update = TagUpdate::new();
    let mut set = |key: &str, value: TagValue| {
        update.insert(key.to_string(), Some(value));
    };

    if let Some(bitrate) = first_uint(&tags, "bitrate") {
        set("__bitrate", TagValue::Number(f64::from(bitrate)));
    }

    if let Some(TagListValue::Time(duration)) = first(&tags, "duration") {
        set("__length", TagValue::Number(duration.seconds_f64()));
    }

    if let Some(n) = first_uint(&tags, "track-number") {
        set("tracknumber", numbered(n, first_uint(&tags, "track-count")).into());
    }

    if let Some(n) = first_uint(&tags, "album-disc-number") {
        set("discnumber", numbered(n, first_uint(&tags, "album-disc-count")).into());
    }

    for (tag, key) in [("album", "album"), ("artist", "artist"), ("genre", "genre")] {
        if let Some(values) = texts(&tags, tag) {
            set(key, values.into());
        }
    }

    if let Some(value) = first(&tags, "datetime") {
        let date = match value {
            TagListValue::DateTime(s) | TagListValue::Str(s) => Some(s.clone()),
            _ => None,
        };
        if let Some(date) = date {
            set("date", date.into());
        }
    }

    // A comment stands in for a missing album
    if let Some(values) = texts(&tags, "comment") {
        if track.get_tag_raw("album").is_none() {
            set("album", values.into());
        }
    }

    let mut new_song = false;
    if let Some(values) = texts(&tags, "title") {
        let raw = TagValue::Text(values.clone());
        if track.get_tag_raw("__rawtitle").as_ref() != Some(&raw) {
            set("__rawtitle", raw);
            new_song = true;
        }

        let is_mp3 = track.uri().to_lowercase().ends_with(".mp3");
        match values[0].split_once(" - ") {
            Some((artist, title)) if track.get_tag_raw("artist").is_none() && !is_mp3 => {
                set("artist", artist.into());
                set("title", title.into());
            }
            _ => set("title", TagValue::Text(values.clone())),
        }
    }

    StreamTags { update, new_song }
}

fn first<'a>(tags: &BTreeMap<&str, Vec<&'a TagListValue>>, name: &str) -> Option<&'a TagListValue> {
    tags.get(name).and_then(|v| v.first()).copied()
}

fn first_uint(tags: &BTreeMap<&str, Vec<&TagListValue>>, name: &str) -> Option<u32> {
    match first(tags, name)? {
        TagListValue::UInt(n) => Some(*n),
        TagListValue::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn texts(tags: &BTreeMap<&str, Vec<&TagListValue>>, name: &str) -> Option<Vec<String>> {
    let values: Vec<String> = tags
        .get(name)?
        .iter()
        .filter_map(|v| match v {
            TagListValue::Str(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .collect();
    (!values.is_empty()).then_some(values)
}

fn numbered(n: u32, count: Option<u32>) -> String {
    match count {
        Some(c) if c > 0 => format!("{}/{}", n, c),
        _ => n.to_string(),
    }
}
