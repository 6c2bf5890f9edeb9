//! Messages delivered by a pipeline's bus

use super::{ClockTime, State};

/// One value in a tag message
#[derive(Debug, Clone, PartialEq)]
pub enum TagListValue {
    Str(String),
    UInt(u32),
    Time(ClockTime),
    /// ISO-8601 date or date-time
    DateTime(String),
}

/// Tags extracted from a stream, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList {
    entries: Vec<(String, TagListValue)>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: TagListValue) -> Self {
        self.add(name, value);
        self
    }

    pub fn add(&mut self, name: &str, value: TagListValue) {
        self.entries.push((name.to_string(), value));
    }

    /// First value for a tag name
    pub fn get(&self, name: &str) -> Option<&TagListValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagListValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bus messages the engine understands
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// The current URI finished emitting samples
    EndOfStream,
    /// Network buffer fill level, 0-100
    Buffering(u32),
    Tag(TagList),
    StateChanged {
        /// Name of the element that changed state
        source: String,
        old: State,
        new: State,
    },
    /// A new stream began flowing through `source`
    StreamStart {
        source: String,
    },
    /// A decoder or other plugin is needed but not installed
    MissingPlugin {
        description: String,
        installer_detail: String,
    },
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
    /// Any other message kind, by name
    Other(String),
}

impl BusMessage {
    /// Short kind name for logging
    pub fn kind(&self) -> &str {
        match self {
            BusMessage::EndOfStream => "eos",
            BusMessage::Buffering(_) => "buffering",
            BusMessage::Tag(_) => "tag",
            BusMessage::StateChanged { .. } => "state-changed",
            BusMessage::StreamStart { .. } => "stream-start",
            BusMessage::MissingPlugin { .. } => "missing-plugin",
            BusMessage::Error { .. } => "error",
            BusMessage::Warning { .. } => "warning",
            BusMessage::Other(kind) => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taglist_first_value_wins() {
        let tags = TagList::new()
            .with("title", TagListValue::Str("One".into()))
            .with("title", TagListValue::Str("Two".into()));
        assert_eq!(tags.get("title"), Some(&TagListValue::Str("One".into())));
        assert_eq!(tags.iter().count(), 2);
        assert!(tags.get("artist").is_none());
    }
}
