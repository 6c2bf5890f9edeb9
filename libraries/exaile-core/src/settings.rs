//! Settings store
//!
//! Options are addressed as `section/key` (the section may itself contain
//! slashes, e.g. `plugin/equalizer/band-0`). Values are typed and persisted
//! as JSON, one object per section. Loading goes through the `config` crate
//! so `EXAILE_<SECTION>__<KEY>` environment variables can override the file.
//!
//! Writes are published two ways: an [`Event::OptionSet`] on the attached
//! event bus, and a key notification on every [`SettingsWatch`] whose prefix
//! matches. Watches are plain channels, which lets the single-threaded
//! player drain them on its own loop.

use crate::error::{ExaileError, Result};
use crate::event::{Event, EventBus};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Version written to `settings/version`
pub const SETTINGS_VERSION: i64 = 1;

/// A stored option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<u32> for SettingValue {
    fn from(value: u32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(value: Vec<String>) -> Self {
        SettingValue::List(value)
    }
}

/// Conversion out of a stored value
pub trait FromSettingValue: Sized {
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSettingValue for bool {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Int(i) => Some(*i != 0),
            SettingValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromSettingValue for i64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SettingValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromSettingValue for u64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|i| u64::try_from(i).ok())
    }
}

impl FromSettingValue for u32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|i| u32::try_from(i).ok())
    }
}

impl FromSettingValue for f64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromSettingValue for String {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromSettingValue for Vec<String> {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::List(l) => Some(l.clone()),
            _ => None,
        }
    }
}

/// Built-in defaults for the options the player reads
pub fn defaults() -> BTreeMap<String, SettingValue> {
    let entries: [(&str, SettingValue); 18] = [
        ("player/engine", "gstreamer".into()),
        ("player/audiosink", "auto".into()),
        ("player/audiosink_device", "auto".into()),
        ("player/custom_sink_pipe", "".into()),
        ("player/disable_autoswitch", false.into()),
        ("player/crossfading", false.into()),
        ("player/crossfade_duration", 3000_i64.into()),
        ("player/user_fade_enabled", false.into()),
        ("player/user_fade", 1000_i64.into()),
        ("player/auto_advance", true.into()),
        ("player/auto_advance_delay", 0_i64.into()),
        ("player/gapless_playback", true.into()),
        ("player/volume", 1.0_f64.into()),
        ("player/resume_playback", true.into()),
        ("player/resume_paused", false.into()),
        ("queue/enqueue_begins_playback", true.into()),
        ("queue/remove_item_when_played", true.into()),
        ("settings/version", SETTINGS_VERSION.into()),
    ];
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Receiving end of a settings subscription
///
/// Yields the full key of every option written under the watched prefix.
pub struct SettingsWatch {
    rx: Receiver<String>,
}

impl SettingsWatch {
    /// Take every pending change notification without blocking
    pub fn drain(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }
}

struct Watcher {
    prefix: String,
    tx: Sender<String>,
}

/// Typed `section/key` option store
pub struct SettingsManager {
    values: RwLock<BTreeMap<String, SettingValue>>,
    defaults: BTreeMap<String, SettingValue>,
    location: Option<PathBuf>,
    dirty: AtomicBool,
    watchers: Mutex<Vec<Watcher>>,
    events: Option<EventBus>,
}

impl SettingsManager {
    /// In-memory store seeded with [`defaults`]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            defaults: defaults(),
            location: None,
            dirty: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// Load options from a JSON file (missing file means empty store),
    /// layering `EXAILE_*` environment overrides on top
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let built = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("EXAILE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let tree: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
            built.try_deserialize()?;

        let mut values = BTreeMap::new();
        for (section, keys) in tree {
            for (key, raw) in keys {
                let full = format!("{}/{}", section, key);
                match serde_json::from_value::<SettingValue>(raw) {
                    Ok(value) => {
                        values.insert(full, value);
                    }
                    Err(e) => warn!("Ignoring unreadable option {}: {}", full, e),
                }
            }
        }

        if let Some(found) = values.get("settings/version").and_then(i64::from_setting) {
            if found > SETTINGS_VERSION {
                return Err(ExaileError::SettingsVersion {
                    found,
                    supported: SETTINGS_VERSION,
                });
            }
        }

        info!("Loaded {} options from {}", values.len(), path.display());

        let mut manager = Self::new();
        manager.values = RwLock::new(values);
        manager.location = Some(path.to_path_buf());
        Ok(manager)
    }

    /// Publish `option_set` events on this bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// File this store saves to, if any
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Current value, falling back to the built-in default
    pub fn get_value(&self, key: &str) -> Option<SettingValue> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(key)
            .or_else(|| self.defaults.get(key))
            .cloned()
    }

    /// Typed read; `default` is used when the option is unset or has the
    /// wrong type
    pub fn get_option<T: FromSettingValue>(&self, key: &str, default: T) -> T {
        match self.get_value(key) {
            Some(value) => T::from_setting(&value).unwrap_or_else(|| {
                warn!("Option {} has unexpected type {:?}", key, value);
                default
            }),
            None => default,
        }
    }

    /// Whether the option was explicitly set
    pub fn has_option(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Write an option and notify listeners if the value changed
    pub fn set_option(&self, key: &str, value: impl Into<SettingValue>) -> Result<()> {
        split_key(key)?;
        let value = value.into();

        {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            if values.get(key) == Some(&value) {
                return Ok(());
            }
            debug!("Option {} = {:?}", key, value);
            values.insert(key.to_string(), value);
        }

        self.dirty.store(true, Ordering::SeqCst);
        self.notify(key);
        Ok(())
    }

    /// Drop an explicit value so the default applies again
    pub fn remove_option(&self, key: &str) -> bool {
        let removed = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            self.dirty.store(true, Ordering::SeqCst);
            self.notify(key);
        }
        removed
    }

    /// Subscribe to writes of every option starting with `prefix`
    pub fn watch(&self, prefix: &str) -> SettingsWatch {
        let (tx, rx) = unbounded();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Watcher {
                prefix: prefix.to_string(),
                tx,
            });
        SettingsWatch { rx }
    }

    /// Whether there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Save to the location the store was loaded from
    pub fn save(&self) -> Result<()> {
        match &self.location {
            Some(path) => self.save_to(path),
            None => {
                debug!("Settings have no location; not saving");
                Ok(())
            }
        }
    }

    /// Save to `path` atomically (write `path.new`, then rename)
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tree: BTreeMap<String, BTreeMap<String, SettingValue>> = BTreeMap::new();
        {
            let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
            for (full, value) in values.iter() {
                let (section, key) = split_key(full)?;
                tree.entry(section.to_string())
                    .or_default()
                    .insert(key.to_string(), value.clone());
            }
        }
        tree.entry("settings".to_string())
            .or_default()
            .insert("version".to_string(), SETTINGS_VERSION.into());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".new");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(&tree)?)?;
        fs::rename(&tmp, path)?;

        self.dirty.store(false, Ordering::SeqCst);
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    fn notify(&self, key: &str) {
        {
            let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.retain(|w| !key.starts_with(&w.prefix) || w.tx.send(key.to_string()).is_ok());
        }
        if let Some(events) = &self.events {
            events.emit(Event::OptionSet {
                key: key.to_string(),
            });
        }
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.rsplit_once('/') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => Ok((section, name)),
        _ => Err(ExaileError::InvalidKey(key.to_string())),
    }
}
