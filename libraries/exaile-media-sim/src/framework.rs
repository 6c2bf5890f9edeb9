//! Simulated framework: media catalog, element registry and time control

use crate::pipeline::SimPipeline;
use crate::sink::{SimFilter, SimSink, SimSinkShared};
use exaile_core::clock::{Clock, ManualClock};
use exaile_core::media::{
    AudioDevice, AudioSinkElement, ClockTime, FilterElement, MediaError, MediaFramework,
    MediaResult, Pipeline, PluginInstaller, TagList,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::debug;

/// Largest clock step taken by [`SimFramework::advance`]
pub const TICK: Duration = Duration::from_millis(10);

/// How a catalog entry fails to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimFailure {
    /// Pre-roll posts a missing-plugin element message
    MissingPlugin { description: String, detail: String },
    /// Pre-roll posts an error
    Error { message: String, debug: String },
}

/// A playable item in the catalog
#[derive(Debug, Clone, Default)]
pub struct SimMedia {
    /// `None` for live streams
    pub duration: Option<ClockTime>,
    /// Posted as a tag message after pre-roll
    pub tags: TagList,
    pub failure: Option<SimFailure>,
}

impl SimMedia {
    pub fn new(seconds: f64) -> Self {
        Self {
            duration: Some(ClockTime::from_seconds_f64(seconds)),
            ..Self::default()
        }
    }

    /// A stream with no known length
    pub fn stream() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: TagList) -> Self {
        self.tags = tags;
        self
    }

    pub fn failing(mut self, failure: SimFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[derive(Default)]
pub(crate) struct Catalog {
    media: Mutex<HashMap<String, SimMedia>>,
}

impl Catalog {
    pub(crate) fn lookup(&self, uri: &str) -> Option<SimMedia> {
        self.media
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }
}

const DEFAULT_ELEMENTS: &[&str] = &[
    "playbin",
    "autoaudiosink",
    "alsasink",
    "pulsesink",
    "jackaudiosink",
    "fakesink",
    "audioconvert",
    "audioresample",
    "volume",
    "equalizer-10bands",
    "identity",
    "queue",
];

/// Deterministic media framework
pub struct SimFramework {
    clock: Arc<ManualClock>,
    catalog: Arc<Catalog>,
    elements: Mutex<BTreeSet<String>>,
    devices: Mutex<Vec<AudioDevice>>,
    pipelines: Mutex<Vec<Weak<SimPipeline>>>,
    sinks: Mutex<Vec<Weak<SimSinkShared>>>,
    installer: Mutex<Option<Arc<dyn PluginInstaller>>>,
}

impl SimFramework {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Arc::new(ManualClock::new()),
            catalog: Arc::new(Catalog::default()),
            elements: Mutex::new(DEFAULT_ELEMENTS.iter().map(|s| (*s).to_string()).collect()),
            devices: Mutex::new(Vec::new()),
            pipelines: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            installer: Mutex::new(None),
        })
    }

    /// The clock pipelines and timers run on
    pub fn manual_clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Register a local file of the given length
    pub fn add_media(&self, uri: &str, seconds: f64) {
        self.add_media_with(uri, SimMedia::new(seconds));
    }

    pub fn add_media_with(&self, uri: &str, media: SimMedia) {
        self.catalog
            .media
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), media);
    }

    /// Make an element factory available
    pub fn add_element(&self, factory: &str) {
        lock(&self.elements).insert(factory.to_string());
    }

    /// Make an element factory unavailable
    pub fn remove_element(&self, factory: &str) {
        lock(&self.elements).remove(factory);
    }

    pub fn add_device(&self, display_name: &str, device_id: &str) {
        lock(&self.devices).push(AudioDevice {
            display_name: display_name.to_string(),
            device_id: device_id.to_string(),
        });
    }

    pub fn set_installer(&self, installer: Arc<dyn PluginInstaller>) {
        *lock(&self.installer) = Some(installer);
    }

    /// Let every pipeline react to the current time
    pub fn tick(&self) {
        for pipeline in self.pipelines() {
            pipeline.tick();
        }
    }

    /// Move time forward in steps of at most [`TICK`], ticking after each
    pub fn advance(&self, by: Duration) {
        let mut remaining = by;
        while !remaining.is_zero() {
            let step = remaining.min(TICK);
            self.clock.advance(step);
            self.tick();
            remaining -= step;
        }
    }

    /// Every pipeline still alive
    pub fn pipelines(&self) -> Vec<Arc<SimPipeline>> {
        let mut pipelines = lock(&self.pipelines);
        pipelines.retain(|p| p.strong_count() > 0);
        pipelines.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<SimPipeline>> {
        self.pipelines().into_iter().find(|p| p.name() == name)
    }

    /// Pipelines not in the null state
    pub fn active_pipelines(&self) -> Vec<Arc<SimPipeline>> {
        self.pipelines()
            .into_iter()
            .filter(|p| p.is_active())
            .collect()
    }

    /// The active pipeline currently rendering `uri`
    pub fn pipeline_playing(&self, uri: &str) -> Option<Arc<SimPipeline>> {
        self.active_pipelines()
            .into_iter()
            .find(|p| p.uri().as_deref() == Some(uri))
    }

    /// Pretend the device behind a sink changed
    pub fn change_current_device(&self, sink_name: &str, device: Option<&str>) -> bool {
        let sink = {
            let sinks = lock(&self.sinks);
            sinks
                .iter()
                .filter_map(Weak::upgrade)
                .find(|s| s.name == sink_name)
        };
        match sink {
            Some(sink) => {
                sink.change_current_device(device.map(str::to_string));
                true
            }
            None => false,
        }
    }

    fn new_sink(&self, shared: SimSinkShared) -> Box<dyn AudioSinkElement> {
        let shared = Arc::new(shared);
        lock(&self.sinks).push(Arc::downgrade(&shared));
        Box::new(SimSink::from_shared(shared))
    }
}

impl MediaFramework for SimFramework {
    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn create_playbin(&self, name: &str) -> MediaResult<Arc<dyn Pipeline>> {
        if !self.has_element("playbin") {
            return Err(MediaError::ElementNotFound("playbin".into()));
        }
        let pipeline = SimPipeline::new(name, Arc::clone(&self.clock), Arc::clone(&self.catalog));
        lock(&self.pipelines).push(Arc::downgrade(&pipeline));
        debug!("Created simulated playbin {}", name);
        Ok(pipeline)
    }

    fn has_element(&self, factory: &str) -> bool {
        lock(&self.elements).contains(factory)
    }

    fn make_sink(&self, factory: &str, name: &str) -> MediaResult<Box<dyn AudioSinkElement>> {
        if !self.has_element(factory) || !factory.ends_with("sink") {
            return Err(MediaError::ElementNotFound(factory.to_string()));
        }
        Ok(self.new_sink(SimSinkShared::new(name, factory)))
    }

    fn parse_sink_pipeline(
        &self,
        elements: &[String],
        name: &str,
    ) -> MediaResult<Box<dyn AudioSinkElement>> {
        let mut factories = Vec::new();
        for description in elements {
            let factory = description
                .split_whitespace()
                .next()
                .ok_or_else(|| MediaError::Parse("empty element description".into()))?;
            if !self.has_element(factory) {
                return Err(MediaError::ElementNotFound(factory.to_string()));
            }
            factories.push(factory.to_string());
        }
        match factories.last() {
            Some(last) if last.ends_with("sink") => {
                Ok(self.new_sink(SimSinkShared::new(name, last)))
            }
            _ => Err(MediaError::Parse(format!(
                "'{}' does not end in a sink",
                elements.join(" ! ")
            ))),
        }
    }

    fn make_filter(&self, factory: &str, name: &str) -> MediaResult<Box<dyn FilterElement>> {
        if !self.has_element(factory) {
            return Err(MediaError::ElementNotFound(factory.to_string()));
        }
        Ok(Box::new(SimFilter::new(name, factory)))
    }

    fn error_sink(&self, message: &str, name: &str) -> Box<dyn AudioSinkElement> {
        self.new_sink(SimSinkShared::new(name, "fakesink").with_error(message))
    }

    fn audio_devices(&self) -> Vec<AudioDevice> {
        lock(&self.devices).clone()
    }

    fn make_device_sink(
        &self,
        device: &AudioDevice,
        name: &str,
    ) -> MediaResult<Box<dyn AudioSinkElement>> {
        let sink = self.make_sink("pulsesink", name)?;
        sink.set_device(&device.device_id);
        Ok(sink)
    }

    fn plugin_installer(&self) -> Option<Arc<dyn PluginInstaller>> {
        lock(&self.installer).clone()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
