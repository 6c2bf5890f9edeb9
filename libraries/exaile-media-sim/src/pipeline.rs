//! Simulated playbin and its sink bin

use crate::framework::{lock, Catalog, SimFailure};
use crate::sink::{SimSink, SimSinkShared};
use exaile_core::clock::{Clock, ManualClock};
use exaile_core::media::{
    AboutToFinishHandler, AudioSinkElement, BusHandler, BusMessage, ClockTime, FilterElement,
    MediaError, MediaResult, Pipeline, SinkBin, State, StateChangeReturn, VolumeHandler,
};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::trace;

/// How long before the end of a URI about-to-finish fires
pub const ABOUT_TO_FINISH_LEAD: ClockTime = ClockTime::from_mseconds(200);

struct PipelineState {
    state: State,
    last_return: StateChangeReturn,
    uri: Option<String>,
    next_uri: Option<String>,
    duration: Option<ClockTime>,
    base: ClockTime,
    running_since: Option<Duration>,
    about_to_finish_sent: bool,
    eos_sent: bool,
    volume: f64,
    filters: Vec<String>,
    history: Vec<State>,
    seeks: Vec<ClockTime>,
}

impl PipelineState {
    fn raw_position(&self, now: Duration) -> ClockTime {
        match self.running_since {
            Some(since) => self.base + ClockTime::from(now.saturating_sub(since)),
            None => self.base,
        }
    }

    fn position(&self, now: Duration) -> ClockTime {
        let pos = self.raw_position(now);
        match self.duration {
            Some(d) => pos.min(d),
            None => pos,
        }
    }
}

/// Simulated playbin
pub struct SimPipeline {
    name: String,
    clock: Arc<ManualClock>,
    catalog: Arc<Catalog>,
    inner: Mutex<PipelineState>,
    bus_watch: Mutex<Option<Arc<BusHandler>>>,
    about_to_finish: Mutex<Option<Arc<AboutToFinishHandler>>>,
    volume_notify: Mutex<Option<Arc<VolumeHandler>>>,
    posted: Mutex<Vec<BusMessage>>,
    sink_bin: Arc<SimSinkBin>,
}

impl SimPipeline {
    pub(crate) fn new(name: &str, clock: Arc<ManualClock>, catalog: Arc<Catalog>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            clock,
            catalog,
            inner: Mutex::new(PipelineState {
                state: State::Null,
                last_return: StateChangeReturn::Success,
                uri: None,
                next_uri: None,
                duration: None,
                base: ClockTime::ZERO,
                running_since: None,
                about_to_finish_sent: false,
                eos_sent: false,
                volume: 1.0,
                filters: Vec::new(),
                history: Vec::new(),
                seeks: Vec::new(),
            }),
            bus_watch: Mutex::new(None),
            about_to_finish: Mutex::new(None),
            volume_notify: Mutex::new(None),
            posted: Mutex::new(Vec::new()),
            sink_bin: Arc::new(SimSinkBin::new(&format!("{}-audiosink", name), weak.clone())),
        })
    }

    // ===== Inspection =====

    pub fn state(&self) -> State {
        lock(&self.inner).state
    }

    pub fn is_active(&self) -> bool {
        self.state() != State::Null
    }

    /// Position regardless of state
    pub fn position(&self) -> ClockTime {
        lock(&self.inner).position(self.clock.now())
    }

    /// Every state reached, in order
    pub fn state_history(&self) -> Vec<State> {
        lock(&self.inner).history.clone()
    }

    /// Every successful seek target, in order
    pub fn seeks(&self) -> Vec<ClockTime> {
        lock(&self.inner).seeks.clone()
    }

    pub fn filters(&self) -> Vec<String> {
        lock(&self.inner).filters.clone()
    }

    pub fn pending_uri(&self) -> Option<String> {
        lock(&self.inner).next_uri.clone()
    }

    /// Every message posted so far, watched or not
    pub fn posted_messages(&self) -> Vec<BusMessage> {
        lock(&self.posted).clone()
    }

    pub fn stream_start_count(&self) -> usize {
        lock(&self.posted)
            .iter()
            .filter(|m| matches!(m, BusMessage::StreamStart { .. }))
            .count()
    }

    pub fn sim_sink_bin(&self) -> Arc<SimSinkBin> {
        Arc::clone(&self.sink_bin)
    }

    /// Pretend the sound server changed our volume
    pub fn external_volume_change(&self, volume: f64) {
        lock(&self.inner).volume = volume;
        let handler = lock(&self.volume_notify).clone();
        if let Some(handler) = handler {
            handler(volume);
        }
    }

    pub fn has_bus_watch(&self) -> bool {
        lock(&self.bus_watch).is_some()
    }

    // ===== Simulation =====

    pub(crate) fn query_position_internal(&self) -> Option<ClockTime> {
        let st = lock(&self.inner);
        (st.state >= State::Paused).then(|| st.position(self.clock.now()))
    }

    pub(crate) fn post(&self, message: BusMessage) {
        trace!(pipeline = %self.name, kind = message.kind(), "post");
        lock(&self.posted).push(message.clone());
        let handler = lock(&self.bus_watch).clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn post_all(&self, messages: Vec<BusMessage>) {
        for message in messages {
            self.post(message);
        }
    }

    fn preroll(&self, st: &mut PipelineState, messages: &mut Vec<BusMessage>) -> bool {
        let Some(uri) = st.uri.clone() else {
            messages.push(BusMessage::Error {
                source: self.name.clone(),
                message: "No URI specified to play from.".into(),
                debug: None,
            });
            return false;
        };

        let Some(media) = self.catalog.lookup(&uri) else {
            messages.push(not_found(&self.name, &uri));
            return false;
        };

        match media.failure {
            Some(SimFailure::MissingPlugin {
                description,
                detail,
            }) => {
                messages.push(BusMessage::MissingPlugin {
                    description,
                    installer_detail: detail,
                });
                false
            }
            Some(SimFailure::Error { message, debug }) => {
                messages.push(BusMessage::Error {
                    source: self.name.clone(),
                    message,
                    debug: Some(debug),
                });
                false
            }
            None => {
                st.duration = media.duration;
                messages.push(BusMessage::StreamStart {
                    source: self.name.clone(),
                });
                if uri.starts_with("http") {
                    messages.push(BusMessage::Buffering(50));
                    messages.push(BusMessage::Buffering(100));
                }
                if !media.tags.is_empty() {
                    messages.push(BusMessage::Tag(media.tags));
                }
                true
            }
        }
    }

    /// React to the current time: release pad blocks, post sink errors,
    /// fire about-to-finish and handle the end of the current URI
    pub fn tick(&self) {
        for block in self.sink_bin.take_pending_blocks() {
            block();
        }

        for sink in self.sink_bin.linked() {
            if let Some(message) = sink.take_pending_error() {
                self.post(BusMessage::Error {
                    source: sink.name.clone(),
                    message,
                    debug: Some(format!(
                        "gstaudiosink.c: /GstPlayBin:{}/GstPlaySink:playsink/{}",
                        self.name, sink.name
                    )),
                });
            }
        }

        let now = self.clock.now();
        let fire = {
            let mut st = lock(&self.inner);
            let due = st.state == State::Playing
                && !st.about_to_finish_sent
                && st
                    .duration
                    .is_some_and(|d| st.raw_position(now) + ABOUT_TO_FINISH_LEAD >= d);
            if due {
                st.about_to_finish_sent = true;
            }
            due
        };
        if fire {
            let handler = lock(&self.about_to_finish).clone();
            if let Some(handler) = handler {
                handler(self as &dyn Pipeline);
            }
        }

        let mut messages = Vec::new();
        {
            let mut st = lock(&self.inner);
            if st.state == State::Playing {
                if let Some(duration) = st.duration {
                    let pos = st.raw_position(now);
                    if pos >= duration {
                        self.end_of_uri(&mut st, pos, duration, now, &mut messages);
                    }
                }
            }
        }
        self.post_all(messages);
    }

    fn end_of_uri(
        &self,
        st: &mut PipelineState,
        pos: ClockTime,
        duration: ClockTime,
        now: Duration,
        messages: &mut Vec<BusMessage>,
    ) {
        if let Some(next) = st.next_uri.take() {
            let media = self.catalog.lookup(&next).filter(|m| m.failure.is_none());
            st.uri = Some(next.clone());
            match media {
                Some(media) => {
                    st.duration = media.duration;
                    st.base = pos - duration;
                    st.running_since = Some(now);
                    st.about_to_finish_sent = false;
                    st.eos_sent = false;
                    messages.push(BusMessage::StreamStart {
                        source: self.name.clone(),
                    });
                    if !media.tags.is_empty() {
                        messages.push(BusMessage::Tag(media.tags));
                    }
                }
                None => {
                    st.base = duration;
                    st.running_since = None;
                    messages.push(not_found(&self.name, &next));
                }
            }
        } else if !st.eos_sent {
            st.eos_sent = true;
            st.base = duration;
            st.running_since = None;
            messages.push(BusMessage::EndOfStream);
        }
    }
}

fn not_found(pipeline: &str, uri: &str) -> BusMessage {
    BusMessage::Error {
        source: "source".into(),
        message: "Resource not found.".into(),
        debug: Some(format!(
            "gstgiosrc.c(199): gst_gio_src_get_stream (): /GstPlayBin:{}/GstURIDecodeBin:uridecodebin0/GstGioSrc:source:\nCould not open location {} for reading",
            pipeline, uri
        )),
    }
}

impl Pipeline for SimPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_uri(&self, uri: &str) {
        let mut st = lock(&self.inner);
        if st.state >= State::Paused {
            st.next_uri = Some(uri.to_string());
        } else {
            st.uri = Some(uri.to_string());
            st.next_uri = None;
        }
    }

    fn uri(&self) -> Option<String> {
        lock(&self.inner).uri.clone()
    }

    fn set_state(&self, target: State) -> StateChangeReturn {
        let mut messages = Vec::new();
        {
            let mut st = lock(&self.inner);
            let old = st.state;
            if target == old {
                st.last_return = StateChangeReturn::Success;
                return StateChangeReturn::Success;
            }
            let now = self.clock.now();

            if old == State::Playing {
                st.base = st.position(now);
                st.running_since = None;
            }

            if target <= State::Ready {
                st.base = ClockTime::ZERO;
                st.running_since = None;
                st.duration = None;
                st.next_uri = None;
                st.about_to_finish_sent = false;
                st.eos_sent = false;
            } else if old <= State::Ready && !self.preroll(&mut st, &mut messages) {
                st.last_return = StateChangeReturn::Failure;
                drop(st);
                self.post_all(messages);
                return StateChangeReturn::Failure;
            }

            if target == State::Playing {
                st.running_since = Some(now);
            }
            st.state = target;
            st.history.push(target);
            st.last_return = StateChangeReturn::Success;

            messages.push(BusMessage::StateChanged {
                source: self.sink_bin.name.clone(),
                old,
                new: target,
            });
            messages.push(BusMessage::StateChanged {
                source: self.name.clone(),
                old,
                new: target,
            });
        }

        self.sink_bin.sync_children(target);
        self.post_all(messages);
        StateChangeReturn::Success
    }

    fn get_state(&self, _timeout: Duration) -> (StateChangeReturn, State) {
        let st = lock(&self.inner);
        (st.last_return, st.state)
    }

    fn query_position(&self) -> Option<ClockTime> {
        self.query_position_internal()
    }

    fn query_duration(&self) -> Option<ClockTime> {
        let st = lock(&self.inner);
        if st.state >= State::Paused {
            st.duration
        } else {
            None
        }
    }

    fn seek(&self, position: ClockTime) -> bool {
        let mut st = lock(&self.inner);
        if st.state < State::Paused {
            return false;
        }
        let target = match st.duration {
            Some(d) => position.min(d),
            None => position,
        };
        st.base = target;
        if st.state == State::Playing {
            st.running_since = Some(self.clock.now());
        }
        st.eos_sent = false;
        if st
            .duration
            .is_some_and(|d| d.saturating_sub(target) > ABOUT_TO_FINISH_LEAD)
        {
            st.about_to_finish_sent = false;
        }
        st.seeks.push(target);
        true
    }

    fn set_volume(&self, volume: f64) {
        lock(&self.inner).volume = volume;
    }

    fn volume(&self) -> f64 {
        lock(&self.inner).volume
    }

    fn set_audio_filter(&self, filters: Vec<Box<dyn FilterElement>>) -> MediaResult<()> {
        let mut st = lock(&self.inner);
        if st.state != State::Null {
            return Err(MediaError::NotPermitted(
                "audio-filter can only be changed in the NULL state".into(),
            ));
        }
        st.filters = filters.iter().map(|f| f.factory_name().to_string()).collect();
        Ok(())
    }

    fn audio_sink_bin(&self) -> Arc<dyn SinkBin> {
        self.sink_bin.clone()
    }

    fn set_bus_watch(&self, handler: BusHandler) {
        *lock(&self.bus_watch) = Some(Arc::new(handler));
    }

    fn remove_bus_watch(&self) {
        *lock(&self.bus_watch) = None;
    }

    fn connect_about_to_finish(&self, handler: AboutToFinishHandler) {
        *lock(&self.about_to_finish) = Some(Arc::new(handler));
    }

    fn connect_volume_notify(&self, handler: VolumeHandler) {
        *lock(&self.volume_notify) = Some(Arc::new(handler));
    }

    fn disconnect_signals(&self) {
        *lock(&self.about_to_finish) = None;
        *lock(&self.volume_notify) = None;
    }

    fn dump_dot(&self, dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.dot", name));

        let (state, uri, filters) = {
            let st = lock(&self.inner);
            (st.state, st.uri.clone(), st.filters.clone())
        };
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph pipeline {{");
        let _ = writeln!(dot, "  label=\"{} [{:?}] {}\";", self.name, state, uri.unwrap_or_default());
        let mut previous = "decodebin".to_string();
        for filter in filters.iter().chain(std::iter::once(&self.sink_bin.name)) {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\";", previous, filter);
            previous.clone_from(filter);
        }
        for sink in self.sink_bin.linked_sink_names() {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\";", self.sink_bin.name, sink);
        }
        dot.push_str("}\n");

        fs::write(&path, dot)?;
        Ok(path)
    }
}

/// Sink bin inside a [`SimPipeline`]
pub struct SimSinkBin {
    name: String,
    pipeline: Weak<SimPipeline>,
    linked: Mutex<Vec<Arc<SimSinkShared>>>,
    pending_blocks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    link_log: Mutex<Vec<String>>,
    links: AtomicUsize,
}

impl SimSinkBin {
    fn new(name: &str, pipeline: Weak<SimPipeline>) -> Self {
        Self {
            name: name.to_string(),
            pipeline,
            linked: Mutex::new(Vec::new()),
            pending_blocks: Mutex::new(Vec::new()),
            link_log: Mutex::new(Vec::new()),
            links: AtomicUsize::new(0),
        }
    }

    /// Names of the sinks currently linked (never more than one)
    pub fn linked_sink_names(&self) -> Vec<String> {
        lock(&self.linked).iter().map(|s| s.name.clone()).collect()
    }

    /// `link:<name>` / `unlink:<name>` entries in order
    pub fn link_log(&self) -> Vec<String> {
        lock(&self.link_log).clone()
    }

    /// Number of successful links so far
    pub fn link_count(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }

    pub fn has_pending_block(&self) -> bool {
        !lock(&self.pending_blocks).is_empty()
    }

    fn linked(&self) -> Vec<Arc<SimSinkShared>> {
        lock(&self.linked).clone()
    }

    fn take_pending_blocks(&self) -> Vec<Box<dyn FnOnce() + Send>> {
        std::mem::take(&mut *lock(&self.pending_blocks))
    }

    fn sync_children(&self, state: State) {
        for sink in self.linked() {
            sink.set_state(state);
        }
    }
}

impl SinkBin for SimSinkBin {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_and_link(&self, sink: &dyn AudioSinkElement) -> MediaResult<()> {
        let sim = sink
            .as_any()
            .downcast_ref::<SimSink>()
            .ok_or_else(|| MediaError::Link(format!("{} is not a simulated sink", sink.name())))?;

        let mut linked = lock(&self.linked);
        if let Some(existing) = linked.first() {
            return Err(MediaError::Link(format!(
                "{} pad already linked to {}",
                self.name, existing.name
            )));
        }
        sim.shared().set_parent(self.pipeline.clone());
        linked.push(Arc::clone(sim.shared()));
        lock(&self.link_log).push(format!("link:{}", sink.name()));
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlink_and_remove(&self, sink: &dyn AudioSinkElement) {
        let mut linked = lock(&self.linked);
        if let Some(index) = linked.iter().position(|s| s.name == sink.name()) {
            let removed = linked.remove(index);
            removed.set_parent(Weak::new());
            lock(&self.link_log).push(format!("unlink:{}", sink.name()));
        }
    }

    fn flushing_seek(&self, position: ClockTime) -> bool {
        self.pipeline
            .upgrade()
            .is_some_and(|pipeline| pipeline.seek(position))
    }

    fn block_downstream(&self, on_blocked: Box<dyn FnOnce() + Send>) {
        let playing = self
            .pipeline
            .upgrade()
            .is_some_and(|pipeline| pipeline.state() == State::Playing);
        if playing {
            lock(&self.pending_blocks).push(on_blocked);
        } else {
            on_blocked();
        }
    }

    fn post_error(&self, message: &str, debug: &str) {
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.post(BusMessage::Error {
                source: self.name.clone(),
                message: message.to_string(),
                debug: Some(debug.to_string()),
            });
        }
    }
}
