//! One playbin with its output sink and fader
//!
//! A stream owns its framework pipeline and drives it on the main loop
//! thread. Framework callbacks are turned into [`LoopEvent`]s tagged with
//! the stream's generation; a stop or teardown bumps the generation so that
//! messages still in flight from the old pipeline run are dropped.
//!
//! Anything the engine has to react to is queued as a [`StreamNotice`] and
//! collected with [`AudioStream::take_notices`] after each call.

use crate::dynamic_sink::DynamicAudioSink;
use crate::engine::EngineHost;
use crate::fader::{FaderHooks, TrackFader};
use crate::filters::AudioFilters;
use crate::mainloop::{LoopEvent, Scheduler, StreamId, StreamSignal, TimerId, TimerTask};
use crate::sink::create_sink;
use crate::tags::parse_stream_tags;
use exaile_core::media::{
    BusMessage, ClockTime, MediaFramework, Pipeline, State, StateChangeReturn, TagList,
};
use exaile_core::{PlaybackErrorKind, SettingsManager, TagUpdate, TagValue, Track};
use std::cell::Cell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const STATE_TIMEOUT: Duration = Duration::from_millis(50);
const SEEK_STATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared by all streams of one engine
#[derive(Clone)]
pub struct StreamContext {
    pub framework: Arc<dyn MediaFramework>,
    pub settings: Arc<SettingsManager>,
    /// Settings section, also the engine name
    pub section: String,
    pub filters: AudioFilters,
    pub scheduler: Scheduler,
    pub host: Arc<dyn EngineHost>,
    /// Set while crossfading is active; gapless queuing is skipped then
    pub crossfading: Arc<AtomicBool>,
    /// Where pipeline graphs are written on error
    pub logs_dir: Option<PathBuf>,
}

/// Something the engine must handle after a stream call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice {
    /// The stream finished or was stopped by its fader
    Eos { prior: Option<Track> },
    /// The fader entered its fade-out window
    FadeOutBegan,
    /// A gaplessly queued track became current in the pipeline
    NextTrackStarted(Track),
    Buffering(u32),
    TagsChanged { track: Track, update: TagUpdate },
    /// The output volume was changed externally; carries the user volume
    VolumeChanged(f64),
    Error {
        kind: PlaybackErrorKind,
        message: String,
    },
    MissingPlugin {
        description: String,
        detail: String,
    },
}

/// A playbin that plays one track at a time
pub struct AudioStream {
    id: StreamId,
    name: String,
    ctx: StreamContext,
    pipeline: Arc<dyn Pipeline>,
    sink_bin_name: String,
    sink: DynamicAudioSink,
    sinks_built: u32,
    needs_sink: bool,
    fader: TrackFader,
    current: Option<Track>,
    /// Track handed to the pipeline from about-to-finish
    buffered: Arc<Mutex<Option<Track>>>,
    generation: Arc<AtomicU64>,
    last_position: Cell<ClockTime>,
    notices: Vec<StreamNotice>,
}

impl AudioStream {
    pub fn new(ctx: StreamContext, id: StreamId) -> crate::Result<Self> {
        let name = format!("{}-audiostream-{}", ctx.section, id.0);
        let pipeline = ctx.framework.create_playbin(&format!("{}-playbin", name))?;
        let bin = pipeline.audio_sink_bin();
        let sink_bin_name = bin.name().to_string();
        let sink = DynamicAudioSink::new(format!("{}-sink", name), bin, ctx.scheduler.clone());
        let generation = Arc::new(AtomicU64::new(0));
        let buffered = Arc::new(Mutex::new(None));

        {
            let scheduler = ctx.scheduler.clone();
            let generation = Arc::clone(&generation);
            pipeline.set_bus_watch(Box::new(move |message| {
                scheduler.post(LoopEvent::Stream {
                    stream: id,
                    generation: generation.load(Ordering::SeqCst),
                    signal: StreamSignal::Bus(message),
                });
            }));
        }
        {
            let scheduler = ctx.scheduler.clone();
            let generation = Arc::clone(&generation);
            pipeline.connect_volume_notify(Box::new(move |volume| {
                scheduler.post(LoopEvent::Stream {
                    stream: id,
                    generation: generation.load(Ordering::SeqCst),
                    signal: StreamSignal::VolumeNotify(volume),
                });
            }));
        }
        {
            // Runs on a framework thread: only touches shared state
            let host = Arc::clone(&ctx.host);
            let crossfading = Arc::clone(&ctx.crossfading);
            let buffered = Arc::clone(&buffered);
            let name = name.clone();
            pipeline.connect_about_to_finish(Box::new(move |pipeline| {
                if crossfading.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(track) = host.get_next_track(true) {
                    debug!(stream = %name, "Queuing {} for gapless playback", track.uri());
                    pipeline.set_uri(track.uri());
                    *lock(&buffered) = Some(track);
                }
            }));
        }

        debug!(stream = %name, "Created audio stream");

        Ok(Self {
            id,
            fader: TrackFader::new(format!("{}-fader", name)),
            name,
            ctx,
            pipeline,
            sink_bin_name,
            sink,
            sinks_built: 0,
            needs_sink: true,
            current: None,
            buffered,
            generation,
            last_position: Cell::new(ClockTime::ZERO),
            notices: Vec::new(),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    pub fn sink(&self) -> &DynamicAudioSink {
        &self.sink
    }

    pub fn fader(&self) -> &TrackFader {
        &self.fader
    }

    /// Track currently loaded, if any
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Notices raised since the last call
    pub fn take_notices(&mut self) -> Vec<StreamNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn get_gst_state(&self) -> State {
        self.pipeline.get_state(STATE_TIMEOUT).1
    }

    /// Current position; while paused the position cached at pause time
    pub fn get_position(&self) -> ClockTime {
        if self.get_gst_state() != State::Paused {
            self.last_position
                .set(self.pipeline.query_position().unwrap_or(ClockTime::ZERO));
        }
        self.last_position.get()
    }

    /// Start `track`
    ///
    /// With `already_queued` the pipeline switched to the track by itself
    /// (gapless) and is left running; only our bookkeeping is updated.
    #[allow(clippy::too_many_arguments)]
    pub fn play(
        &mut self,
        track: &Track,
        start_at: Option<f64>,
        paused: bool,
        already_queued: bool,
        fade_in: Option<f64>,
        fade_out: Option<f64>,
    ) {
        if !already_queued {
            self.stop(false);
            self.apply_filters();
        }

        if self.needs_sink {
            self.reconfigure_sink();
        }

        self.current = Some(track.clone());
        self.last_position.set(ClockTime::ZERO);
        *lock(&self.buffered) = None;

        info!(stream = %self.name, "Playing {}", track.uri());

        if !already_queued {
            self.pipeline.set_uri(track.uri());
        }

        if paused || start_at.is_some() {
            self.pipeline.set_state(State::Paused);
        } else if !already_queued {
            self.pipeline.set_state(State::Playing);
        }

        self.with_fader(|fader, hooks| {
            fader.setup_track(hooks, track, fade_in, fade_out, false, Some(0.0))
        });

        // The fader may already have stopped us
        if self.current.is_none() {
            return;
        }

        if paused {
            self.with_fader(|fader, hooks| fader.pause(hooks));
        }

        if let Some(start_at) = start_at {
            self.seek(start_at);
            if !paused {
                self.pipeline.set_state(State::Playing);
            }
        }
    }

    /// Unload the current track; returns it
    pub fn stop(&mut self, emit_eos: bool) -> Option<Track> {
        let prior = self.current.take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *lock(&self.buffered) = None;
        self.pipeline.set_state(State::Null);
        self.with_fader(|fader, hooks| fader.stop(hooks));
        if emit_eos {
            self.notices.push(StreamNotice::Eos {
                prior: prior.clone(),
            });
        }
        prior
    }

    pub fn pause(&mut self) {
        // cache the position before the pipeline stops reporting it
        self.get_position();
        self.pipeline.set_state(State::Paused);
        self.with_fader(|fader, hooks| fader.pause(hooks));
    }

    pub fn unpause(&mut self) {
        let Some(track) = &self.current else {
            return;
        };

        // Live streams cannot resume from where they paused
        if !(track.is_local() || track.length().is_some()) {
            self.pipeline.set_state(State::Ready);
        }

        self.pipeline.set_state(State::Playing);
        self.with_fader(|fader, hooks| fader.unpause(hooks));
    }

    /// Seek to `value` seconds; false if the pipeline was not ready
    pub fn seek(&mut self, value: f64) -> bool {
        let (ret, _) = self.pipeline.get_state(SEEK_STATE_TIMEOUT);
        if ret != StateChangeReturn::Success {
            warn!(stream = %self.name, "Error seeking to specified offset ({:?})", ret);
            return false;
        }

        let position = ClockTime::from_seconds_f64(value);
        self.last_position.set(position);
        self.with_fader(|fader, hooks| fader.seek(hooks, value));
        self.pipeline.seek(position)
    }

    pub fn user_volume(&self) -> f64 {
        self.fader.user_volume()
    }

    pub fn set_user_volume(&mut self, volume: f64) {
        self.with_fader(|fader, hooks| fader.set_user_volume(hooks, volume));
    }

    /// Start fading out the current track, if a fade-out is configured
    pub fn fade_out_on_play(&mut self) {
        self.with_fader(|fader, hooks| fader.fade_out_on_play(hooks));
    }

    /// Re-plan the fades of the current track
    ///
    /// Ignored when the pipeline is not running.
    pub fn reconfigure_fader(&mut self, fade_in: Option<f64>, fade_out: Option<f64>) {
        if self.get_gst_state() == State::Null {
            return;
        }
        if let Some(track) = self.current.clone() {
            self.with_fader(|fader, hooks| {
                fader.setup_track(hooks, &track, fade_in, fade_out, true, None)
            });
        }
    }

    /// Build the output sink from the current settings and switch to it
    pub fn reconfigure_sink(&mut self) {
        self.needs_sink = false;
        self.sinks_built += 1;
        let name = format!("{}-output-{}", self.name, self.sinks_built);
        let sink = create_sink(&*self.ctx.framework, &self.ctx.settings, &self.ctx.section, &name);

        let disable_autoswitch: bool = self
            .ctx
            .settings
            .get_option(&format!("{}/disable_autoswitch", self.ctx.section), false);
        if disable_autoswitch && !self.sink.stop_on_device_change(&*sink) {
            debug!(stream = %self.name, "{} cannot report device changes", sink.name());
        }

        self.sink.reconfigure(sink);
    }

    /// Rebuild the sink now if running, otherwise at the next play
    pub fn request_sink(&mut self) {
        if self.get_gst_state() == State::Null {
            self.needs_sink = true;
        } else {
            self.reconfigure_sink();
        }
    }

    /// Stop and disconnect from the framework; the stream is unusable after
    pub fn destroy(&mut self) {
        debug!(stream = %self.name, "Destroying audio stream");
        self.with_fader(|fader, hooks| fader.stop(hooks));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.current = None;
        *lock(&self.buffered) = None;
        self.pipeline.set_state(State::Null);
        self.pipeline.remove_bus_watch();
        self.pipeline.disconnect_signals();
        self.notices.clear();
    }

    /// A fader timer of this stream fired
    pub fn on_timeout(&mut self, id: TimerId) -> bool {
        self.with_fader(|fader, hooks| fader.on_timeout(hooks, id))
    }

    /// Handle a signal posted from a framework thread
    pub fn handle_signal(&mut self, generation: u64, signal: StreamSignal) {
        if generation != self.generation.load(Ordering::SeqCst) {
            trace!(stream = %self.name, ?signal, "Dropping stale signal");
            return;
        }
        match signal {
            StreamSignal::Bus(message) => self.on_message(message),
            StreamSignal::VolumeNotify(volume) => self.on_volume_change(volume),
        }
    }

    fn on_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::Buffering(percent) => {
                if percent >= 100 {
                    info!(stream = %self.name, "Buffering complete");
                }
                if percent % 5 == 0 {
                    self.notices.push(StreamNotice::Buffering(percent));
                }
            }
            BusMessage::Tag(tags) => self.on_tags(&tags),
            BusMessage::EndOfStream => {
                if self.get_gst_state() != State::Paused {
                    debug!(stream = %self.name, "End of stream");
                    self.notices.push(StreamNotice::Eos {
                        prior: self.current.clone(),
                    });
                }
            }
            BusMessage::StreamStart { source } if source == self.pipeline.name() => {
                if let Some(track) = lock(&self.buffered).take() {
                    self.notices.push(StreamNotice::NextTrackStarted(track));
                }
            }
            BusMessage::StateChanged { source, .. } if source == self.sink_bin_name => {
                // The sink may have been given a volume of its own
                self.on_volume_change(self.pipeline.volume());
            }
            BusMessage::Error {
                source,
                message,
                debug: detail,
            } => self.on_error(&source, &message, detail.as_deref().unwrap_or_default()),
            BusMessage::MissingPlugin {
                description,
                installer_detail,
            } => self.notices.push(StreamNotice::MissingPlugin {
                description,
                detail: installer_detail,
            }),
            BusMessage::Warning {
                message,
                debug: detail,
                ..
            } => {
                warn!(stream = %self.name, "Unhandled warning received: {} ({:?})", message, detail);
            }
            other => trace!(stream = %self.name, "Unhandled message: {}", other.kind()),
        }
    }

    fn on_tags(&mut self, tags: &TagList) {
        let Some(track) = self.current.clone() else {
            return;
        };

        let mut update = TagUpdate::new();
        if !track.is_local() {
            let parsed = parse_stream_tags(&track, tags);
            if parsed.new_song {
                info!(stream = %self.name, "Stream moved on to a new song");
            }
            update = parsed.update;
        }

        if track.length().is_none() && !update.contains_key("__length") {
            match self.pipeline.query_duration() {
                Some(duration) if duration > ClockTime::ZERO => {
                    update.insert(
                        "__length".to_string(),
                        Some(TagValue::Number(duration.seconds_f64())),
                    );
                }
                Some(_) => {}
                None => error!(stream = %self.name, "Couldn't query duration"),
            }
        }

        if !update.is_empty() {
            self.notices.push(StreamNotice::TagsChanged { track, update });
        }
    }

    fn on_volume_change(&mut self, real_volume: f64) {
        let (volume, is_same) = self.fader.calculate_user_volume(real_volume);
        if !is_same {
            debug!(stream = %self.name, "Volume changed externally to {:.2}", volume);
            self.notices.push(StreamNotice::VolumeChanged(volume));
        }
    }

    fn on_error(&mut self, source: &str, message: &str, debug_info: &str) {
        let text = error_text(message, debug_info);
        error!(stream = %self.name, "Playback error: {}", text);
        debug!(stream = %self.name, "- Extra error info: {}", debug_info);

        if let Some(dir) = &self.ctx.logs_dir {
            match self.pipeline.dump_dot(dir, &self.name) {
                Ok(path) => debug!("- Pipeline debug info written to file '{}'", path.display()),
                Err(e) => warn!("Could not write pipeline graph: {}", e),
            }
        }

        self.notices.push(StreamNotice::Error {
            kind: error_kind(source, debug_info),
            message: text,
        });
    }

    fn apply_filters(&mut self) {
        let chain = self
            .ctx
            .filters
            .build(&*self.ctx.framework, &format!("{}-filter", self.name));
        if !chain.is_empty() {
            debug!(stream = %self.name, "Applying {} audio filter(s)", chain.len());
        }
        if let Err(e) = self.pipeline.set_audio_filter(chain) {
            warn!(stream = %self.name, "Could not apply audio filters: {}", e);
        }
    }

    /// Run a fader call and act on what it asked for
    fn with_fader<R>(&mut self, f: impl FnOnce(&mut TrackFader, &mut dyn FaderHooks) -> R) -> R {
        let mut hooks = StreamHooks {
            id: self.id,
            pipeline: &*self.pipeline,
            scheduler: &self.ctx.scheduler,
            stop_requested: false,
            fade_out_began: false,
        };
        let result = f(&mut self.fader, &mut hooks);
        let (stop_requested, fade_out_began) = (hooks.stop_requested, hooks.fade_out_began);

        if fade_out_began {
            self.notices.push(StreamNotice::FadeOutBegan);
        }
        if stop_requested {
            self.stop(true);
        }
        result
    }
}

struct StreamHooks<'a> {
    id: StreamId,
    pipeline: &'a dyn Pipeline,
    scheduler: &'a Scheduler,
    stop_requested: bool,
    fade_out_began: bool,
}

impl FaderHooks for StreamHooks<'_> {
    fn position(&self) -> f64 {
        self.pipeline
            .query_position()
            .map_or(0.0, ClockTime::seconds_f64)
    }

    fn set_volume(&mut self, volume: f64) {
        self.pipeline.set_volume(volume);
    }

    fn add_timeout(&mut self, delay: Duration) -> TimerId {
        self.scheduler.timeout_add(delay, TimerTask::Fader(self.id))
    }

    fn remove_timeout(&mut self, id: TimerId) {
        self.scheduler.source_remove(id);
    }

    fn stop(&mut self) {
        self.stop_requested = true;
    }

    fn on_fade_out(&mut self) {
        self.fade_out_began = true;
    }
}

/// Short user-facing text for a framework error
///
/// Falls back to the last component of the debug string when the message
/// is empty, with a hint when that points at the output device.
pub fn error_text(message: &str, debug: &str) -> String {
    let mut text = message.trim_end_matches('.').to_string();
    if text.is_empty() {
        text = debug.rsplit(':').next().unwrap_or(debug).to_string();
        if !text.contains(' ') && debug.starts_with("playsink") {
            text.push_str(": Possible audio device error, is it plugged in?");
        }
    }
    text
}

fn error_kind(source: &str, debug: &str) -> PlaybackErrorKind {
    if source.contains("sink") || source.contains("output") || debug.contains("playsink") {
        PlaybackErrorKind::Device
    } else if source == "source" || debug.contains("GstURIDecodeBin") {
        PlaybackErrorKind::Stream
    } else {
        PlaybackErrorKind::Internal
    }
}

fn lock(buffered: &Mutex<Option<Track>>) -> MutexGuard<'_, Option<Track>> {
    buffered.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngineHost;
    use crate::fader::FadeState;
    use crate::mainloop::MainLoop;
    use exaile_core::media::TagListValue;
    use exaile_media_sim::{SimFramework, SimMedia};

    struct Harness {
        sim: Arc<SimFramework>,
        main_loop: MainLoop,
        stream: AudioStream,
    }

    impl Harness {
        fn new(host: MockEngineHost) -> Self {
            let sim = SimFramework::new();
            let main_loop = MainLoop::new(sim.clock());
            let ctx = StreamContext {
                framework: sim.clone(),
                settings: Arc::new(SettingsManager::new()),
                section: "player".into(),
                filters: AudioFilters::new(),
                scheduler: main_loop.scheduler(),
                host: Arc::new(host),
                crossfading: Arc::new(AtomicBool::new(false)),
                logs_dir: None,
            };
            let stream = AudioStream::new(ctx, StreamId(1)).unwrap();
            Self {
                sim,
                main_loop,
                stream,
            }
        }

        /// Advance time, feeding signals and fader timers to the stream
        fn run(&mut self, by: Duration) {
            let steps = by.as_millis() / 10;
            for _ in 0..steps {
                self.sim.advance(Duration::from_millis(10));
                self.pump();
            }
        }

        fn pump(&mut self) {
            loop {
                if let Some(event) = self.main_loop.try_recv() {
                    if let LoopEvent::Stream {
                        generation, signal, ..
                    } = event
                    {
                        self.stream.handle_signal(generation, signal);
                    }
                    continue;
                }
                if let Some((id, TimerTask::Fader(_))) = self.main_loop.pop_due(self.sim.now()) {
                    self.stream.on_timeout(id);
                    continue;
                }
                break;
            }
        }
    }

    fn idle_host() -> MockEngineHost {
        let mut host = MockEngineHost::new();
        host.expect_get_next_track().returning(|_| None);
        host
    }

    // ===== Error text =====

    #[test]
    fn test_error_text_strips_trailing_dots() {
        assert_eq!(error_text("Resource not found.", ""), "Resource not found");
        assert_eq!(error_text("Odd...", ""), "Odd");
    }

    #[test]
    fn test_error_text_falls_back_to_debug() {
        assert_eq!(
            error_text("", "gstfoo.c(12): func (): /Pipe/Elem:\nstream stopped"),
            "\nstream stopped"
        );
        assert_eq!(
            error_text("", "playsink: /GstPlayBin/GstPlaySink:playsink/pulsesink:disconnected"),
            "disconnected: Possible audio device error, is it plugged in?"
        );
        assert_eq!(error_text("", "no-colons"), "no-colons");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(error_kind("source", ""), PlaybackErrorKind::Stream);
        assert_eq!(
            error_kind("out-1", "gstaudiosink.c: /GstPlayBin:p/GstPlaySink:playsink/out-1"),
            PlaybackErrorKind::Device
        );
        assert_eq!(error_kind("p-audiosink", ""), PlaybackErrorKind::Device);
        assert_eq!(error_kind("decoder", "x"), PlaybackErrorKind::Internal);
    }

    // ===== Playback =====

    #[test]
    fn test_play_builds_sink_and_runs() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        let track = Track::new("file:///a.flac");

        h.stream.play(&track, None, false, false, None, None);
        assert_eq!(h.stream.current(), Some(&track));
        assert_eq!(h.stream.get_gst_state(), State::Playing);
        assert!(h.stream.sink().active_sink_name().is_some());

        h.run(Duration::from_secs(2));
        let position = h.stream.get_position().seconds_f64();
        assert!((position - 2.0).abs() < 0.05, "position {}", position);
    }

    #[test]
    fn test_play_paused_at_offset() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        let track = Track::new("file:///a.flac");

        h.stream.play(&track, Some(12.0), true, false, None, None);
        assert_eq!(h.stream.get_gst_state(), State::Paused);
        assert_eq!(h.stream.get_position(), ClockTime::from_seconds_f64(12.0));
        assert_eq!(h.stream.fader().state(), FadeState::NoFade);
    }

    #[test]
    fn test_pause_caches_position() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.run(Duration::from_secs(3));

        h.stream.pause();
        let paused_at = h.stream.get_position();
        h.run(Duration::from_secs(1));
        assert_eq!(h.stream.get_position(), paused_at);

        h.stream.unpause();
        assert_eq!(h.stream.get_gst_state(), State::Playing);
    }

    #[test]
    fn test_seek_while_paused_keeps_fader_quiet() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 10.0);
        let track = Track::with_length("file:///a.flac", 10.0);
        h.stream.play(&track, None, false, false, None, Some(2.0));
        h.run(Duration::from_secs(3));
        h.stream.pause();
        h.stream.take_notices();

        assert!(h.stream.seek(6.0));
        assert!(!h.stream.fader().has_timer());
        h.run(Duration::from_secs(3));
        assert_eq!(h.stream.current(), Some(&track));
        assert_eq!(h.stream.fader().state(), FadeState::Normal);
        assert!(h.stream.take_notices().is_empty());

        h.stream.unpause();
        h.run(Duration::from_millis(2100));
        assert!(h
            .stream
            .take_notices()
            .contains(&StreamNotice::FadeOutBegan));
    }

    #[test]
    fn test_stop_offset_set_while_paused_waits_for_unpause() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        let track = Track::with_length("file:///a.flac", 30.0);
        h.stream.play(&track, None, false, false, None, None);
        h.run(Duration::from_secs(5));
        h.stream.pause();
        h.stream.take_notices();

        track.set_tag_raw("__stopoffset", Some(TagValue::Number(8.0)));
        h.stream.reconfigure_fader(None, None);
        assert!(!h.stream.fader().has_timer());
        h.run(Duration::from_secs(8));
        assert_eq!(h.stream.current(), Some(&track));
        assert!(h.stream.take_notices().is_empty());

        h.stream.unpause();
        h.run(Duration::from_millis(3100));
        assert!(h.stream.current().is_none());
        assert!(h
            .stream
            .take_notices()
            .contains(&StreamNotice::Eos { prior: Some(track) }));
    }

    #[test]
    fn test_stop_emits_eos_only_when_asked() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        let track = Track::new("file:///a.flac");
        h.stream.play(&track, None, false, false, None, None);

        assert_eq!(h.stream.stop(false), Some(track.clone()));
        assert!(h.stream.take_notices().is_empty());
        assert_eq!(h.stream.get_gst_state(), State::Null);

        h.stream.play(&track, None, false, false, None, None);
        h.stream.stop(true);
        assert_eq!(
            h.stream.take_notices(),
            vec![StreamNotice::Eos {
                prior: Some(track)
            }]
        );
    }

    #[test]
    fn test_natural_end_reports_eos() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 1.0);
        let track = Track::new("file:///a.flac");
        h.stream.play(&track, None, false, false, None, None);
        h.stream.take_notices();

        h.run(Duration::from_millis(1100));
        let notices = h.stream.take_notices();
        assert!(notices.contains(&StreamNotice::Eos {
            prior: Some(track)
        }));
    }

    #[test]
    fn test_stale_signals_are_dropped() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 1.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.run(Duration::from_millis(1100));

        // EOS was posted under the old generation
        h.stream.stop(false);
        h.stream.take_notices();
        h.stream.handle_signal(0, StreamSignal::Bus(BusMessage::EndOfStream));
        assert!(h.stream.take_notices().is_empty());
    }

    #[test]
    fn test_stop_offset_stops_with_eos() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        let track = Track::with_length("file:///a.flac", 30.0);
        track.set_tag_raw("__stopoffset", Some(TagValue::Number(2.0)));

        h.stream.play(&track, None, false, false, None, None);
        h.run(Duration::from_millis(2100));
        assert!(h.stream.current().is_none());
        assert!(h
            .stream
            .take_notices()
            .contains(&StreamNotice::Eos { prior: Some(track) }));
    }

    // ===== Gapless =====

    #[test]
    fn test_about_to_finish_queues_next_track() {
        let next = Track::new("file:///b.flac");
        let mut host = MockEngineHost::new();
        let queued = next.clone();
        host.expect_get_next_track()
            .withf(|gapless| *gapless)
            .times(1)
            .returning(move |_| Some(queued.clone()));

        let mut h = Harness::new(host);
        h.sim.add_media("file:///a.flac", 1.0);
        h.sim.add_media("file:///b.flac", 5.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.stream.take_notices();

        h.run(Duration::from_millis(1050));
        assert!(h
            .stream
            .take_notices()
            .contains(&StreamNotice::NextTrackStarted(next.clone())));

        // The engine confirms without touching the pipeline
        h.stream.play(&next, None, false, true, None, None);
        let pipeline = h.sim.pipeline(h.stream.pipeline().name()).unwrap();
        assert!(!pipeline.state_history().contains(&State::Null));
        assert_eq!(pipeline.stream_start_count(), 2);
        assert_eq!(h.stream.get_gst_state(), State::Playing);
    }

    #[test]
    fn test_no_gapless_while_crossfading() {
        let mut host = MockEngineHost::new();
        host.expect_get_next_track().never();
        let mut h = Harness::new(host);
        h.stream.ctx.crossfading.store(true, Ordering::SeqCst);
        h.sim.add_media("file:///a.flac", 1.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.run(Duration::from_millis(1100));
    }

    // ===== Bus messages =====

    #[test]
    fn test_stream_tags_and_buffering() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media_with(
            "http://radio.example/live",
            SimMedia::stream().with_tags(
                TagList::new().with("title", TagListValue::Str("Band - Song".into())),
            ),
        );
        let track = Track::new("http://radio.example/live");
        h.stream.play(&track, None, false, false, None, None);
        h.pump();

        let notices = h.stream.take_notices();
        assert!(notices.contains(&StreamNotice::Buffering(50)));
        assert!(notices.contains(&StreamNotice::Buffering(100)));
        let update = notices
            .iter()
            .find_map(|n| match n {
                StreamNotice::TagsChanged { update, .. } => Some(update.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(update.get("title"), Some(&Some(TagValue::from("Song"))));
        // tags are only proposed, never written here
        assert!(track.get_tag_raw("title").is_none());
    }

    #[test]
    fn test_local_track_gets_length_from_duration() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media_with(
            "file:///a.ogg",
            SimMedia::new(42.0).with_tags(
                TagList::new().with("title", TagListValue::Str("Ignored".into())),
            ),
        );
        let track = Track::new("file:///a.ogg");
        h.stream.play(&track, None, false, false, None, None);
        h.pump();

        let update = h
            .stream
            .take_notices()
            .into_iter()
            .find_map(|n| match n {
                StreamNotice::TagsChanged { update, .. } => Some(update),
                _ => None,
            })
            .unwrap();
        assert_eq!(update.get("__length"), Some(&Some(TagValue::Number(42.0))));
        assert!(!update.contains_key("title"));
    }

    #[test]
    fn test_missing_resource_is_a_stream_error() {
        let mut h = Harness::new(idle_host());
        h.stream
            .play(&Track::new("file:///missing.flac"), None, false, false, None, None);
        h.pump();
        assert!(h.stream.take_notices().contains(&StreamNotice::Error {
            kind: PlaybackErrorKind::Stream,
            message: "Resource not found".into(),
        }));
    }

    #[test]
    fn test_external_volume_change() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.pump();
        h.stream.take_notices();

        let pipeline = h.sim.pipeline(h.stream.pipeline().name()).unwrap();
        pipeline.external_volume_change(0.5);
        h.pump();
        assert_eq!(h.stream.take_notices(), vec![StreamNotice::VolumeChanged(0.5)]);
    }

    #[test]
    fn test_destroy_disconnects() {
        let mut h = Harness::new(idle_host());
        h.sim.add_media("file:///a.flac", 30.0);
        h.stream
            .play(&Track::new("file:///a.flac"), None, false, false, None, None);
        h.stream.destroy();

        let pipeline = h.sim.pipeline(h.stream.pipeline().name()).unwrap();
        assert!(!pipeline.has_bus_watch());
        assert!(!pipeline.is_active());
        assert!(h.stream.current().is_none());
    }
}
