//! Player facade
//!
//! [`Player`] is what the rest of the application talks to. It owns the
//! engine and the main loop, keeps the play queue, and turns engine
//! callbacks into events, settings writes and track statistics.
//!
//! Nothing here runs on its own: the owner calls [`Player::iterate`] (or
//! [`Player::run_for`]) to dispatch framework messages and timers.

use crate::engine::{EngineHost, PlaybackEngine};
use crate::error::{PlaybackError, Result};
use crate::filters::AudioFilters;
use crate::mainloop::{LoopEvent, MainLoop, Scheduler, TimerId, TimerTask};
use crate::missing_plugin;
use crate::queue::{PlayQueue, QueuePolicy};
use crate::session::SessionState;
use crate::stream::StreamContext;
use crate::types::{PlayRequest, PlayerState};
use chrono::Utc;
use crossbeam_channel::Receiver;
use exaile_core::media::{ClockTime, MediaFramework, State};
use exaile_core::{
    Event, EventBus, PlaybackErrorKind, SettingsManager, SettingsWatch, SubscriptionId, TagUpdate,
    TagValue, Track,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// `modify_time` never seeks closer than this to the end of a track
const END_MARGIN_SECS: f64 = 2.0;

/// Construction options for [`Player`]
#[derive(Clone)]
pub struct PlayerOptions {
    /// Engine name, also the settings section
    pub name: String,
    /// Where pipeline graphs are written when playback fails
    pub logs_dir: Option<PathBuf>,
    pub filters: AudioFilters,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            name: "player".into(),
            logs_dir: None,
            filters: AudioFilters::new(),
        }
    }
}

#[derive(Default)]
struct Stats {
    /// When play time started counting for the current track
    playtime_stamp: Option<Duration>,
    delayed_start: Option<TimerId>,
}

/// State the engine calls back into
struct Shared {
    section: String,
    settings: Arc<SettingsManager>,
    events: EventBus,
    scheduler: Scheduler,
    queue: Mutex<PlayQueue>,
    stats: Mutex<Stats>,
}

impl Shared {
    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.section, name)
    }

    fn queue(&self) -> MutexGuard<'_, PlayQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_playtime_stamp(&self) {
        self.stats().playtime_stamp = Some(self.scheduler.now());
    }

    /// Seconds played that are not yet in `__playtime`
    fn unflushed_playtime(&self) -> f64 {
        self.stats()
            .playtime_stamp
            .map_or(0.0, |stamp| self.scheduler.now().saturating_sub(stamp).as_secs_f64())
    }

    /// Add time played since the stamp to `__playtime`
    fn update_playtime(&self, track: &Track) {
        let Some(stamp) = self.stats().playtime_stamp.take() else {
            return;
        };
        let elapsed = self.scheduler.now().saturating_sub(stamp).as_secs();
        self.add_playtime(track, elapsed as f64);
    }

    fn add_playtime(&self, track: &Track, seconds: f64) {
        let last = track
            .get_tag_raw("__playtime")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let mut update = TagUpdate::new();
        update.insert("__playtime".into(), Some(TagValue::Number(last + seconds)));
        self.apply_tags(track, update);
    }

    fn apply_tags(&self, track: &Track, update: TagUpdate) {
        let tags = track.set_tags(update);
        if !tags.is_empty() {
            self.events.emit(Event::TrackTagsChanged {
                track: track.clone(),
                tags,
            });
        }
    }

    fn cancel_delayed_start(&self) {
        if let Some(id) = self.stats().delayed_start.take() {
            self.scheduler.source_remove(id);
        }
    }

    /// Claim the delayed start timer `id`; false if it was cancelled
    fn take_delayed_start(&self, id: TimerId) -> bool {
        let mut stats = self.stats();
        if stats.delayed_start == Some(id) {
            stats.delayed_start = None;
            true
        } else {
            false
        }
    }

    /// Work out how to start `track`
    ///
    /// Applies the track's start offset and, for automatic advances with a
    /// configured delay, starts paused and schedules the unpause.
    fn play_params(
        &self,
        track: &Track,
        start_at: Option<f64>,
        paused: bool,
        autoadvance: bool,
    ) -> PlayRequest {
        let start_at = start_at
            .filter(|s| *s > 0.0)
            .or_else(|| Some(track.start_offset()).filter(|s| *s > 0.0));

        self.cancel_delayed_start();

        let mut paused = paused;
        let delay: i64 = self.settings.get_option(&self.key("auto_advance_delay"), 0);
        if !paused && autoadvance && delay > 0 {
            debug!("Delaying start of {} by {} ms", track.uri(), delay);
            let id = self
                .scheduler
                .timeout_add(Duration::from_millis(delay.unsigned_abs()), TimerTask::DelayedStart);
            self.stats().delayed_start = Some(id);
            paused = true;
        }

        PlayRequest {
            track: track.clone(),
            start_at,
            paused,
        }
    }
}

impl EngineHost for Shared {
    fn get_next_track(&self, gapless: bool) -> Option<Track> {
        if !self.settings.get_option(&self.key("auto_advance"), true) {
            return None;
        }
        if gapless {
            let delay: i64 = self.settings.get_option(&self.key("auto_advance_delay"), 0);
            let enabled = self.settings.get_option(&self.key("gapless_playback"), true);
            if delay != 0 || !enabled {
                return None;
            }
        }
        self.queue().peek_next()
    }

    fn notify_next(&self, track: &Track) -> PlayRequest {
        self.queue().commit_next(track);
        self.events.emit(Event::TrackChange {
            track: track.clone(),
        });
        self.play_params(track, None, false, true)
    }

    fn track_start(&self, track: &Track) {
        self.reset_playtime_stamp();
        self.events.emit(Event::PlaybackTrackStart {
            track: track.clone(),
        });
    }

    fn track_end(&self, track: &Track, stopped: bool) {
        self.update_playtime(track);
        self.events.emit(Event::PlaybackTrackEnd {
            track: track.clone(),
            stopped,
        });

        let count = track
            .get_tag_raw("__playcount")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let mut update = TagUpdate::new();
        update.insert("__playcount".into(), Some(TagValue::Number(count + 1.0)));
        update.insert(
            "__last_played".into(),
            Some(TagValue::Number(Utc::now().timestamp() as f64)),
        );
        self.apply_tags(track, update);
    }

    fn player_end(&self, track: &Track) {
        self.cancel_delayed_start();
        info!("Playback finished after {}", track.uri());
        self.events.emit(Event::PlaybackPlayerEnd {
            track: track.clone(),
        });
    }

    fn error(&self, kind: PlaybackErrorKind, message: &str) {
        self.events.emit(Event::PlaybackError {
            kind,
            message: message.to_string(),
        });
    }

    fn user_volume_changed(&self, volume: f64) {
        if let Err(e) = self.settings.set_option(&self.key("volume"), volume) {
            error!("Could not store volume: {}", e);
        }
    }

    fn buffering(&self, percent: u32) {
        self.events.emit(Event::PlaybackBuffering { percent });
    }

    fn tags_changed(&self, track: &Track, update: TagUpdate) {
        self.apply_tags(track, update);
    }
}

/// Application-facing playback controller
pub struct Player {
    shared: Arc<Shared>,
    engine: PlaybackEngine,
    main_loop: MainLoop,
    settings_watch: SettingsWatch,
    tag_subscription: SubscriptionId,
    tag_events: Receiver<Event>,
}

impl Player {
    pub fn new(
        framework: Arc<dyn MediaFramework>,
        settings: Arc<SettingsManager>,
        events: EventBus,
    ) -> Result<Self> {
        Self::with_options(framework, settings, events, PlayerOptions::default())
    }

    pub fn with_options(
        framework: Arc<dyn MediaFramework>,
        settings: Arc<SettingsManager>,
        events: EventBus,
        options: PlayerOptions,
    ) -> Result<Self> {
        let main_loop = MainLoop::new(framework.clock());
        let scheduler = main_loop.scheduler();
        let settings_watch = settings.watch("");
        let (tag_subscription, tag_events) = events.channel(Some("track_tags_changed"));

        let shared = Arc::new(Shared {
            section: options.name.clone(),
            settings: Arc::clone(&settings),
            events,
            scheduler: scheduler.clone(),
            queue: Mutex::new(PlayQueue::new(QueuePolicy::from_settings(&settings))),
            stats: Mutex::new(Stats::default()),
        });

        let engine = PlaybackEngine::new(StreamContext {
            framework,
            settings,
            section: options.name,
            filters: options.filters,
            scheduler,
            host: shared.clone(),
            crossfading: Arc::new(AtomicBool::new(false)),
            logs_dir: options.logs_dir,
        })?;

        Ok(Self {
            shared,
            engine,
            main_loop,
            settings_watch,
            tag_subscription,
            tag_events,
        })
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn filters(&self) -> &AudioFilters {
        self.engine.filters()
    }

    /// Handle for scheduling onto this player's loop
    pub fn scheduler(&self) -> Scheduler {
        self.shared.scheduler.clone()
    }

    /// Run `f` with the play queue locked
    ///
    /// Do not call back into the player from `f`.
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut PlayQueue) -> R) -> R {
        f(&mut self.shared.queue())
    }

    // ===== Main loop =====

    /// Dispatch everything that is ready now; returns how much was handled
    pub fn iterate(&mut self) -> usize {
        let mut handled = 0;

        for key in self.settings_watch.drain() {
            self.on_option_set(&key);
            handled += 1;
        }

        while let Ok(event) = self.tag_events.try_recv() {
            if let Event::TrackTagsChanged { track, tags } = event {
                if tags.iter().any(|t| t == "__stopoffset") {
                    self.engine.on_track_stopoffset_changed(&track);
                }
            }
            handled += 1;
        }

        loop {
            if let Some(event) = self.main_loop.try_recv() {
                self.dispatch(event);
            } else if let Some((id, task)) = self.main_loop.pop_due(self.shared.scheduler.now()) {
                self.run_timer(id, task);
            } else {
                break;
            }
            handled += 1;
        }

        handled
    }

    /// Keep dispatching for `duration` of wall time
    pub fn run_for(&mut self, duration: Duration) {
        let until = Instant::now() + duration;
        loop {
            self.iterate();

            let now = Instant::now();
            if now >= until {
                break;
            }
            let mut wait = until - now;
            if let Some(deadline) = self.main_loop.next_deadline() {
                wait = wait.min(deadline.saturating_sub(self.shared.scheduler.now()));
            }
            if let Some(event) = self.main_loop.wait(wait) {
                self.dispatch(event);
            }
        }
    }

    fn dispatch(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Stream {
                stream,
                generation,
                signal,
            } => self.engine.on_stream_signal(stream, generation, signal),
            LoopEvent::PluginsInstalled(result) => missing_plugin::log_install_result(result),
        }
    }

    fn run_timer(&mut self, id: TimerId, task: TimerTask) {
        match task {
            TimerTask::Fader(stream) => self.engine.on_fader_timeout(stream, id),
            TimerTask::DelayedStart => {
                if self.shared.take_delayed_start(id) {
                    debug!("Delayed start elapsed");
                    self.unpause();
                }
            }
            TimerTask::ReleaseSink(sink) => {
                debug!("Releasing replaced sink {}", sink.name());
                sink.set_state(State::Null);
            }
        }
    }

    fn on_option_set(&mut self, key: &str) {
        if key.starts_with("queue/") {
            let policy = QueuePolicy::from_settings(&self.shared.settings);
            self.shared.queue().set_policy(policy);
        } else if key == self.shared.key("volume") {
            let volume: f64 = self.shared.settings.get_option(key, 1.0);
            if (volume - self.engine.get_volume()).abs() > f64::EPSILON {
                self.engine.set_volume(volume);
            }
        } else {
            self.engine.on_option_set(key);
        }
    }

    // ===== Transport =====

    /// Play `track`, optionally from `start_at` seconds or paused
    pub fn play(&mut self, track: Track, start_at: Option<f64>, paused: bool) {
        if self.is_stopped() {
            self.shared.events.emit(Event::PlaybackPlayerStart {
                track: track.clone(),
            });
        }

        self.shared.queue().set_current(&track);
        let request = self.shared.play_params(&track, start_at, paused, false);
        let paused = request.paused;
        self.engine.play(request);

        if paused {
            self.shared.events.emit(Event::PlaybackPlayerPause {
                track: track.clone(),
            });
            self.shared
                .events
                .emit(Event::PlaybackTogglePause { track, paused: true });
        }
    }

    /// Stop playback; false if already stopped
    pub fn stop(&mut self) -> bool {
        if self.is_stopped() {
            debug!("Stop ignored, already stopped");
            return false;
        }
        self.shared.cancel_delayed_start();
        self.engine.stop();
        true
    }

    pub fn pause(&mut self) -> bool {
        self.shared.cancel_delayed_start();
        if !self.is_playing() {
            return false;
        }
        let Some(track) = self.current() else {
            return false;
        };

        self.shared.update_playtime(&track);
        self.engine.pause();

        self.shared.events.emit(Event::PlaybackPlayerPause {
            track: track.clone(),
        });
        self.shared
            .events
            .emit(Event::PlaybackTogglePause { track, paused: true });
        true
    }

    pub fn unpause(&mut self) -> bool {
        self.shared.cancel_delayed_start();
        if !self.is_paused() {
            return false;
        }
        let Some(track) = self.current() else {
            return false;
        };

        self.shared.reset_playtime_stamp();
        self.engine.unpause();

        self.shared.events.emit(Event::PlaybackPlayerResume {
            track: track.clone(),
        });
        self.shared
            .events
            .emit(Event::PlaybackTogglePause { track, paused: false });
        true
    }

    pub fn toggle_pause(&mut self) -> bool {
        if self.is_paused() {
            self.unpause()
        } else {
            self.pause()
        }
    }

    /// Seek the current track to `value` seconds
    pub fn seek(&mut self, value: f64) -> Result<()> {
        if self.current().is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if !self.engine.seek(value) {
            return Err(PlaybackError::SeekRejected);
        }
        self.shared
            .events
            .emit(Event::PlaybackSeeked { position: value });
        Ok(())
    }

    pub fn get_position(&self) -> ClockTime {
        self.engine.get_position()
    }

    /// Position in seconds
    pub fn get_time(&self) -> f64 {
        self.get_position().seconds_f64()
    }

    /// Fraction of the current track played, 0.0-1.0
    pub fn get_progress(&self) -> f64 {
        match self.current().and_then(|t| t.length()) {
            Some(length) => (self.get_time() / length).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn set_progress(&mut self, progress: f64) -> Result<()> {
        let length = self
            .current()
            .and_then(|t| t.length())
            .ok_or(PlaybackError::NoTrackLoaded)?;
        self.seek(length * progress.clamp(0.0, 1.0))
    }

    /// Seek by `delta` seconds, staying clear of the track end
    pub fn modify_time(&mut self, delta: f64) -> Result<()> {
        let track = self.current().ok_or(PlaybackError::NoTrackLoaded)?;
        let Some(length) = track.length() else {
            return Ok(());
        };
        let target = (self.get_time() + delta).clamp(0.0, (length - END_MARGIN_SECS).max(0.0));
        self.seek(target)
    }

    pub fn get_state(&self) -> PlayerState {
        self.engine.get_state()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == PlayerState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.get_state() == PlayerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.get_state() == PlayerState::Stopped
    }

    pub fn current(&self) -> Option<Track> {
        self.engine.current()
    }

    // ===== Volume =====

    /// User volume in percent
    pub fn get_volume(&self) -> f64 {
        let volume: f64 = self
            .shared
            .settings
            .get_option(&self.shared.key("volume"), 1.0);
        volume * 100.0
    }

    /// Set the user volume in percent, clamped to 0-100, and store it
    pub fn set_volume(&mut self, percent: f64) -> Result<()> {
        let volume = percent.clamp(0.0, 100.0) / 100.0;
        self.shared
            .settings
            .set_option(&self.shared.key("volume"), volume)?;
        self.engine.set_volume(volume);
        Ok(())
    }

    pub fn modify_volume(&mut self, delta: f64) -> Result<()> {
        self.set_volume(self.get_volume() + delta)
    }

    // ===== Queue =====

    /// Queue a track; may start playback per `queue/enqueue_begins_playback`
    pub fn enqueue(&mut self, track: Track) {
        let (was_empty, begins) = {
            let mut queue = self.shared.queue();
            let was_empty = queue.is_empty();
            queue.enqueue(track);
            (was_empty, queue.policy().enqueue_begins_playback)
        };
        if was_empty && begins && self.is_stopped() {
            self.play_queue(None);
        }
    }

    /// Play `track` through the queue, or whatever comes next when stopped
    pub fn play_queue(&mut self, track: Option<Track>) -> bool {
        let track = match track {
            Some(track) => {
                self.shared.queue().commit_next(&track);
                track
            }
            None => {
                if !self.is_stopped() {
                    return false;
                }
                let next = self.shared.queue().next();
                match next {
                    Some(track) => track,
                    None => return false,
                }
            }
        };
        self.start_from_queue(track);
        true
    }

    /// Skip to the next track; stops when there is none
    pub fn next(&mut self) -> bool {
        let next = self.shared.queue().next();
        match next {
            Some(track) => {
                self.start_from_queue(track);
                true
            }
            None => {
                self.stop();
                false
            }
        }
    }

    /// Go back a track, or restart the current one after a few seconds
    pub fn prev(&mut self) -> bool {
        let position = self.get_time();
        let playing = self.current();
        let prev = self.shared.queue().prev(position, playing.as_ref());
        match prev {
            Some(track) => {
                self.start_from_queue(track);
                true
            }
            None => {
                self.stop();
                false
            }
        }
    }

    fn start_from_queue(&mut self, track: Track) {
        self.shared.events.emit(Event::TrackChange {
            track: track.clone(),
        });
        self.play(track, None, false);
    }

    // ===== Session =====

    pub fn save_session(&self, path: impl AsRef<Path>) -> Result<()> {
        SessionState {
            state: self.get_state(),
            position_ns: self.get_position().nseconds(),
            playtime_stamp: self.shared.unflushed_playtime(),
        }
        .save(path)
    }

    /// Pick up where a saved session left off
    ///
    /// Returns true if playback was resumed.
    pub fn restore_session(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let settings = Arc::clone(&self.shared.settings);
        if !settings.get_option(&self.shared.key("resume_playback"), true) {
            return Ok(false);
        }

        let session = SessionState::load(path)?;
        if session.state == PlayerState::Stopped {
            return Ok(false);
        }

        let track = {
            let mut queue = self.shared.queue();
            queue.current().or_else(|| queue.next())
        };
        let Some(track) = track else {
            return Ok(false);
        };

        info!("Resuming {} at {}", track.uri(), ClockTime::from_nseconds(session.position_ns));

        let volume = self.get_volume() / 100.0;
        self.engine.set_volume(0.0);
        self.play(track, None, false);

        let Some(track) = self.current() else {
            self.engine.set_volume(volume);
            return Ok(false);
        };

        let position = ClockTime::from_nseconds(session.position_ns).seconds_f64();
        if let Err(e) = self.seek(position) {
            warn!("Could not restore position: {}", e);
        }

        let paused = session.state == PlayerState::Paused
            || settings.get_option(&self.shared.key("resume_paused"), false);
        if paused {
            self.toggle_pause();
        }

        // time played before shutdown that never made it into the tags
        if session.playtime_stamp >= 1.0 {
            self.shared.add_playtime(&track, session.playtime_stamp.floor());
        }

        self.engine.set_volume(volume);
        Ok(true)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shared.events.unsubscribe(self.tag_subscription);
    }
}
