//! Playback engine
//!
//! Owns a main [`AudioStream`] and, while crossfading is enabled, a second
//! stream that the two alternate between: the incoming track starts on the
//! idle stream and the outgoing one fades out on the other.
//!
//! The engine knows nothing about queues or events. Everything that leaves
//! it goes through an [`EngineHost`].

use crate::error::Result;
use crate::filters::AudioFilters;
use crate::mainloop::{StreamId, StreamSignal, TimerId};
use crate::missing_plugin;
use crate::stream::{AudioStream, StreamContext, StreamNotice};
use crate::types::{EngineConfig, PlayRequest, PlayerState};
use exaile_core::media::{ClockTime, State};
use exaile_core::{PlaybackErrorKind, TagUpdate, Track};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, trace, warn};

/// Callbacks from the engine to whoever owns the queue and publishes events
///
/// `get_next_track` may be called from a framework thread; the rest run on
/// the main loop thread.
#[cfg_attr(test, mockall::automock)]
pub trait EngineHost: Send + Sync {
    /// Track that would play next, without consuming it
    ///
    /// `gapless` asks on behalf of about-to-finish; the host may refuse.
    fn get_next_track(&self, gapless: bool) -> Option<Track>;

    /// `track` is about to play automatically: consume it from the queue
    /// and say how to start it
    fn notify_next(&self, track: &Track) -> PlayRequest;

    fn track_start(&self, track: &Track);

    /// `stopped` is true when nothing follows
    fn track_end(&self, track: &Track, stopped: bool);

    /// Auto-advance found nothing more to play
    fn player_end(&self, track: &Track);

    fn error(&self, kind: PlaybackErrorKind, message: &str);

    /// The output volume was changed outside the engine
    fn user_volume_changed(&self, volume: f64);

    fn buffering(&self, percent: u32);

    /// Tags discovered for `track` while playing it
    fn tags_changed(&self, track: &Track, update: TagUpdate);
}

/// Drives one or two audio streams
pub struct PlaybackEngine {
    ctx: StreamContext,
    config: EngineConfig,
    main: AudioStream,
    /// Crossfade partner of `main`
    other: Option<AudioStream>,
    next_stream_id: u64,
}

impl PlaybackEngine {
    pub fn new(ctx: StreamContext) -> Result<Self> {
        let config = EngineConfig::from_settings(&ctx.settings, &ctx.section);
        let mut next_stream_id = 0;
        let main = spawn_stream(&ctx, &mut next_stream_id)?;

        let mut engine = Self {
            ctx,
            config,
            main,
            other: None,
            next_stream_id,
        };

        let volume: f64 = engine
            .ctx
            .settings
            .get_option(&format!("{}/volume", engine.ctx.section), 1.0);
        engine.main.set_user_volume(volume);
        engine.reconfigure_crossfader();

        info!(engine = %engine.ctx.section, "Playback engine ready");
        Ok(engine)
    }

    pub fn name(&self) -> &str {
        &self.ctx.section
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn filters(&self) -> &AudioFilters {
        &self.ctx.filters
    }

    /// Stream playing the current track
    pub fn main_stream(&self) -> &AudioStream {
        &self.main
    }

    /// Second stream, present while crossfading is enabled
    pub fn other_stream(&self) -> Option<&AudioStream> {
        self.other.as_ref()
    }

    pub fn current(&self) -> Option<Track> {
        self.main.current().cloned()
    }

    pub fn get_position(&self) -> ClockTime {
        self.main.get_position()
    }

    pub fn get_state(&self) -> PlayerState {
        match self.main.get_gst_state() {
            State::Playing => PlayerState::Playing,
            State::Paused => PlayerState::Paused,
            State::Null | State::Ready => PlayerState::Stopped,
        }
    }

    pub fn get_volume(&self) -> f64 {
        self.main.user_volume()
    }

    /// Set the user volume of both streams (0.0-1.0)
    pub fn set_volume(&mut self, volume: f64) {
        self.main.set_user_volume(volume);
        if let Some(other) = &mut self.other {
            other.set_user_volume(volume);
        }
        self.process_notices();
    }

    /// Start a track chosen by the user
    pub fn play(&mut self, request: PlayRequest) {
        let prior = self.main.current().cloned();
        self.next_track(prior, &request, false, false);
        self.process_notices();
    }

    pub fn pause(&mut self) {
        self.main.pause();
        if let Some(other) = &mut self.other {
            other.stop(false);
        }
        self.process_notices();
    }

    pub fn unpause(&mut self) {
        self.main.unpause();
        self.process_notices();
    }

    /// Seek the current track to `value` seconds
    pub fn seek(&mut self, value: f64) -> bool {
        let done = self.main.seek(value);
        self.process_notices();
        done
    }

    /// Stop everything on user request
    pub fn stop(&mut self) {
        if let Some(other) = &mut self.other {
            other.stop(false);
        }
        let prior = self.main.stop(false);
        if let Some(prior) = prior {
            self.ctx.host.track_end(&prior, true);
        }
        self.process_notices();
    }

    /// The stop offset of `track` was edited while it may be playing
    pub fn on_track_stopoffset_changed(&mut self, track: &Track) {
        let fades = self.crossfade_active().then(|| self.config.crossfade_secs());
        for stream in self.streams_mut() {
            if stream.current() == Some(track) {
                debug!(stream = %stream.name(), "Stop offset changed, updating fades");
                stream.reconfigure_fader(fades, fades);
            }
        }
        self.process_notices();
    }

    /// A `section/...` setting was written
    pub fn on_option_set(&mut self, key: &str) {
        let Some(name) = key
            .strip_prefix(self.ctx.section.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return;
        };

        match name {
            "crossfading" | "crossfade_duration" => {
                self.config = EngineConfig::from_settings(&self.ctx.settings, &self.ctx.section);
                self.reconfigure_crossfader();
            }
            "user_fade_enabled" | "user_fade" | "disable_autoswitch" => {
                self.config = EngineConfig::from_settings(&self.ctx.settings, &self.ctx.section);
            }
            "audiosink" | "audiosink_device" | "custom_sink_pipe" => {
                info!(engine = %self.ctx.section, "Output settings changed, rebuilding sinks");
                for stream in self.streams_mut() {
                    stream.request_sink();
                }
            }
            _ => return,
        }
        self.process_notices();
    }

    /// A fader timer fired
    pub fn on_fader_timeout(&mut self, stream: StreamId, id: TimerId) {
        match self.stream_mut(stream) {
            Some(s) => {
                s.on_timeout(id);
            }
            None => trace!(%stream, id, "Timer for a destroyed stream"),
        }
        self.process_notices();
    }

    /// A stream's pipeline posted a signal
    pub fn on_stream_signal(&mut self, stream: StreamId, generation: u64, signal: StreamSignal) {
        match self.stream_mut(stream) {
            Some(s) => s.handle_signal(generation, signal),
            None => trace!(%stream, "Signal for a destroyed stream"),
        }
        self.process_notices();
    }

    /// Tear down all streams; the engine is unusable after
    pub fn destroy(&mut self) {
        debug!(engine = %self.ctx.section, "Destroying playback engine");
        if let Some(mut other) = self.other.take() {
            other.destroy();
        }
        self.main.destroy();
    }

    fn crossfade_active(&self) -> bool {
        self.config.crossfade_enabled && self.other.is_some()
    }

    fn streams_mut(&mut self) -> impl Iterator<Item = &mut AudioStream> {
        std::iter::once(&mut self.main).chain(self.other.as_mut())
    }

    fn stream_mut(&mut self, id: StreamId) -> Option<&mut AudioStream> {
        self.streams_mut().find(|s| s.id() == id)
    }

    fn reconfigure_crossfader(&mut self) {
        let mut fades = None;

        if self.config.crossfade_enabled {
            if self.other.is_none() {
                match spawn_stream(&self.ctx, &mut self.next_stream_id) {
                    Ok(mut other) => {
                        other.set_user_volume(self.main.user_volume());
                        self.other = Some(other);
                    }
                    Err(e) => error!("Could not create crossfade stream: {}", e),
                }
            }
            if let Some(other) = &mut self.other {
                let secs = self.config.crossfade_secs();
                fades = Some(secs);
                other.reconfigure_fader(fades, fades);
                info!("Crossfade: enabled ({}ms)", self.config.crossfade_duration_ms);
            }
        } else {
            info!("Crossfade: disabled");
            if let Some(mut other) = self.other.take() {
                other.destroy();
            }
        }

        self.ctx
            .crossfading
            .store(self.crossfade_active(), Ordering::SeqCst);
        self.main.reconfigure_fader(fades, fades);
    }

    fn next_track(
        &mut self,
        prior: Option<Track>,
        request: &PlayRequest,
        already_queued: bool,
        autoadvance: bool,
    ) {
        if let Some(prior) = &prior {
            self.ctx.host.track_end(prior, false);
        }

        let PlayRequest {
            track,
            start_at,
            paused,
        } = request;

        if self.crossfade_active() {
            if let Some(other) = &mut self.other {
                std::mem::swap(&mut self.main, other);
            }
            let fades = Some(self.config.crossfade_secs());
            self.main
                .play(track, *start_at, *paused, already_queued, fades, fades);
            if let Some(other) = &mut self.other {
                other.fade_out_on_play();
            }
        } else if self.config.user_fade_enabled && !autoadvance {
            let fade_in = Some(self.config.user_fade_secs());
            self.main
                .play(track, *start_at, *paused, already_queued, fade_in, None);
        } else {
            self.main
                .play(track, *start_at, *paused, already_queued, None, None);
        }

        self.ctx.host.track_start(track);
    }

    fn autoadvance(&mut self, prior: Option<Track>, still_fading: bool) {
        match self.ctx.host.get_next_track(false) {
            Some(track) => {
                let request = self.ctx.host.notify_next(&track);
                self.next_track(prior, &request, false, true);
            }
            None if !still_fading => {
                debug!("Nothing more to play");
                self.main.stop(false);
                if let Some(prior) = prior {
                    self.ctx.host.track_end(&prior, true);
                    self.ctx.host.player_end(&prior);
                }
            }
            None => {}
        }
    }

    /// Handle what the streams raised until they go quiet
    fn process_notices(&mut self) {
        loop {
            let mut pending: Vec<(StreamId, StreamNotice)> = Vec::new();
            for stream in self.streams_mut() {
                let id = stream.id();
                pending.extend(stream.take_notices().into_iter().map(|n| (id, n)));
            }
            if pending.is_empty() {
                return;
            }
            for (stream, notice) in pending {
                // main may change while handling, e.g. on a crossfade swap
                let from_main = stream == self.main.id();
                self.handle_notice(from_main, notice);
            }
        }
    }

    fn handle_notice(&mut self, from_main: bool, notice: StreamNotice) {
        match notice {
            StreamNotice::Eos { prior } => {
                if from_main {
                    let prior = self.main.current().cloned().or(prior);
                    self.autoadvance(prior, false);
                }
            }
            StreamNotice::FadeOutBegan => {
                if from_main && self.crossfade_active() {
                    let prior = self.main.current().cloned();
                    self.autoadvance(prior, true);
                }
            }
            StreamNotice::NextTrackStarted(track) => {
                if from_main {
                    let request = self.ctx.host.notify_next(&track);
                    let prior = self.main.current().cloned();
                    self.next_track(prior, &request, true, true);
                }
            }
            StreamNotice::Buffering(percent) => self.ctx.host.buffering(percent),
            StreamNotice::TagsChanged { track, update } => self.ctx.host.tags_changed(&track, update),
            StreamNotice::VolumeChanged(volume) => self.ctx.host.user_volume_changed(volume),
            StreamNotice::Error { kind, message } => self.on_error(kind, &message),
            StreamNotice::MissingPlugin {
                description,
                detail,
            } => {
                warn!("A plugin for {} is missing, stopping playback", description);
                self.stop();
                self.ctx
                    .host
                    .error(PlaybackErrorKind::MissingPlugin, &missing_plugin::user_message(&description));
                missing_plugin::run_installer(&*self.ctx.framework, &self.ctx.scheduler, &detail);
            }
        }
    }

    /// Report the error and start over with fresh pipelines
    fn on_error(&mut self, kind: PlaybackErrorKind, message: &str) {
        let prior = self.main.current().cloned();
        self.ctx.host.error(kind, message);

        let volume = self.main.user_volume();
        match spawn_stream(&self.ctx, &mut self.next_stream_id) {
            Ok(mut fresh) => {
                fresh.set_user_volume(volume);
                let mut old = std::mem::replace(&mut self.main, fresh);
                old.destroy();
            }
            Err(e) => {
                error!("Could not recreate audio stream: {}", e);
                self.main.stop(false);
            }
        }
        if let Some(mut other) = self.other.take() {
            other.destroy();
        }
        self.reconfigure_crossfader();

        if let Some(prior) = prior {
            self.ctx.host.track_end(&prior, true);
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn spawn_stream(ctx: &StreamContext, next_id: &mut u64) -> Result<AudioStream> {
    *next_id += 1;
    AudioStream::new(ctx.clone(), StreamId(*next_id))
}
