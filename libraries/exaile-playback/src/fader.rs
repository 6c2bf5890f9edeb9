//! Track volume fader
//!
//! Applies a fade envelope to one stream's volume and enforces the track's
//! stop offset. There is a user volume and a fade volume; the stream volume
//! is always their product.
//!
//! - Fade in happens once per track play
//! - Fade out can happen multiple times
//!
//! The fader owns no stream. Every operation receives the stream's
//! [`FaderHooks`] for the duration of the call, and timers are plain ids
//! handed back to [`TrackFader::on_timeout`] by the owner.

use crate::mainloop::TimerId;
use exaile_core::Track;
use std::time::Duration;
use tracing::debug;

/// Fader tick interval
pub const FADE_TICK: Duration = Duration::from_millis(10);

const TICK_SECS: f64 = 0.010;

/// Envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    /// No envelope; fade volume is 1.0
    NoFade,
    FadingIn,
    /// Full volume, waiting for the fade-out to begin
    Normal,
    FadingOut,
}

/// What the fader needs from the stream it drives
pub trait FaderHooks {
    /// Playback position in seconds
    fn position(&self) -> f64;

    /// Apply the product of user and fade volume
    fn set_volume(&mut self, volume: f64);

    fn add_timeout(&mut self, delay: Duration) -> TimerId;

    fn remove_timeout(&mut self, id: TimerId);

    /// The fade-out finished; the stream should stop
    fn stop(&mut self);

    /// The fade-out just began
    fn on_fade_out(&mut self);
}

/// Four fade points in track seconds, `start <= fade_in_end <= fade_out_start <= stop`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeWindow {
    pub start: f64,
    pub fade_in_end: f64,
    pub fade_out_start: f64,
    pub stop: f64,
}

/// Fit fades of `fade_in` and `fade_out` seconds into `[start, stop]`
///
/// When both do not fit they are scaled down proportionally to fill the
/// play window. A window with `stop <= start` collapses every point onto
/// `start`.
pub fn calculate_fades(start: f64, stop: f64, fade_in: f64, fade_out: f64) -> FadeWindow {
    if stop <= start {
        return FadeWindow {
            start,
            fade_in_end: start,
            fade_out_start: start,
            stop: start,
        };
    }

    let mut fade_in = fade_in.max(0.0);
    let mut fade_out = fade_out.max(0.0);

    let playlen = stop - start;
    let total = (fade_in + fade_out).max(0.1);
    if total > playlen {
        fade_in = playlen * (fade_in / total);
        fade_out = playlen * (fade_out / total);
    }

    let fade_in_end = (start + fade_in).min(stop);
    let fade_out_start = (stop - fade_out).clamp(fade_in_end, stop);
    FadeWindow {
        start,
        fade_in_end,
        fade_out_start,
        stop,
    }
}

/// Effective play window of a track
#[derive(Debug, Clone, Copy, PartialEq)]
enum PlayWindow {
    /// Length unknown (streams); only the start offset applies
    Open { start: f64 },
    Bounded { start: f64, stop: f64 },
    /// Offsets leave nothing to play; fading is disabled
    Empty,
}

fn play_window(track: &Track) -> PlayWindow {
    let Some(length) = track.length() else {
        return PlayWindow::Open {
            start: track.start_offset(),
        };
    };

    let stop = match track.stop_offset() {
        s if s < 1.0 => length,
        s => s.min(length),
    };
    let start = track.start_offset().min(length);

    if stop <= start {
        PlayWindow::Empty
    } else {
        PlayWindow::Bounded { start, stop }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FadeSpan {
    start: f64,
    end: f64,
}

impl FadeSpan {
    fn len(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerKind {
    /// Waiting for the fade-out window
    FadeStart,
    /// Running fade
    Tick { start: f64, len: f64 },
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    id: TimerId,
    kind: TimerKind,
}

/// Per-stream volume envelope
#[derive(Debug)]
pub struct TrackFader {
    name: String,
    state: FadeState,
    user_volume: f64,
    fade_volume: f64,
    fade_in: Option<FadeSpan>,
    fade_out: Option<FadeSpan>,
    /// Assumed position while a fade runs, advanced by one tick per timer
    now: f64,
    timer: Option<PendingTimer>,
    /// Set while the stream is paused; nothing gets armed until unpause
    held: bool,
}

impl TrackFader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: FadeState::NoFade,
            user_volume: 1.0,
            fade_volume: 1.0,
            fade_in: None,
            fade_out: None,
            now: 0.0,
            timer: None,
            held: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FadeState {
        self.state
    }

    pub fn is_fading_out(&self) -> bool {
        self.state == FadeState::FadingOut
    }

    pub fn user_volume(&self) -> f64 {
        self.user_volume
    }

    pub fn fade_volume(&self) -> f64 {
        self.fade_volume
    }

    /// Whether a timer is outstanding
    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Fade-in window as `(start, end)`
    pub fn fade_in_window(&self) -> Option<(f64, f64)> {
        self.fade_in.map(|s| (s.start, s.end))
    }

    /// Fade-out window as `(start, end)`
    pub fn fade_out_window(&self) -> Option<(f64, f64)> {
        self.fade_out.map(|s| (s.start, s.end))
    }

    /// Configure fades for a starting track, or adjust them when the
    /// durations changed mid-play (`is_update`)
    ///
    /// With no fade durations the fader only enforces the track's stop
    /// offset. An update never cancels a running fade-out, a running
    /// fade-in keeps going with only its fade-out end point adjusted, and
    /// past the fade-in only the fade-out is re-planned.
    pub fn setup_track(
        &mut self,
        hooks: &mut dyn FaderHooks,
        track: &Track,
        fade_in: Option<f64>,
        fade_out: Option<f64>,
        is_update: bool,
        now: Option<f64>,
    ) {
        let (planned_in, planned_out) = plan_fades(track, fade_in, fade_out);

        if is_update {
            match self.state {
                FadeState::FadingOut => return,
                FadeState::FadingIn => {
                    self.fade_out = planned_out;
                    self.next(hooks, now);
                    return;
                }
                // the fade-in of this play is over; only the end moves
                FadeState::NoFade | FadeState::Normal => {
                    self.play(hooks, None, planned_out, now);
                    return;
                }
            }
        }

        self.play(hooks, planned_in, planned_out, now);
    }

    fn play(
        &mut self,
        hooks: &mut dyn FaderHooks,
        fade_in: Option<FadeSpan>,
        fade_out: Option<FadeSpan>,
        now: Option<f64>,
    ) {
        self.fade_in = fade_in;
        self.fade_out = fade_out;

        self.state = if fade_in.is_some() {
            FadeState::FadingIn
        } else if fade_out.is_none() {
            FadeState::NoFade
        } else {
            FadeState::Normal
        };

        self.next(hooks, now);
    }

    /// Given the volume observed on the output, work out what the user
    /// volume must be and whether it differs from ours
    pub fn calculate_user_volume(&self, real_volume: f64) -> (f64, bool) {
        let applied = self.user_volume * self.fade_volume;
        if (real_volume - applied).abs() < 0.01 {
            return (real_volume, true);
        }

        if self.fade_volume < 0.01 {
            (real_volume, true)
        } else {
            let user = real_volume / self.fade_volume;
            (user, (user - self.user_volume).abs() < 0.01)
        }
    }

    /// Force a fade-out starting now
    ///
    /// An interrupted fade-in turns into a fade-out starting from the
    /// current fade volume, so it reaches silence after the same fraction
    /// of the fade length it had climbed. Without a fade-out window the
    /// stream is stopped right away.
    pub fn fade_out_on_play(&mut self, hooks: &mut dyn FaderHooks) {
        let Some(fade_out) = self.fade_out else {
            debug!(fader = %self.name, "No fade out defined, stopping");
            hooks.stop();
            return;
        };

        let now = hooks.position() - TICK_SECS;
        let len = fade_out.len();

        let start = match self.state {
            FadeState::Normal => now,
            FadeState::FadingIn => now - (1.0 - self.fade_volume) * len,
            FadeState::NoFade | FadeState::FadingOut => return,
        };

        debug!(fader = %self.name, now, start, len, "Forcing fade out");

        self.state = FadeState::FadingOut;
        self.now = now;
        self.cancel(hooks);
        if self.execute_fade(hooks, start, len) {
            self.schedule_tick(hooks, start, len);
        }
    }

    /// Hold the fader until `unpause`
    ///
    /// Seeks and fade updates made while held only move the windows; the
    /// envelope is re-evaluated from the real position on unpause.
    pub fn pause(&mut self, hooks: &mut dyn FaderHooks) {
        self.held = true;
        self.cancel(hooks);
    }

    pub fn unpause(&mut self, hooks: &mut dyn FaderHooks) {
        self.held = false;
        self.next(hooks, None);
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Re-evaluate the envelope at track position `to`
    ///
    /// Seeking during a fade-in keeps the fade going from its current
    /// volume: the window is moved so the remaining part starts at `to`.
    pub fn seek(&mut self, hooks: &mut dyn FaderHooks, to: f64) {
        if self.state == FadeState::FadingIn {
            if let Some(fade_in) = self.fade_in {
                let len = fade_in.len();
                let start = to - self.fade_volume * len;
                let mut end = start + len;
                if let Some(fade_out) = self.fade_out {
                    end = end.min(fade_out.start);
                }

                if end <= to {
                    self.state = FadeState::Normal;
                } else {
                    self.fade_in = Some(FadeSpan { start, end });
                }
            }
        }
        self.next(hooks, Some(to));
    }

    pub fn set_user_volume(&mut self, hooks: &mut dyn FaderHooks, volume: f64) {
        self.user_volume = volume;
        hooks.set_volume(self.user_volume * self.fade_volume);
    }

    pub fn stop(&mut self, hooks: &mut dyn FaderHooks) {
        self.state = FadeState::NoFade;
        self.held = false;
        self.cancel(hooks);
    }

    /// Handle a fired timer; false if `id` is not ours
    pub fn on_timeout(&mut self, hooks: &mut dyn FaderHooks, id: TimerId) -> bool {
        let Some(timer) = self.timer.filter(|t| t.id == id) else {
            return false;
        };
        self.timer = None;

        match timer.kind {
            TimerKind::FadeStart => self.on_fade_start(hooks, None),
            TimerKind::Tick { start, len } => {
                if self.execute_fade(hooks, start, len) {
                    self.schedule_tick(hooks, start, len);
                }
            }
        }
        true
    }

    fn set_fade_volume(&mut self, hooks: &mut dyn FaderHooks, volume: f64) {
        self.fade_volume = volume;
        hooks.set_volume(self.user_volume * self.fade_volume);
    }

    fn next(&mut self, hooks: &mut dyn FaderHooks, now: Option<f64>) {
        self.cancel(hooks);
        if self.held {
            return;
        }

        if self.state == FadeState::NoFade {
            self.set_fade_volume(hooks, 1.0);
            return;
        }

        let now = now.unwrap_or_else(|| hooks.position());

        debug!(
            fader = %self.name,
            "Fade data: now: {:.2}; in: {:?}; out: {:?}",
            now,
            self.fade_in,
            self.fade_out
        );

        if self.state == FadeState::FadingIn {
            if self.fade_in.is_some_and(|f| now < f.end) {
                self.on_fade_start(hooks, Some(now));
                return;
            }
            self.state = FadeState::Normal;
        }

        let Some(fade_out) = self.fade_out else {
            self.state = FadeState::NoFade;
            self.set_fade_volume(hooks, 1.0);
            return;
        };

        // Truncated to whole milliseconds
        let fade_ms = ((fade_out.start - now) * 1000.0) as i64;
        if fade_ms > 0 {
            debug!(fader = %self.name, "Will fade out in {:.2} seconds", fade_ms as f64 / 1000.0);
            let id = hooks.add_timeout(Duration::from_millis(fade_ms.unsigned_abs()));
            self.timer = Some(PendingTimer {
                id,
                kind: TimerKind::FadeStart,
            });
            self.set_fade_volume(hooks, 1.0);
        } else {
            self.on_fade_start(hooks, Some(now));
        }
    }

    fn cancel(&mut self, hooks: &mut dyn FaderHooks) {
        if let Some(timer) = self.timer.take() {
            hooks.remove_timeout(timer.id);
        }
    }

    fn schedule_tick(&mut self, hooks: &mut dyn FaderHooks, start: f64, len: f64) {
        let id = hooks.add_timeout(FADE_TICK);
        self.timer = Some(PendingTimer {
            id,
            kind: TimerKind::Tick { start, len },
        });
    }

    fn on_fade_start(&mut self, hooks: &mut dyn FaderHooks, now: Option<f64>) {
        let now = now.unwrap_or_else(|| hooks.position());
        self.now = now - TICK_SECS;

        let span = if self.state == FadeState::FadingIn {
            debug!(fader = %self.name, "Fade in begins");
            self.fade_in
        } else {
            if self.state != FadeState::FadingOut {
                debug!(fader = %self.name, "Fade out begins at {:.2}", self.now);
                self.state = FadeState::FadingOut;
                hooks.on_fade_out();
            }
            self.fade_out
        };

        let Some(span) = span else {
            self.state = FadeState::NoFade;
            self.set_fade_volume(hooks, 1.0);
            return;
        };

        if self.execute_fade(hooks, span.start, span.len()) {
            self.schedule_tick(hooks, span.start, span.len());
        }
    }

    /// One fade step; true while the fade has more steps to go
    ///
    /// `start` is when the fade should have started and `len` its total
    /// length, regardless of where it was entered.
    fn execute_fade(&mut self, hooks: &mut dyn FaderHooks, start: f64, len: f64) -> bool {
        // Assume one tick passed rather than querying the stream
        self.now += TICK_SECS;
        let fading_in = self.state == FadeState::FadingIn;

        let mut volume = if len < 0.01 {
            0.0
        } else {
            (self.now - start) / len
        };
        if !fading_in {
            volume = 1.0 - volume;
        }
        self.set_fade_volume(hooks, volume.clamp(0.0, 1.0));

        if self.now > start + len {
            if fading_in {
                debug!(fader = %self.name, "Fade in ends");
                self.state = FadeState::Normal;
                self.next(hooks, None);
            } else {
                debug!(fader = %self.name, "Fade out ends");
                self.state = FadeState::NoFade;
                hooks.stop();
            }
            return false;
        }

        true
    }
}

fn plan_fades(
    track: &Track,
    fade_in: Option<f64>,
    fade_out: Option<f64>,
) -> (Option<FadeSpan>, Option<FadeSpan>) {
    let stop_offset = track.stop_offset();
    let stop_at = |at: f64| FadeSpan { start: at, end: at };

    if fade_in.is_none() && fade_out.is_none() {
        let fade_out = (stop_offset > 0.0).then(|| stop_at(stop_offset));
        return (None, fade_out);
    }

    match play_window(track) {
        PlayWindow::Empty => (None, None),
        PlayWindow::Open { start } => {
            let fade_in = fade_in.map(|f| FadeSpan {
                start,
                end: start + f.max(0.0),
            });
            (fade_in, None)
        }
        PlayWindow::Bounded { start, stop } => {
            let w = calculate_fades(start, stop, fade_in.unwrap_or(0.0), fade_out.unwrap_or(0.0));
            let planned_in = FadeSpan {
                start: w.start,
                end: w.fade_in_end,
            };
            let planned_out = if fade_out.is_some() {
                Some(FadeSpan {
                    start: w.fade_out_start,
                    end: w.stop,
                })
            } else if stop_offset > 0.0 {
                Some(stop_at(w.stop))
            } else {
                None
            };
            (Some(planned_in), planned_out)
        }
    }
}
