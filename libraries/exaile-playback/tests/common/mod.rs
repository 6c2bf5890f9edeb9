//! Shared fixtures for the player integration tests
//!
//! Everything runs on the simulated framework's manual clock: `run`
//! advances time in 10 ms steps and dispatches the player's loop after
//! each one, the way a real main loop would interleave.

#![allow(dead_code)]

use exaile_core::media::{MediaFramework, Pipeline};
use exaile_core::{Event, EventBus, SettingsManager, Track};
use exaile_media_sim::{SimFramework, SimMedia, SimPipeline};
use exaile_playback::{Player, PlayerOptions, Playlist};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const STEP: Duration = Duration::from_millis(10);

/// An event with the simulated time it was seen at
#[derive(Debug, Clone)]
pub struct Seen {
    pub at: Duration,
    pub event: Event,
}

pub struct Harness {
    pub sim: Arc<SimFramework>,
    pub settings: Arc<SettingsManager>,
    pub events: EventBus,
    pub player: Player,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SettingsManager::new())
    }

    pub fn with_settings(settings: SettingsManager) -> Self {
        exaile_core::logging::try_init_for_tests("exaile_playback=debug");

        let sim = SimFramework::new();
        let events = EventBus::new();
        let settings = Arc::new(settings.with_events(events.clone()));
        let player = Player::with_options(
            sim.clone(),
            Arc::clone(&settings),
            events.clone(),
            PlayerOptions::default(),
        )
        .expect("player");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let clock = sim.clock();
        events.subscribe(None, move |event| {
            if matches!(event, Event::OptionSet { .. }) {
                return;
            }
            sink.lock().unwrap().push(Seen {
                at: clock.now(),
                event: event.clone(),
            });
        });

        Self {
            sim,
            settings,
            events,
            player,
            seen,
        }
    }

    /// Register `name` in the catalog and return a track for it
    pub fn media(&self, name: &str, secs: f64) -> Track {
        let uri = format!("file:///music/{}", name);
        self.sim.add_media(&uri, secs);
        Track::with_length(uri, secs)
    }

    pub fn media_with(&self, name: &str, media: SimMedia) -> Track {
        let uri = format!("file:///music/{}", name);
        self.sim.add_media_with(&uri, media);
        Track::new(uri)
    }

    pub fn set_playlist(&self, tracks: &[Track]) {
        let playlist = Playlist::new("test", tracks.to_vec());
        self.player
            .with_queue(|q| q.set_current_playlist(Some(playlist)));
    }

    /// Let simulated time pass
    pub fn run(&mut self, by: Duration) {
        let steps = by.as_millis() / STEP.as_millis();
        for _ in 0..steps {
            self.sim.advance(STEP);
            self.player.iterate();
        }
    }

    pub fn run_ms(&mut self, ms: u64) {
        self.run(Duration::from_millis(ms));
    }

    /// Dispatch whatever is pending without moving time
    pub fn pump(&mut self) {
        self.player.iterate();
    }

    pub fn now(&self) -> Duration {
        self.sim.now()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn clear_seen(&self) {
        self.seen.lock().unwrap().clear();
    }

    /// Compact `name:track` log of what was emitted
    pub fn log(&self) -> Vec<String> {
        self.seen().iter().map(|s| describe(&s.event)).collect()
    }

    /// Log restricted to track start/end and player end
    pub fn transitions(&self) -> Vec<String> {
        self.seen()
            .iter()
            .filter(|s| {
                matches!(
                    s.event,
                    Event::PlaybackTrackStart { .. }
                        | Event::PlaybackTrackEnd { .. }
                        | Event::PlaybackPlayerEnd { .. }
                )
            })
            .map(|s| describe(&s.event))
            .collect()
    }

    /// Simulated time of the first event matching `pred`
    pub fn first_at(&self, pred: impl Fn(&Event) -> bool) -> Option<Duration> {
        self.seen().into_iter().find(|s| pred(&s.event)).map(|s| s.at)
    }

    /// Volume applied to the pipeline rendering `track`
    pub fn applied_volume(&self, track: &Track) -> Option<f64> {
        self.sim.pipeline_playing(track.uri()).map(|p| p.volume())
    }

    pub fn pipeline_for(&self, track: &Track) -> Option<Arc<SimPipeline>> {
        self.sim.pipeline_playing(track.uri())
    }
}

fn short(track: &Track) -> &str {
    track.uri().rsplit('/').next().unwrap_or_default()
}

pub fn describe(event: &Event) -> String {
    match event {
        Event::PlaybackTrackStart { track } => format!("start:{}", short(track)),
        Event::PlaybackTrackEnd { track, stopped } => {
            format!("end:{}:{}", short(track), stopped)
        }
        Event::PlaybackPlayerStart { track } => format!("player_start:{}", short(track)),
        Event::PlaybackPlayerEnd { track } => format!("player_end:{}", short(track)),
        Event::PlaybackPlayerPause { track } => format!("pause:{}", short(track)),
        Event::PlaybackPlayerResume { track } => format!("resume:{}", short(track)),
        Event::PlaybackTogglePause { track, paused } => {
            format!("toggle:{}:{}", short(track), paused)
        }
        Event::PlaybackBuffering { percent } => format!("buffering:{}", percent),
        Event::PlaybackError { kind, .. } => format!("error:{:?}", kind),
        Event::PlaybackSeeked { position } => format!("seeked:{}", position),
        Event::TrackTagsChanged { track, tags } => {
            format!("tags:{}:{}", short(track), tags.join(","))
        }
        Event::TrackChange { track } => format!("change:{}", short(track)),
        Event::OptionSet { key } => format!("option:{}", key),
    }
}

pub fn secs(at: Duration) -> f64 {
    at.as_secs_f64()
}

pub fn approx(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}
