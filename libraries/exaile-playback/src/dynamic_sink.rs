//! Audio sink that can switch its output while playing
//!
//! The pipeline sees one sink bin; the real output sink inside it can be
//! replaced at any time. A sink that is not playing is swapped directly.
//! A playing sink is swapped from a downstream pad block so no buffer
//! reaches two sinks, and the new sink is seeked to where the old one was.

use crate::mainloop::{Scheduler, TimerTask};
use exaile_core::media::{AudioSinkElement, ClockTime, SinkBin, State};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a replaced sink keeps running so queued data can drain
pub const SINK_RELEASE_GRACE: Duration = Duration::from_millis(2000);

const STATE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Slot {
    active: Option<Box<dyn AudioSinkElement>>,
    /// A pad block is outstanding
    switching: bool,
    /// Requested while a switch was in flight; applied after it
    queued: Option<Box<dyn AudioSinkElement>>,
}

struct Shared {
    name: String,
    bin: Arc<dyn SinkBin>,
    scheduler: Scheduler,
    slot: Mutex<Slot>,
}

/// Replaceable output inside a pipeline's sink bin
pub struct DynamicAudioSink {
    shared: Arc<Shared>,
}

impl DynamicAudioSink {
    pub fn new(name: impl Into<String>, bin: Arc<dyn SinkBin>, scheduler: Scheduler) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                bin,
                scheduler,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Route audio to `sink` from now on
    ///
    /// Failures are posted on the pipeline bus and leave the previous sink
    /// in place.
    pub fn reconfigure(&self, sink: Box<dyn AudioSinkElement>) {
        Shared::reconfigure(&self.shared, sink);
    }

    /// Name of the sink currently receiving audio
    pub fn active_sink_name(&self) -> Option<String> {
        self.shared
            .slot()
            .active
            .as_ref()
            .map(|s| s.name().to_string())
    }

    /// Whether a live switch is waiting for its pad block
    pub fn is_switching(&self) -> bool {
        self.shared.slot().switching
    }

    /// Post an error, stopping playback, if the device actually used by
    /// `sink` changes to something other than what it started with
    ///
    /// Returns false when the sink cannot report its device.
    pub fn stop_on_device_change(&self, sink: &dyn AudioSinkElement) -> bool {
        if !sink.has_current_device() {
            return false;
        }

        let selected = sink.device().or_else(|| sink.current_device());
        let bin: Weak<dyn SinkBin> = Arc::downgrade(&self.shared.bin);
        let name = self.shared.name.clone();

        sink.connect_current_device_notify(Box::new(move |current| {
            if current == selected {
                return;
            }
            if let Some(bin) = bin.upgrade() {
                info!(sink = %name, "Detected device disconnect, stopping playback");
                bin.post_error("Audio device disconnected", "Disconnected");
            }
        }));
        true
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconfigure(this: &Arc<Self>, sink: Box<dyn AudioSinkElement>) {
        let mut slot = this.slot();

        // One switch at a time; the newest request wins
        if slot.switching {
            debug!(sink = %this.name, "Switch in progress, queuing {}", sink.name());
            slot.queued = Some(sink);
            return;
        }

        let Some(old) = slot.active.take() else {
            debug!(sink = %this.name, "Adding first audio sink {}", sink.name());
            match this.add_sink(&*sink, None) {
                Ok(()) => slot.active = Some(sink),
                Err(message) => this.bin.post_error(&message, &this.name),
            }
            return;
        };

        let state = old.state(STATE_TIMEOUT);
        if state != State::Playing {
            let position = if state == State::Null {
                None
            } else {
                old.query_position()
            };

            this.bin.unlink_and_remove(&*old);
            old.set_state(State::Null);

            match this.add_sink(&*sink, position) {
                Ok(()) => slot.active = Some(sink),
                Err(message) => {
                    slot.active = this.restore(old);
                    this.bin.post_error(&message, &this.name);
                }
            }
            return;
        }

        debug!(sink = %this.name, "Switching live output to {}", sink.name());
        slot.active = Some(old);
        slot.switching = true;
        drop(slot);

        let shared = Arc::clone(this);
        this.bin
            .block_downstream(Box::new(move || Shared::switch_blocked(&shared, sink)));
    }

    /// Runs on the streaming thread with data flow blocked
    fn switch_blocked(this: &Arc<Self>, sink: Box<dyn AudioSinkElement>) {
        let queued = {
            let mut slot = this.slot();

            match slot.active.take() {
                Some(old) => {
                    let position = old.query_position();
                    this.bin.unlink_and_remove(&*old);

                    match this.add_sink(&*sink, position) {
                        Ok(()) => {
                            this.scheduler
                                .timeout_add(SINK_RELEASE_GRACE, TimerTask::ReleaseSink(old));
                            slot.active = Some(sink);
                        }
                        Err(message) => {
                            slot.active = this.restore(old);
                            this.bin.post_error(&message, &this.name);
                        }
                    }
                }
                None => match this.add_sink(&*sink, None) {
                    Ok(()) => slot.active = Some(sink),
                    Err(message) => this.bin.post_error(&message, &this.name),
                },
            }

            slot.switching = false;
            slot.queued.take()
        };

        if let Some(next) = queued {
            Shared::reconfigure(this, next);
        }
    }

    fn add_sink(
        &self,
        sink: &dyn AudioSinkElement,
        position: Option<ClockTime>,
    ) -> Result<(), String> {
        self.bin
            .add_and_link(sink)
            .map_err(|e| format!("Could not link {}: {}", sink.name(), e))?;
        sink.sync_state_with_parent();

        // Also needed when paused: the new sink only pre-rolls after a flush
        if let Some(position) = position {
            if !self.bin.flushing_seek(position) {
                warn!(sink = %self.name, "Could not resync new sink to {}", position);
            }
        }
        Ok(())
    }

    fn restore(&self, old: Box<dyn AudioSinkElement>) -> Option<Box<dyn AudioSinkElement>> {
        match self.bin.add_and_link(&*old) {
            Ok(()) => {
                old.sync_state_with_parent();
                Some(old)
            }
            Err(e) => {
                warn!(sink = %self.name, "Could not restore {}: {}", old.name(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainloop::MainLoop;
    use exaile_core::media::{BusMessage, MediaFramework, Pipeline};
    use exaile_media_sim::SimFramework;

    fn setup() -> (Arc<SimFramework>, Arc<dyn Pipeline>, MainLoop, DynamicAudioSink) {
        let sim = SimFramework::new();
        sim.add_media("file:///a.flac", 30.0);
        let pipeline = sim.create_playbin("test-playbin").unwrap();
        pipeline.set_uri("file:///a.flac");
        let main_loop = MainLoop::new(sim.clock());
        let sink = DynamicAudioSink::new("test-sink", pipeline.audio_sink_bin(), main_loop.scheduler());
        (sim, pipeline, main_loop, sink)
    }

    fn make(sim: &SimFramework, factory: &str, name: &str) -> Box<dyn AudioSinkElement> {
        sim.make_sink(factory, name).unwrap()
    }

    #[test]
    fn test_first_sink_is_linked() {
        let (sim, pipeline, _loop, sink) = setup();
        sink.reconfigure(make(&sim, "autoaudiosink", "first"));

        assert_eq!(sink.active_sink_name().as_deref(), Some("first"));
        let bin = sim.pipeline(pipeline.name()).unwrap().sim_sink_bin();
        assert_eq!(bin.linked_sink_names(), vec!["first".to_string()]);
    }

    #[test]
    fn test_switch_while_paused_resyncs_position() {
        let (sim, pipeline, _loop, sink) = setup();
        sink.reconfigure(make(&sim, "autoaudiosink", "first"));
        pipeline.set_state(State::Paused);
        pipeline.seek(ClockTime::from_seconds_f64(7.0));

        sink.reconfigure(make(&sim, "alsasink", "second"));

        let sim_pipeline = sim.pipeline(pipeline.name()).unwrap();
        let bin = sim_pipeline.sim_sink_bin();
        assert_eq!(bin.link_log(), vec!["link:first", "unlink:first", "link:second"]);
        assert_eq!(sim_pipeline.seeks().last(), Some(&ClockTime::from_seconds_f64(7.0)));
        assert!(!sink.is_switching());
    }

    #[test]
    fn test_live_switch_waits_for_pad_block() {
        let (sim, pipeline, main_loop, sink) = setup();
        sink.reconfigure(make(&sim, "autoaudiosink", "first"));
        pipeline.set_state(State::Playing);
        sim.advance(Duration::from_secs(10));

        sink.reconfigure(make(&sim, "pulsesink", "second"));
        assert!(sink.is_switching());
        assert_eq!(sink.active_sink_name().as_deref(), Some("first"));

        sim.advance(Duration::from_millis(10));
        assert!(!sink.is_switching());
        assert_eq!(sink.active_sink_name().as_deref(), Some("second"));

        let position = pipeline.query_position().unwrap().seconds_f64();
        assert!((position - 10.01).abs() < 0.05, "position {}", position);

        // The old sink is shut down after the grace period
        assert!(main_loop.next_deadline().is_some());
        sim.manual_clock().advance(SINK_RELEASE_GRACE);
        match main_loop.pop_due(sim.now()) {
            Some((_, TimerTask::ReleaseSink(old))) => assert_eq!(old.name(), "first"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_overlapping_switches_are_serialized() {
        let (sim, pipeline, _loop, sink) = setup();
        sink.reconfigure(make(&sim, "autoaudiosink", "first"));
        pipeline.set_state(State::Playing);

        sink.reconfigure(make(&sim, "pulsesink", "second"));
        sink.reconfigure(make(&sim, "alsasink", "third"));
        sim.advance(Duration::from_millis(10));
        sim.advance(Duration::from_millis(10));

        assert_eq!(sink.active_sink_name().as_deref(), Some("third"));
        let bin = sim.pipeline(pipeline.name()).unwrap().sim_sink_bin();
        assert_eq!(bin.linked_sink_names(), vec!["third".to_string()]);
    }

    #[test]
    fn test_device_change_posts_error() {
        let (sim, pipeline, _loop, sink) = setup();
        let pulse = make(&sim, "pulsesink", "pulse-out");
        pulse.set_device("speakers");
        assert!(sink.stop_on_device_change(&*pulse));
        sink.reconfigure(pulse);

        sim.change_current_device("pulse-out", Some("speakers"));
        sim.change_current_device("pulse-out", Some("headphones"));

        let errors: Vec<_> = sim
            .pipeline(pipeline.name())
            .unwrap()
            .posted_messages()
            .into_iter()
            .filter(|m| matches!(m, BusMessage::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            BusMessage::Error { message, .. } => assert_eq!(message, "Audio device disconnected"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_device_watch_needs_device_reporting() {
        let (sim, _pipeline, _loop, sink) = setup();
        let alsa = make(&sim, "alsasink", "alsa-out");
        assert!(!sink.stop_on_device_change(&*alsa));
    }
}
