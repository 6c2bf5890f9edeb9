//! Behaviour of the simulated framework that the playback engine relies on

use exaile_core::media::{
    AudioSinkElement, BusMessage, ClockTime, MediaError, MediaFramework, Pipeline, State,
    StateChangeReturn, TagList, TagListValue,
};
use exaile_media_sim::pipeline::ABOUT_TO_FINISH_LEAD;
use exaile_media_sim::{SimFailure, SimFramework, SimMedia};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===== Helpers =====

fn watched(sim: &SimFramework, name: &str) -> (Arc<dyn Pipeline>, Arc<Mutex<Vec<BusMessage>>>) {
    let pipeline = sim.create_playbin(name).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    pipeline.set_bus_watch(Box::new(move |message| sink.lock().unwrap().push(message)));
    (pipeline, seen)
}

fn kinds(seen: &Mutex<Vec<BusMessage>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|m| m.kind().to_string())
        .collect()
}

// ===== Playback =====

#[test]
fn test_position_follows_the_clock() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 10.0);
    let (pipeline, _) = watched(&sim, "p");

    assert_eq!(pipeline.query_position(), None);
    pipeline.set_uri("file:///a.ogg");
    assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Success);
    assert_eq!(pipeline.query_duration(), Some(ClockTime::from_mseconds(10_000)));

    sim.advance(Duration::from_millis(1500));
    assert_eq!(pipeline.query_position(), Some(ClockTime::from_mseconds(1500)));

    pipeline.set_state(State::Paused);
    sim.advance(Duration::from_secs(2));
    assert_eq!(pipeline.query_position(), Some(ClockTime::from_mseconds(1500)));

    pipeline.set_state(State::Null);
    assert_eq!(pipeline.query_position(), None);
}

#[test]
fn test_preroll_messages() {
    let sim = SimFramework::new();
    sim.add_media_with(
        "http://radio/live",
        SimMedia::stream().with_tags(TagList::new().with("title", TagListValue::Str("x".into()))),
    );
    let (pipeline, seen) = watched(&sim, "p");

    pipeline.set_uri("http://radio/live");
    pipeline.set_state(State::Playing);

    assert_eq!(
        kinds(&seen),
        vec![
            "stream-start",
            "buffering",
            "buffering",
            "tag",
            "state-changed",
            "state-changed"
        ]
    );
    let messages = seen.lock().unwrap().clone();
    assert_eq!(
        messages[5],
        BusMessage::StateChanged {
            source: "p".into(),
            old: State::Null,
            new: State::Playing,
        }
    );
    assert_eq!(pipeline.query_duration(), None);
}

#[test]
fn test_same_state_is_not_recorded() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 10.0);
    let pipeline = sim.create_playbin("p").unwrap();
    pipeline.set_uri("file:///a.ogg");

    pipeline.set_state(State::Playing);
    pipeline.set_state(State::Playing);
    pipeline.set_state(State::Paused);
    pipeline.set_state(State::Null);

    let sim_pipeline = sim.pipeline("p").unwrap();
    assert_eq!(
        sim_pipeline.state_history(),
        vec![State::Playing, State::Paused, State::Null]
    );
}

#[test]
fn test_seek_clamps_and_is_recorded() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 10.0);
    let pipeline = sim.create_playbin("p").unwrap();

    assert!(!pipeline.seek(ClockTime::SECOND));
    pipeline.set_uri("file:///a.ogg");
    pipeline.set_state(State::Paused);
    assert!(pipeline.seek(ClockTime::from_mseconds(4000)));
    assert!(pipeline.seek(ClockTime::from_mseconds(60_000)));

    let sim_pipeline = sim.pipeline("p").unwrap();
    assert_eq!(
        sim_pipeline.seeks(),
        vec![ClockTime::from_mseconds(4000), ClockTime::from_mseconds(10_000)]
    );
}

// ===== End of stream =====

#[test]
fn test_eos_is_posted_once() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 1.0);
    let (pipeline, seen) = watched(&sim, "p");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pipeline.connect_about_to_finish(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    pipeline.set_uri("file:///a.ogg");
    pipeline.set_state(State::Playing);
    sim.advance(Duration::from_millis(900));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sim.advance(Duration::from_secs(2));
    let eos = kinds(&seen).iter().filter(|k| *k == "eos").count();
    assert_eq!(eos, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.query_position(), Some(ClockTime::SECOND));
}

#[test]
fn test_about_to_finish_enables_gapless_switch() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 1.0);
    sim.add_media("file:///b.ogg", 3.0);
    let (pipeline, seen) = watched(&sim, "p");
    let fired_at = Arc::new(Mutex::new(None));
    let fired = Arc::clone(&fired_at);
    let clock = sim.manual_clock();
    pipeline.connect_about_to_finish(Box::new(move |p| {
        *fired.lock().unwrap() = Some(exaile_core::Clock::now(&*clock));
        p.set_uri("file:///b.ogg");
    }));

    pipeline.set_uri("file:///a.ogg");
    pipeline.set_state(State::Playing);
    sim.advance(Duration::from_millis(1500));

    let lead = Duration::from_nanos(ABOUT_TO_FINISH_LEAD.nseconds());
    assert_eq!(
        *fired_at.lock().unwrap(),
        Some(Duration::from_secs(1) - lead)
    );
    assert_eq!(pipeline.uri().as_deref(), Some("file:///b.ogg"));
    assert_eq!(pipeline.query_position(), Some(ClockTime::from_mseconds(500)));

    let sim_pipeline = sim.pipeline("p").unwrap();
    assert_eq!(sim_pipeline.stream_start_count(), 2);
    assert!(!kinds(&seen).contains(&"eos".to_string()));
    assert_eq!(sim_pipeline.state_history(), vec![State::Playing]);
}

// ===== Failures =====

#[test]
fn test_missing_resource_fails_preroll() {
    let sim = SimFramework::new();
    let (pipeline, seen) = watched(&sim, "p");

    pipeline.set_uri("file:///nowhere.ogg");
    assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Failure);
    assert_eq!(pipeline.get_state(Duration::ZERO), (StateChangeReturn::Failure, State::Null));

    let messages = seen.lock().unwrap().clone();
    match &messages[..] {
        [BusMessage::Error {
            source,
            message,
            debug,
        }] => {
            assert_eq!(source, "source");
            assert_eq!(message, "Resource not found.");
            assert!(debug.as_deref().unwrap().contains("GstURIDecodeBin"));
        }
        other => panic!("unexpected messages {:?}", other),
    }
}

#[test]
fn test_missing_plugin_fails_preroll() {
    let sim = SimFramework::new();
    sim.add_media_with(
        "file:///a.wma",
        SimMedia::new(5.0).failing(SimFailure::MissingPlugin {
            description: "WMA decoder".into(),
            detail: "decoder-audio/x-wma".into(),
        }),
    );
    let (pipeline, seen) = watched(&sim, "p");

    pipeline.set_uri("file:///a.wma");
    assert_eq!(pipeline.set_state(State::Paused), StateChangeReturn::Failure);
    assert_eq!(kinds(&seen), vec!["missing-plugin"]);
    assert!(sim.active_pipelines().is_empty());
}

#[test]
fn test_filters_only_change_when_stopped() {
    let sim = SimFramework::new();
    sim.add_media("file:///a.ogg", 5.0);
    let pipeline = sim.create_playbin("p").unwrap();

    let eq = sim.make_filter("equalizer-10bands", "eq").unwrap();
    pipeline.set_audio_filter(vec![eq]).unwrap();
    assert_eq!(
        sim.pipeline("p").unwrap().filters(),
        vec!["equalizer-10bands".to_string()]
    );

    pipeline.set_uri("file:///a.ogg");
    pipeline.set_state(State::Playing);
    assert!(matches!(
        pipeline.set_audio_filter(Vec::new()),
        Err(MediaError::NotPermitted(_))
    ));
}

// ===== Sinks =====

#[test]
fn test_sink_bin_links_one_sink() {
    let sim = SimFramework::new();
    let pipeline = sim.create_playbin("p").unwrap();
    let bin = pipeline.audio_sink_bin();

    let first = sim.make_sink("alsasink", "out-1").unwrap();
    let second = sim.make_sink("pulsesink", "out-2").unwrap();
    bin.add_and_link(&*first).unwrap();
    assert!(matches!(bin.add_and_link(&*second), Err(MediaError::Link(_))));

    bin.unlink_and_remove(&*first);
    bin.add_and_link(&*second).unwrap();

    let sim_bin = sim.pipeline("p").unwrap().sim_sink_bin();
    assert_eq!(sim_bin.linked_sink_names(), vec!["out-2".to_string()]);
    assert_eq!(
        sim_bin.link_log(),
        vec!["link:out-1", "unlink:out-1", "link:out-2"]
    );
    assert!(matches!(
        sim.make_sink("audioconvert", "nope"),
        Err(MediaError::ElementNotFound(_))
    ));
}

#[test]
fn test_custom_sink_pipeline_must_end_in_sink() {
    let sim = SimFramework::new();
    let ok = sim
        .parse_sink_pipeline(&["audioconvert".into(), "alsasink device=hw:1".into()], "custom")
        .unwrap();
    assert_eq!(ok.factory_name(), "alsasink");

    assert!(matches!(
        sim.parse_sink_pipeline(&["audioconvert".into()], "custom"),
        Err(MediaError::Parse(_))
    ));
    assert!(matches!(
        sim.parse_sink_pipeline(&["nosuchthing".into()], "custom"),
        Err(MediaError::ElementNotFound(_))
    ));
}

#[test]
fn test_device_change_notifies() {
    let sim = SimFramework::new();
    let sink = sim.make_sink("pulsesink", "out").unwrap();
    assert!(sink.has_current_device());
    assert!(sink.set_device("speakers"));

    let changes = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&changes);
    sink.connect_current_device_notify(Box::new(move |device| {
        record.lock().unwrap().push(device);
    }));

    assert!(sim.change_current_device("out", Some("headphones")));
    assert!(!sim.change_current_device("missing", None));
    assert_eq!(sink.current_device().as_deref(), Some("headphones"));
    assert_eq!(*changes.lock().unwrap(), vec![Some("headphones".to_string())]);
}

#[test]
fn test_external_volume_change_notifies() {
    let sim = SimFramework::new();
    let pipeline = sim.create_playbin("p").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    pipeline.connect_volume_notify(Box::new(move |v| record.lock().unwrap().push(v)));

    pipeline.set_volume(0.5);
    assert!(seen.lock().unwrap().is_empty());

    sim.pipeline("p").unwrap().external_volume_change(0.25);
    assert_eq!(*seen.lock().unwrap(), vec![0.25]);
    assert_eq!(pipeline.volume(), 0.25);

    pipeline.disconnect_signals();
    sim.pipeline("p").unwrap().external_volume_change(0.75);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

// ===== Diagnostics =====

#[test]
fn test_dump_dot_writes_graph() {
    let dir = tempfile::TempDir::new().unwrap();
    let sim = SimFramework::new();
    let pipeline = sim.create_playbin("p").unwrap();
    let sink = sim.make_sink("alsasink", "out").unwrap();
    pipeline.audio_sink_bin().add_and_link(&*sink).unwrap();

    let path = pipeline.dump_dot(&dir.path().join("logs"), "p-error").unwrap();
    assert_eq!(path.file_name().unwrap(), "p-error.dot");
    let dot = std::fs::read_to_string(path).unwrap();
    assert!(dot.starts_with("digraph pipeline {"));
    assert!(dot.contains("\"out\""));
}
