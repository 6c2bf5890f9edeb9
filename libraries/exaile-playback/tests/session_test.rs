//! Session save and restore across player instances

mod common;

use common::{approx, Harness};
use exaile_core::{SettingsManager, TagValue};
use exaile_playback::{PlaybackError, PlayerState, SessionState};
use tempfile::TempDir;

#[test]
fn test_resume_playing_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("player.json");

    let mut first = Harness::new();
    let a = first.media("a.flac", 60.0);
    first.set_playlist(&[a]);
    assert!(first.player.play_queue(None));
    first.run_ms(12_000);
    first.player.save_session(&path).unwrap();

    let saved = SessionState::load(&path).unwrap();
    assert_eq!(saved.state, PlayerState::Playing);
    assert!(approx(saved.playtime_stamp, 12.0, 0.01));

    // a new process with the same playlist
    let mut second = Harness::new();
    let a = second.media("a.flac", 60.0);
    second.set_playlist(&[a.clone()]);
    assert!(second.player.restore_session(&path).unwrap());
    second.pump();

    assert_eq!(second.player.current(), Some(a.clone()));
    assert!(second.player.is_playing());
    assert!(approx(second.player.get_time(), 12.0, 0.01));
    assert!(approx(second.player.get_volume(), 100.0, 1e-9));
    assert!(approx(second.applied_volume(&a).unwrap(), 1.0, 1e-9));

    // play time from before the restart is kept
    second.run_ms(3000);
    second.player.stop();
    assert_eq!(a.get_tag_raw("__playtime"), Some(TagValue::Number(15.0)));
}

#[test]
fn test_resume_paused_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("player.json");

    let mut first = Harness::new();
    let a = first.media("a.flac", 60.0);
    first.set_playlist(&[a]);
    first.player.play_queue(None);
    first.run_ms(5000);
    first.player.pause();
    first.player.save_session(&path).unwrap();

    let mut second = Harness::new();
    let a = second.media("a.flac", 60.0);
    second.set_playlist(&[a]);
    assert!(second.player.restore_session(&path).unwrap());
    second.pump();

    assert!(second.player.is_paused());
    assert!(approx(second.player.get_time(), 5.0, 0.01));
}

#[test]
fn test_resume_paused_setting() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("player.json");
    SessionState {
        state: PlayerState::Playing,
        position_ns: 3_000_000_000,
        playtime_stamp: 0.0,
    }
    .save(&path)
    .unwrap();

    let settings = SettingsManager::new();
    settings.set_option("player/resume_paused", true).unwrap();
    let mut h = Harness::with_settings(settings);
    let a = h.media("a.flac", 60.0);
    h.set_playlist(&[a]);

    assert!(h.player.restore_session(&path).unwrap());
    h.pump();
    assert!(h.player.is_paused());
    assert!(approx(h.player.get_time(), 3.0, 0.01));
}

#[test]
fn test_resume_disabled_or_stopped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("player.json");
    SessionState::default().save(&path).unwrap();

    let mut h = Harness::new();
    let a = h.media("a.flac", 60.0);
    h.set_playlist(&[a]);
    assert!(!h.player.restore_session(&path).unwrap());
    assert!(h.player.is_stopped());

    SessionState {
        state: PlayerState::Playing,
        ..SessionState::default()
    }
    .save(&path)
    .unwrap();
    h.settings
        .set_option("player/resume_playback", false)
        .unwrap();
    assert!(!h.player.restore_session(&path).unwrap());
    assert!(h.player.is_stopped());
}

#[test]
fn test_restore_without_saved_session() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::new();
    assert!(matches!(
        h.player.restore_session(dir.path().join("missing.json")),
        Err(PlaybackError::Io(_))
    ));
}
