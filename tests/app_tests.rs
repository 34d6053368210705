//! Replay of frame directories through the application layer

mod test_helpers;

use rdt_reader::app::{list_frames, RdtApp, ReplayOptions};
use rdt_reader::constants::CAPTURE_FILE_NAME;
use std::path::PathBuf;
use test_helpers::*;

fn frame_dir(tag: &str, count: usize) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rdt-app-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let image = textured_image(FRAME_WIDTH, FRAME_HEIGHT);
    for i in 0..count {
        image.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
    dir
}

#[test]
fn test_replay_resolves_and_stores_still() {
    let frames = frame_dir("resolve", 4);
    let output = frames.join("out");
    let mut config = test_config();
    config.capture.output_dir = Some(output.clone());

    let fiducials = centered_fiducials(&config);
    let (orchestrator, _calls) = scripted_orchestrator(&config, vec![raw_boxes(&fiducials, 0.0)], 1);
    let app = RdtApp::new(
        config,
        ReplayOptions {
            frames: frames.clone(),
            rotation_degrees: 0,
        },
    );

    let mut out = Vec::new();
    let summary = app.run_with(orchestrator, &mut out).unwrap();

    let result = summary.result.unwrap();
    assert!(result.control && !result.test_a && !result.test_b);
    assert_eq!(summary.stills_submitted, 1);
    assert!(output.join(CAPTURE_FILE_NAME).exists());

    let text = String::from_utf8(out).unwrap();
    let events: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(events.iter().filter(|e| e["event"] == "still_capture_requested").count(), 1);
    let interpreted = events.iter().find(|e| e["event"] == "interpreted").unwrap();
    assert_eq!(interpreted["control"], true);
    assert!(interpreted["image_uri"].as_str().unwrap().ends_with(CAPTURE_FILE_NAME));

    std::fs::remove_dir_all(&frames).ok();
}

#[test]
fn test_replay_without_strip_has_no_result() {
    let frames = frame_dir("empty", 3);
    let config = test_config();
    let (orchestrator, calls) = scripted_orchestrator(&config, vec![Default::default()], 1);
    let app = RdtApp::new(
        config,
        ReplayOptions {
            frames: frames.clone(),
            rotation_degrees: 0,
        },
    );

    let mut out = Vec::new();
    let summary = app.run_with(orchestrator, &mut out).unwrap();
    assert!(summary.result.is_none());
    assert_eq!(summary.frames_read, 3);
    assert_eq!(summary.stills_submitted, 0);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    std::fs::remove_dir_all(&frames).ok();
}

#[test]
fn test_list_frames_sorted_and_filtered() {
    let frames = frame_dir("list", 3);
    std::fs::write(frames.join("readme.md"), "not a frame").unwrap();
    let listed = list_frames(&frames).unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0] < w[1]));
    std::fs::remove_dir_all(&frames).ok();
}

#[test]
fn test_missing_directory_is_an_error() {
    assert!(list_frames("/nonexistent/rdt-frames").is_err());
}
