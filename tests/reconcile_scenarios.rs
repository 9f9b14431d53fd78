//! End-to-end reconciliation scenarios against in-memory backends.

mod common;

use camwarden::device::{DeviceEvent, Fingerprint};
use camwarden::hardware::{Encoder, HardwareProbe};
use camwarden::reconciler::Reconciler;
use camwarden::registration_sync::WebcamRegistration;
use camwarden::settings_store::SettingsStore;
use camwarden::transcode::{command_hash, synthesize};
use common::{appeared, logitech_fingerprint, FakeOrchestrator, FakeStreamServer};
use std::sync::Arc;
use std::time::Duration;

const RTSP_BASE: &str = "rtsp://127.0.0.1:8554";

struct Harness {
    store: SettingsStore,
    stream: Arc<FakeStreamServer>,
    orchestrator: Arc<FakeOrchestrator>,
    reconciler: Reconciler,
    events: tokio::sync::mpsc::Sender<DeviceEvent>,
}

async fn harness(score: u8) -> Harness {
    let store = SettingsStore::open_in_memory().await.unwrap();
    harness_with_store(store, score).await
}

async fn harness_with_store(store: SettingsStore, score: u8) -> Harness {
    let stream = FakeStreamServer::new();
    let orchestrator = FakeOrchestrator::new();

    let (reconciler, _handle, events, _health) = Reconciler::new(
        store.clone(),
        HardwareProbe::fixed(score),
        stream.clone(),
        orchestrator.clone(),
        RTSP_BASE.to_string(),
    );

    Harness {
        store,
        stream,
        orchestrator,
        reconciler,
        events,
    }
}

/// S1 - first plug-in of a new camera on a score-10 host.
#[tokio::test]
async fn s1_first_plug_in() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    let report = h.reconciler.tick().await;
    assert!(report.sync_errors.is_empty());

    // Record created with tier-10 defaults
    let record = h.store.get(&uid).await.unwrap().unwrap();
    assert_eq!(record.format, "mjpeg");
    assert_eq!(record.resolution, "1280x720");
    assert_eq!(record.framerate, 30);
    assert_eq!(record.bitrate, "4M");
    assert_eq!(record.encoder, Encoder::Software);
    assert!(record.connected);
    assert_eq!(record.device_path.as_deref(), Some("/dev/video0"));

    // One stream path with the synthesized command
    assert_eq!(h.stream.path_names(), vec![uid.clone()]);
    assert_eq!(
        h.stream.command_of(&uid).unwrap(),
        synthesize(&record, RTSP_BASE)
    );

    // One webcam registration pointing at the local streaming server
    let webcam = h.orchestrator.webcam(&uid).unwrap();
    assert_eq!(webcam.stream_url, format!("http://127.0.0.1:8889/{uid}/"));
    assert_eq!(webcam.service, "webrtc-mediamtx");
    assert_eq!(webcam.name, "USB Webcam");
}

/// Idempotence: a second tick with unchanged inputs issues zero operations.
#[tokio::test]
async fn second_tick_is_idempotent() {
    let mut h = harness(10).await;
    h.events
        .send(appeared(logitech_fingerprint(), "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    let stream_ops = h.stream.ops();
    let registry_ops = h.orchestrator.ops();

    let report = h.reconciler.tick().await;
    assert_eq!(report.stream_ops, 0);
    assert_eq!(report.registry_ops, 0);
    assert_eq!(h.stream.ops(), stream_ops);
    assert_eq!(h.orchestrator.ops(), registry_ops);
}

/// S2 - unplug and replug of the same device within one tick window.
#[tokio::test]
async fn s2_unplug_replug_same_device() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint.clone(), "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    // Disappear alone: connected toggles false
    h.events
        .send(DeviceEvent::Disappeared { uid: uid.clone() })
        .await
        .unwrap();
    // Replug before the tick fires; both events coalesce
    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();

    let deletes_before = h.stream.deletes();
    h.reconciler.tick().await;

    let record = h.store.get(&uid).await.unwrap().unwrap();
    assert!(record.connected);

    // Same UID, identical command hash: nothing was torn down
    let cameras = h.store.list().await.unwrap();
    assert_eq!(cameras.len(), 1);
    assert_eq!(h.stream.deletes(), deletes_before);
    assert_eq!(h.stream.path_names(), vec![uid.clone()]);
    assert!(h.orchestrator.webcam(&uid).is_some());
}

/// S3 - administrator overrides survive a process restart.
#[tokio::test]
async fn s3_overrides_persist_across_restart() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint.clone(), "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    // Administrator lowers the profile
    let mut record = h.store.get(&uid).await.unwrap().unwrap();
    record.resolution = "640x480".to_string();
    record.framerate = 30;
    record.bitrate = "1M".to_string();
    h.store.upsert(&record).await.unwrap();

    // Restart: new reconciler over the same store and the same backends
    h.store.mark_all_disconnected().await.unwrap();
    let stream = h.stream.clone();
    let orchestrator = h.orchestrator.clone();
    let (mut reconciler, _handle, events, _health) = Reconciler::new(
        h.store.clone(),
        HardwareProbe::fixed(10),
        stream.clone(),
        orchestrator,
        RTSP_BASE.to_string(),
    );

    events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    reconciler.tick().await;

    let record = h.store.get(&uid).await.unwrap().unwrap();
    assert_eq!(record.resolution, "640x480");

    let command = stream.command_of(&uid).unwrap();
    assert_eq!(
        command_hash(&command),
        command_hash(&synthesize(&record, RTSP_BASE))
    );
    assert!(command.contains("-video_size 640x480"));
    assert!(command.contains("-b:v 1M"));

    // No spurious replace afterwards
    let ops_before = stream.ops();
    let report = reconciler.tick().await;
    assert_eq!(report.stream_ops, 0);
    assert_eq!(stream.ops(), ops_before);
}

/// S4 - disabling a camera removes its path and registration but keeps
/// the record.
#[tokio::test]
async fn s4_disable_camera() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    let mut record = h.store.get(&uid).await.unwrap().unwrap();
    record.enabled = false;
    h.store.upsert(&record).await.unwrap();

    let deletes_before = h.stream.deletes();
    h.reconciler.tick().await;

    assert_eq!(h.stream.deletes(), deletes_before + 1);
    assert!(h.stream.path_names().is_empty());
    assert!(h.orchestrator.webcam(&uid).is_none());

    let record = h.store.get(&uid).await.unwrap().unwrap();
    assert!(!record.enabled);
}

/// S5 - two identical cameras without serials on different ports.
#[tokio::test]
async fn s5_two_identical_cameras() {
    let mut h = harness(10).await;

    let first = Fingerprint::new("046d", "0825", None, "usb-1-1");
    let second = Fingerprint::new("046d", "0825", None, "usb-1-2");
    assert_ne!(first.uid(), second.uid());

    h.events.send(appeared(first.clone(), "/dev/video0")).await.unwrap();
    h.events.send(appeared(second.clone(), "/dev/video2")).await.unwrap();
    h.reconciler.tick().await;

    let cameras = h.store.list().await.unwrap();
    assert_eq!(cameras.len(), 2);

    let mut expected = vec![first.uid(), second.uid()];
    expected.sort();
    assert_eq!(h.stream.path_names(), expected);
    let mut registered = h.orchestrator.uids();
    registered.sort();
    assert_eq!(registered, expected);
}

/// S6 - streaming server down: stream ops skipped, registration sync still
/// runs, errors reported, next tick recovers.
#[tokio::test(start_paused = true)]
async fn s6_stream_server_down() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.stream.set_healthy(false);
    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();

    let report = h.reconciler.tick().await;

    // No stream ops were issued, but the webcam registration went through
    assert_eq!(h.stream.ops(), 0);
    assert!(h.stream.path_names().is_empty());
    assert!(h.orchestrator.webcam(&uid).is_some());

    assert!(report
        .sync_errors
        .iter()
        .any(|error| error.kind == "unreachable"));

    // Server comes back; the per-UID backoff has elapsed by the next tick
    h.stream.set_healthy(true);
    tokio::time::advance(Duration::from_secs(2)).await;

    let report = h.reconciler.tick().await;
    assert_eq!(report.stream_ops, 1);
    assert_eq!(h.stream.path_names(), vec![uid]);
}

/// Convergence: from an arbitrary observed state, owned paths match the
/// desired set after at most two successful ticks; foreign objects survive.
#[tokio::test]
async fn converges_from_arbitrary_state_and_preserves_foreign_objects() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    // Stale owned path, drifted command for the live camera, and operator
    // paths that are none of our business
    h.stream.insert_path("feedbeef0123", "ffmpeg stale");
    h.stream.insert_path(&uid, "ffmpeg drifted");
    h.stream.insert_path("front-door", "ffmpeg operator");
    h.orchestrator.insert_webcam(WebcamRegistration {
        uid: "nozzle-cam".to_string(),
        name: "Nozzle".to_string(),
        stream_url: "http://elsewhere/stream".to_string(),
        snapshot_url: "http://elsewhere/snap.jpg".to_string(),
        service: "mjpegstreamer".to_string(),
    });
    h.orchestrator.insert_webcam(WebcamRegistration {
        uid: "feedbeef0123".to_string(),
        name: "Gone".to_string(),
        stream_url: "http://127.0.0.1:8889/feedbeef0123/".to_string(),
        snapshot_url: "http://127.0.0.1/cameras/snapshot/feedbeef0123.jpg".to_string(),
        service: "webrtc-mediamtx".to_string(),
    });

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;
    h.reconciler.tick().await;

    let record = h.store.get(&uid).await.unwrap().unwrap();
    let mut paths = h.stream.path_names();
    paths.sort();
    assert_eq!(paths, vec!["front-door".to_string(), uid.clone()]);
    assert_eq!(
        h.stream.command_of(&uid).unwrap(),
        synthesize(&record, RTSP_BASE)
    );

    let mut webcams = h.orchestrator.uids();
    webcams.sort();
    assert_eq!(webcams, vec!["nozzle-cam".to_string(), uid.clone()]);

    // Third tick is a no-op
    let report = h.reconciler.tick().await;
    assert_eq!(report.stream_ops + report.registry_ops, 0);
}

/// A camera with moonraker_enabled=false streams but is not registered.
#[tokio::test]
async fn moonraker_disabled_camera_still_streams() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    let mut record = h.store.get(&uid).await.unwrap().unwrap();
    record.moonraker_enabled = false;
    h.store.upsert(&record).await.unwrap();
    h.reconciler.tick().await;

    assert_eq!(h.stream.path_names(), vec![uid.clone()]);
    assert!(h.orchestrator.webcam(&uid).is_none());
}

/// Renaming a camera patches the registration in place instead of
/// recreating it.
#[tokio::test]
async fn rename_patches_registration_in_place() {
    let mut h = harness(10).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    let mut record = h.store.get(&uid).await.unwrap().unwrap();
    record.friendly_name = "Bed Camera".to_string();
    h.store.upsert(&record).await.unwrap();

    let deletes_before = h.orchestrator.ops();
    h.reconciler.tick().await;

    let webcam = h.orchestrator.webcam(&uid).unwrap();
    assert_eq!(webcam.name, "Bed Camera");
    // Exactly one op (the rename), no delete+create churn
    assert_eq!(h.orchestrator.ops(), deletes_before + 1);
}

/// Lower-tier host: tier defaults land in the created record.
#[tokio::test]
async fn low_score_host_gets_conservative_profile() {
    let mut h = harness(4).await;
    let fingerprint = logitech_fingerprint();
    let uid = fingerprint.uid();

    h.events
        .send(appeared(fingerprint, "/dev/video0"))
        .await
        .unwrap();
    h.reconciler.tick().await;

    let record = h.store.get(&uid).await.unwrap().unwrap();
    assert_eq!(record.resolution, "640x480");
    // 640x480 only advertises 30 fps, above the tier target of 15, so the
    // smallest advertised rate is taken
    assert_eq!(record.framerate, 30);
    assert_eq!(record.bitrate, "1M");
}
