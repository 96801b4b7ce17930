//! Streaming tracks and the playback service against fake bridges.

mod common;

use bridge_traits::catalog::TrackFileInfo;
use bridge_traits::storage::{StorageClass, TrackInfoStore};
use common::*;
use core_playback::service::PlaybackService;
use core_playback::track::{StreamingTrack, TrackPhase};
use core_playback::traits::{
    AudioTrack, ReadStatus, TrackEventKind, TrackEventSink, TrackReadError,
};
use core_runtime::events::{CoreEvent, EventBus, StreamingEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

const FRAMES: usize = 20_000;

fn track(fixture: &Fixture, id: &str, events: Option<EventBus>) -> Arc<StreamingTrack> {
    StreamingTrack::new(
        descriptor(id),
        fixture.loader.clone(),
        config(),
        Handle::current(),
        events,
    )
}

fn cdn_for(id: &str) -> FakeCdn {
    FakeCdn::new(4_096).with_file(file_id(id), encrypted_track(FRAMES))
}

/// Read until end of track, returning the number of decoded frames.
fn drain(track: &StreamingTrack) -> usize {
    let mut frames = 0;
    for _ in 0..1_000 {
        let read = track.read().expect("read failed");
        if let Some(buffer) = &read.buffer {
            frames += buffer.frames();
        }
        if read.status == ReadStatus::Eof {
            return frames;
        }
    }
    panic!("track never reached the end");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streams_decrypts_and_decodes_whole_track() {
    let fixture = Fixture::new(cdn_for("t1"));
    let bus = EventBus::new(64);
    let mut bus_events = bus.subscribe();

    let track = track(&fixture, "t1", Some(bus));
    let (sink, mut events) = event_sink();
    track.configure(sink);

    assert!(matches!(track.read(), Err(TrackReadError::Buffering)));
    track.prepare();
    wait_for(&mut events, is_buffered).await;

    assert_eq!(track.phase(), TrackPhase::Ready);
    assert_eq!(track.retries(), 0);
    assert_eq!(fixture.cdn.range_headers(), vec![None]);

    let finalized = fixture
        .storage()
        .dir(StorageClass::Temporary)
        .join(file_id("t1"));
    assert!(finalized.is_file());

    assert_eq!(drain(&track), FRAMES);

    let mut finished = false;
    let mut finalized_length = None;
    while let Ok(event) = bus_events.try_recv() {
        match event {
            CoreEvent::Streaming(StreamingEvent::LoadFinished { .. }) => finished = true,
            CoreEvent::Streaming(StreamingEvent::FileFinalized { length, .. }) => {
                finalized_length = Some(length)
            }
            _ => {}
        }
    }
    assert!(finished);
    assert_eq!(
        finalized_length,
        Some(encrypted_track(FRAMES).len() as u64)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resumes_download_after_connection_reset() {
    let fixture = Fixture::new(cdn_for("t1").with_replies([Reply::DropAfter(30_000)]));
    let bus = EventBus::new(64);
    let mut bus_events = bus.subscribe();

    let track = track(&fixture, "t1", Some(bus));
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();

    let settled = wait_for(&mut events, is_settled).await;
    assert_eq!(settled.kind, TrackEventKind::DidFinishBuffering);
    assert_eq!(track.retries(), 1);
    assert_eq!(
        fixture.cdn.range_headers(),
        vec![None, Some("bytes=30000-".to_string())]
    );
    assert_eq!(drain(&track), FRAMES);

    let mut retried = false;
    while let Ok(event) = bus_events.try_recv() {
        if let CoreEvent::Streaming(StreamingEvent::LoadFailed { will_retry, .. }) = event {
            retried = will_retry;
        }
    }
    assert!(retried);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_failure_is_unrecoverable() {
    let fixture = Fixture::new(
        cdn_for("t1").with_replies([Reply::DropAfter(10_000), Reply::DropAfter(5_000)]),
    );
    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();

    let settled = wait_for(&mut events, is_settled).await;
    let TrackEventKind::EncounteredUnrecoverableError { message } = settled.kind else {
        panic!("expected an unrecoverable error, got {:?}", settled.kind);
    };
    assert!(message.contains("\"Song t1\""));
    assert!(message.contains("Unable to stream audio file"));
    assert_eq!(track.phase(), TrackPhase::Failed);
    assert_eq!(fixture.cdn.request_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prepare_and_load_share_one_retry() {
    let fixture = Fixture::new(cdn_for("t1").with_replies([Reply::DropAfter(10_000)]));
    fixture.catalog.failing_lookups.store(1, Ordering::SeqCst);

    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();

    let settled = wait_for(&mut events, is_settled).await;
    assert!(matches!(
        settled.kind,
        TrackEventKind::EncounteredUnrecoverableError { .. }
    ));
    assert_eq!(fixture.catalog.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.cdn.request_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prepare_failure_is_retried() {
    let fixture = Fixture::new(cdn_for("t1"));
    fixture.catalog.failing_lookups.store(1, Ordering::SeqCst);

    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();

    let settled = wait_for(&mut events, is_settled).await;
    assert_eq!(settled.kind, TrackEventKind::DidFinishBuffering);
    assert_eq!(track.retries(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_key_fails_without_retry() {
    let unwrapper = Arc::new(TruncatingUnwrapper::default());
    let fixture = Fixture::with_unwrapper(cdn_for("t1"), unwrapper.clone());
    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();

    let settled = wait_for(&mut events, is_settled).await;
    let TrackEventKind::EncounteredUnrecoverableError { message } = settled.kind else {
        panic!("expected an unrecoverable error, got {:?}", settled.kind);
    };
    assert!(message.contains("Unable to prepare audio file"));
    assert_eq!(unwrapper.calls.load(Ordering::SeqCst), 1);
    assert_eq!(track.retries(), 0);
    assert_eq!(track.phase(), TrackPhase::Failed);
    assert_eq!(fixture.cdn.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_during_load_drops_completion() {
    let fixture = Fixture::new(cdn_for("t1"));
    let track = track(&fixture, "t1", None);
    let chunks = encrypted_track(FRAMES).len().div_ceil(4_096);

    // Release the track from its own event as the last chunk lands.
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let weak = Arc::downgrade(&track);
    let received = AtomicUsize::new(0);
    track.configure(TrackEventSink::new(move |event| {
        if event.kind == TrackEventKind::HaveAdditionalContent
            && received.fetch_add(1, Ordering::SeqCst) + 1 == chunks
        {
            if let Some(track) = weak.upgrade() {
                track.did_finish_playback();
            }
        }
        tx.send(event).ok();
    }));
    track.prepare();

    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while track.phase() != TrackPhase::Finished {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("track was never released");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert_eq!(track.phase(), TrackPhase::Finished);
    assert!(track.file().is_none());
    while let Ok(event) = events.try_recv() {
        assert!(!is_settled(&event.kind), "stale completion: {:?}", event.kind);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalized_file_is_played_without_network() {
    let fixture = Fixture::new(cdn_for("t1"));
    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);

    track.prepare();
    wait_for(&mut events, is_buffered).await;
    track.did_finish_playback();
    assert_eq!(track.phase(), TrackPhase::Finished);
    assert!(track.file().is_none());

    track.prepare();
    wait_for(&mut events, is_buffered).await;
    assert_eq!(fixture.cdn.request_count(), 1);
    assert!(track.file().map(|file| file.is_complete()).unwrap_or(false));
    assert_eq!(drain(&track), FRAMES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_rewinds_decoder() {
    let fixture = Fixture::new(cdn_for("t1"));
    let track = track(&fixture, "t1", None);
    let (sink, mut events) = event_sink();
    track.configure(sink);
    track.prepare();
    wait_for(&mut events, is_buffered).await;

    assert_eq!(drain(&track), FRAMES);
    track.seek_to(std::time::Duration::ZERO);
    assert_eq!(drain(&track), FRAMES);
}

// ============================================================================
// PlaybackService
// ============================================================================

fn service(fixture: &Fixture) -> PlaybackService {
    PlaybackService::with_loader(fixture.loader.clone(), config(), Handle::current()).unwrap()
}

#[tokio::test]
async fn test_service_reuses_track_instances() {
    let fixture = Fixture::new(cdn_for("t1"));
    let service = service(&fixture);

    let first = service.audio_track(descriptor("t1"), false).await.unwrap().unwrap();
    let again = service.audio_track(descriptor("t1"), false).await.unwrap().unwrap();
    let other = service.audio_track(descriptor("t2"), false).await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(service.cached_tracks(), 2);
}

#[tokio::test]
async fn test_service_skips_local_tracks() {
    let fixture = Fixture::new(cdn_for("t1"));
    let service = service(&fixture);

    let mut local = descriptor("t1");
    local.is_local = true;
    assert!(service.audio_track(local, false).await.unwrap().is_none());
    assert_eq!(service.cached_tracks(), 0);
}

#[tokio::test]
async fn test_offline_mode_requires_downloaded_file() {
    let fixture = Fixture::new(cdn_for("t1"));
    let service = service(&fixture);

    assert!(service.audio_track(descriptor("t1"), true).await.unwrap().is_none());

    fixture
        .store
        .save_track_info(
            StorageClass::Download,
            TrackFileInfo::new("t1", file_id("t1"), WRAPPED_KEY),
        )
        .await
        .unwrap();
    // Descriptor alone is not enough
    assert!(service.audio_track(descriptor("t1"), true).await.unwrap().is_none());

    let dir = fixture.storage().dir(StorageClass::Download).to_path_buf();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file_id("t1")), encrypted_track(100)).unwrap();
    assert!(service.audio_track(descriptor("t1"), true).await.unwrap().is_some());
}

#[tokio::test]
async fn test_service_rejects_invalid_config() {
    let fixture = Fixture::new(cdn_for("t1"));
    let mut invalid = config();
    invalid.frames_per_buffer = 0;

    assert!(PlaybackService::with_loader(fixture.loader.clone(), invalid, Handle::current()).is_err());
}
