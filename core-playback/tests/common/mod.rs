//! Fakes shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::catalog::{ArtworkImage, StorageResolution, TrackCatalog, TrackFileInfo};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStreamResponse};
use bridge_traits::storage::{KeyUnwrapper, MemoryTrackInfoStore};
use bytes::Bytes;
use core_playback::cipher::{BlockCipherStream, TrackKey};
use core_playback::loader::TrackLoader;
use core_playback::storage::StorageDirs;
use core_playback::traits::{TrackEvent, TrackEventKind, TrackEventSink};
use core_playback::track::TrackDescriptor;
use core_playback::StreamingConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SAMPLE_RATE: u32 = 8_000;
pub const HEADER_LENGTH: usize = 167;
/// Base64 of sixteen 0x42 bytes; the fake unwrapper returns it unchanged.
pub const WRAPPED_KEY: &str = "QkJCQkJCQkJCQkJCQkJCQg==";

pub fn key() -> TrackKey {
    TrackKey::from_bytes(vec![0x42; 16]).unwrap()
}

pub fn config() -> StreamingConfig {
    StreamingConfig {
        frames_per_buffer: 4_096,
        ..StreamingConfig::default()
    }
}

/// 16-bit mono PCM WAV.
pub fn wav(frames: usize) -> Vec<u8> {
    let data_len = (frames * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let sample = ((i % 80) as i16 - 40) * 300;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// An encrypted track file holding `frames` frames of audio.
pub fn encrypted_track(frames: usize) -> Vec<u8> {
    let mut clear = vec![0xEEu8; HEADER_LENGTH];
    clear.extend_from_slice(&wav(frames));
    BlockCipherStream::new(&key()).unwrap().decrypt(&clear).unwrap()
}

pub fn file_id(track_id: &str) -> String {
    format!("file-{}", track_id)
}

pub fn descriptor(id: &str) -> TrackDescriptor {
    TrackDescriptor {
        id: id.to_string(),
        name: format!("Song {}", id),
        artists: vec!["Artist".to_string()],
        album: Some("Album".to_string()),
        album_artists: vec![],
        duration_ms: 2_500,
        is_local: false,
    }
}

// ============================================================================
// Bridges
// ============================================================================

#[derive(Default)]
pub struct FakeCatalog {
    /// Number of upcoming `track_file_info` calls that fail.
    pub failing_lookups: AtomicUsize,
    pub lookups: AtomicUsize,
}

#[async_trait]
impl TrackCatalog for FakeCatalog {
    async fn track_file_info(&self, track_id: &str) -> BridgeResult<TrackFileInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_lookups.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lookups.store(failing - 1, Ordering::SeqCst);
            return Err(BridgeError::OperationFailed("catalog offline".to_string()));
        }
        Ok(TrackFileInfo::new(track_id, file_id(track_id), WRAPPED_KEY))
    }

    async fn resolve_storage(&self, file_id: &str) -> BridgeResult<StorageResolution> {
        Ok(StorageResolution {
            urls: vec![format!("https://cdn.test/{}", file_id)],
        })
    }

    async fn artwork(&self, _track_id: &str, _width: u32) -> BridgeResult<Option<ArtworkImage>> {
        Ok(None)
    }
}

pub struct IdentityUnwrapper;

/// Hands back a key too short for AES and counts how often it is asked.
#[derive(Default)]
pub struct TruncatingUnwrapper {
    pub calls: AtomicUsize,
}

#[async_trait]
impl KeyUnwrapper for TruncatingUnwrapper {
    async fn unwrap_track_key(&self, wrapped: &[u8]) -> BridgeResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(wrapped[..8].to_vec())
    }
}

#[async_trait]
impl KeyUnwrapper for IdentityUnwrapper {
    async fn unwrap_track_key(&self, wrapped: &[u8]) -> BridgeResult<Vec<u8>> {
        Ok(wrapped.to_vec())
    }
}

/// How the fake CDN answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Serve,
    /// Deliver this many bytes, then reset the connection.
    DropAfter(usize),
}

/// Serves one body per file id with `Range` support.
pub struct FakeCdn {
    files: HashMap<String, Vec<u8>>,
    chunk_size: usize,
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl FakeCdn {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            files: HashMap::new(),
            chunk_size,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_file(mut self, file_id: String, body: Vec<u8>) -> Self {
        self.files.insert(file_id, body);
        self
    }

    /// Replies for the next requests; later requests are served normally.
    pub fn with_replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.replies.lock().extend(replies);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn range_headers(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.headers.get("Range").cloned())
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeCdn {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("buffered requests".to_string()))
    }

    async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
        self.requests.lock().push(request.clone());
        let reply = self.replies.lock().pop_front().unwrap_or(Reply::Serve);

        let file_id = request.url.rsplit('/').next().unwrap_or_default();
        let body = self
            .files
            .get(file_id)
            .ok_or_else(|| BridgeError::HttpStatus {
                status: 404,
                message: file_id.to_string(),
            })?;

        let offset = request
            .headers
            .get("Range")
            .and_then(|range| range.strip_prefix("bytes="))
            .and_then(|range| range.trim_end_matches('-').parse::<usize>().ok())
            .unwrap_or(0);
        let remaining = body[offset..].to_vec();

        let delivered = match reply {
            Reply::Serve => remaining.len(),
            Reply::DropAfter(bytes) => bytes.min(remaining.len()),
        };
        let mut chunks: Vec<BridgeResult<Bytes>> = remaining[..delivered]
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Reply::DropAfter(_) = reply {
            chunks.push(Err(BridgeError::OperationFailed(
                "connection reset".to_string(),
            )));
        }

        Ok(HttpStreamResponse {
            status: if offset > 0 { 206 } else { 200 },
            headers: HashMap::new(),
            content_length: Some(remaining.len() as u64),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Fixture {
    pub root: tempfile::TempDir,
    pub catalog: Arc<FakeCatalog>,
    pub cdn: Arc<FakeCdn>,
    pub store: Arc<MemoryTrackInfoStore>,
    pub loader: Arc<TrackLoader>,
}

impl Fixture {
    pub fn new(cdn: FakeCdn) -> Self {
        Self::with_unwrapper(cdn, Arc::new(IdentityUnwrapper))
    }

    pub fn with_unwrapper(cdn: FakeCdn, unwrapper: Arc<dyn KeyUnwrapper>) -> Self {
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FakeCatalog::default());
        let cdn = Arc::new(cdn);
        let store = Arc::new(MemoryTrackInfoStore::new());
        let loader = Arc::new(TrackLoader::new(
            catalog.clone(),
            cdn.clone(),
            unwrapper,
            store.clone(),
            StorageDirs::new(root.path().join("downloads"), root.path().join("streaming")),
        ));
        Self {
            root,
            catalog,
            cdn,
            store,
            loader,
        }
    }

    pub fn storage(&self) -> &StorageDirs {
        self.loader.storage()
    }
}

/// Sink that forwards track events to a channel.
pub fn event_sink() -> (TrackEventSink, mpsc::UnboundedReceiver<TrackEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = TrackEventSink::new(move |event| {
        tx.send(event).ok();
    });
    (sink, rx)
}

/// Wait for the first event matching `predicate`.
pub async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<TrackEvent>, predicate: F) -> TrackEvent
where
    F: Fn(&TrackEventKind) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event sink closed");
            if predicate(&event.kind) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for track event")
}

pub fn is_buffered(kind: &TrackEventKind) -> bool {
    matches!(kind, TrackEventKind::DidFinishBuffering)
}

pub fn is_settled(kind: &TrackEventKind) -> bool {
    matches!(
        kind,
        TrackEventKind::DidFinishBuffering | TrackEventKind::EncounteredUnrecoverableError { .. }
    )
}
