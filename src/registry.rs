//! Live stream registry
//!
//! The registry routes media from one publisher per stream path to any
//! number of subscribers. A publisher declares each track exactly once
//! (present with a descriptor, or absent) and then pushes packets; a
//! subscriber performs an async rendezvous on the track declarations and
//! receives packets over per-track broadcast channels. Dropping either
//! handle releases its side: the publisher's drop closes the stream, the
//! subscriber's drop leaves it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::error::{HdlError, Result};
use crate::track::{AudioTrack, MediaPacket, VideoTrack};

/// Packets buffered per track channel before slow subscribers lag
const PACKET_CHANNEL_CAPACITY: usize = 256;

/// Resolution state of one track declaration
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TrackSlot<T> {
    /// Not yet declared; subscribers suspend on this state
    #[default]
    Pending,
    /// The stream has no such track
    Absent,
    /// Declared and ready
    Ready(T),
}

impl<T: Clone> TrackSlot<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, TrackSlot::Pending)
    }

    pub fn to_option(&self) -> Option<T> {
        match self {
            TrackSlot::Ready(t) => Some(t.clone()),
            _ => None,
        }
    }
}

/// Current track declarations for a stream
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub video: TrackSlot<VideoTrack>,
    pub audio: TrackSlot<AudioTrack>,
}

struct StreamEntry {
    path: String,
    /// Source URL when this stream is a pulled relay
    pull_source: Option<String>,
    tracks: watch::Sender<TrackInfo>,
    /// Senders live behind a lock so closing the stream can drop them,
    /// which in turn closes every subscriber's receiver.
    video_tx: Mutex<Option<broadcast::Sender<MediaPacket>>>,
    audio_tx: Mutex<Option<broadcast::Sender<MediaPacket>>>,
    subscriber_count: AtomicUsize,
}

impl StreamEntry {
    fn close(&self) {
        // Unblock any subscriber still waiting on a pending rendezvous.
        self.tracks.send_modify(|t| {
            if t.video.is_pending() {
                t.video = TrackSlot::Absent;
            }
            if t.audio.is_pending() {
                t.audio = TrackSlot::Absent;
            }
        });
        self.video_tx.lock().take();
        self.audio_tx.lock().take();
    }
}

/// Snapshot of one pulled relay stream, as reported by the list endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledStream {
    pub stream_path: String,
    pub source: String,
    pub subscribers: usize,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Central registry of active streams. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<String, Arc<StreamEntry>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher for `path`.
    ///
    /// Fails when the path already has an active publisher. `pull_source`
    /// marks the stream as a pulled relay for the control plane.
    pub fn publish(&self, path: &str, pull_source: Option<String>) -> Result<Publisher> {
        use dashmap::mapref::entry::Entry;

        let (video_tx, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        let (audio_tx, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        let entry = Arc::new(StreamEntry {
            path: path.to_string(),
            pull_source,
            tracks: watch::Sender::new(TrackInfo::default()),
            video_tx: Mutex::new(Some(video_tx)),
            audio_tx: Mutex::new(Some(audio_tx)),
            subscriber_count: AtomicUsize::new(0),
        });

        match self.streams.entry(path.to_string()) {
            Entry::Occupied(_) => Err(HdlError::StreamAlreadyPublishing(path.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                tracing::info!(stream = %path, "publisher registered");
                Ok(Publisher {
                    registry: self.clone(),
                    entry,
                })
            }
        }
    }

    /// Subscribe to the stream at `path`
    pub fn subscribe(&self, path: &str) -> Result<Subscriber> {
        let entry = self
            .streams
            .get(path)
            .map(|e| e.value().clone())
            .ok_or_else(|| HdlError::StreamNotFound(path.to_string()))?;

        entry.subscriber_count.fetch_add(1, Ordering::Relaxed);
        let tracks = entry.tracks.subscribe();
        let id = Uuid::new_v4().to_string();
        tracing::debug!(stream = %path, subscriber = %id, "subscriber added");
        Ok(Subscriber { id, entry, tracks })
    }

    /// Whether `path` currently has a publisher
    pub fn contains(&self, path: &str) -> bool {
        self.streams.contains_key(path)
    }

    /// Snapshot of all pulled relay streams, ordered by path
    pub fn list_pulled(&self) -> Vec<PulledStream> {
        let mut listed: Vec<PulledStream> = self
            .streams
            .iter()
            .filter_map(|item| {
                let entry = item.value();
                let source = entry.pull_source.clone()?;
                let tracks = entry.tracks.borrow().clone();
                Some(PulledStream {
                    stream_path: entry.path.clone(),
                    source,
                    subscribers: entry.subscriber_count.load(Ordering::Relaxed),
                    has_video: !matches!(tracks.video, TrackSlot::Absent),
                    has_audio: !matches!(tracks.audio, TrackSlot::Absent),
                })
            })
            .collect();
        listed.sort_by(|a, b| a.stream_path.cmp(&b.stream_path));
        listed
    }
}

/// Exclusive producer handle for one stream
pub struct Publisher {
    registry: StreamRegistry,
    entry: Arc<StreamEntry>,
}

impl Publisher {
    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// Declare the video track. Only the first declaration takes effect.
    pub fn set_video_track(&self, track: VideoTrack) {
        self.entry.tracks.send_if_modified(|t| {
            if t.video.is_pending() {
                t.video = TrackSlot::Ready(track.clone());
                true
            } else {
                tracing::debug!(stream = %self.entry.path, "video track already declared");
                false
            }
        });
    }

    /// Declare that the stream carries no video
    pub fn set_no_video(&self) {
        self.entry.tracks.send_if_modified(|t| {
            if t.video.is_pending() {
                t.video = TrackSlot::Absent;
                true
            } else {
                false
            }
        });
    }

    /// Declare the audio track. Only the first declaration takes effect.
    pub fn set_audio_track(&self, track: AudioTrack) {
        self.entry.tracks.send_if_modified(|t| {
            if t.audio.is_pending() {
                t.audio = TrackSlot::Ready(track.clone());
                true
            } else {
                tracing::debug!(stream = %self.entry.path, "audio track already declared");
                false
            }
        });
    }

    /// Declare that the stream carries no audio
    pub fn set_no_audio(&self) {
        self.entry.tracks.send_if_modified(|t| {
            if t.audio.is_pending() {
                t.audio = TrackSlot::Absent;
                true
            } else {
                false
            }
        });
    }

    /// Deliver one video packet to all current subscribers
    pub fn push_video(&self, packet: MediaPacket) {
        if let Some(tx) = self.entry.video_tx.lock().as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// Deliver one audio packet to all current subscribers
    pub fn push_audio(&self, packet: MediaPacket) {
        if let Some(tx) = self.entry.audio_tx.lock().as_ref() {
            let _ = tx.send(packet);
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.registry.streams.remove(&self.entry.path);
        self.entry.close();
        tracing::info!(stream = %self.entry.path, "publisher closed");
    }
}

/// Consumer handle for one stream, one per connection
pub struct Subscriber {
    id: String,
    entry: Arc<StreamEntry>,
    tracks: watch::Receiver<TrackInfo>,
}

impl Subscriber {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// Suspend until the video track resolves. Returns `None` for absent
    /// tracks and for streams that close while the track is pending.
    pub async fn wait_video_track(&mut self) -> Option<VideoTrack> {
        match self.tracks.wait_for(|t| !t.video.is_pending()).await {
            Ok(tracks) => tracks.video.to_option(),
            Err(_) => None,
        }
    }

    /// Suspend until the audio track resolves; see [`Self::wait_video_track`]
    pub async fn wait_audio_track(&mut self) -> Option<AudioTrack> {
        match self.tracks.wait_for(|t| !t.audio.is_pending()).await {
            Ok(tracks) => tracks.audio.to_option(),
            Err(_) => None,
        }
    }

    /// Open a receiver for video packets; `None` when the stream has closed
    pub fn video_packets(&self) -> Option<broadcast::Receiver<MediaPacket>> {
        self.entry.video_tx.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Open a receiver for audio packets; `None` when the stream has closed
    pub fn audio_packets(&self) -> Option<broadcast::Receiver<MediaPacket>> {
        self.entry.audio_tx.lock().as_ref().map(|tx| tx.subscribe())
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.entry.subscriber_count.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(stream = %self.entry.path, subscriber = %self.id, "subscriber removed");
    }
}
