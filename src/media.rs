//! Media tracks and streams as seen by the negotiator
//!
//! Capture and rendering live outside this crate. A [`MediaSource`] hands the
//! negotiator a local [`MediaStream`]; the transport hands back remote tracks
//! which are collected into a remote stream. Both streams are published through
//! [`StreamSlot`]s that hold only the latest value.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::MediaError;
use crate::utils::random_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// A single live audio or video track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Stops the track. Must be idempotent and must not panic.
    fn stop(&self);

    /// Lets a transport recover its own concrete track type
    fn as_any(&self) -> &dyn Any;
}

/// A set of live tracks that can grow after creation
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::with_id(random_id())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_tracks(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks: Mutex::new(tracks),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds a track unless one with the same id is already present.
    /// Returns whether the stream changed.
    pub fn add_track(&self, track: Arc<dyn MediaTrack>) -> bool {
        let mut tracks = self.tracks.lock();
        let id = track.id();
        if tracks.iter().any(|t| t.id() == id) {
            return false;
        }
        tracks.push(track);
        true
    }

    pub fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.lock().clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().iter().map(|t| t.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    pub fn stop_all(&self) {
        for track in self.tracks.lock().iter() {
            track.stop();
        }
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture collaborator: produces the local stream
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open_local_stream(&self) -> Result<Arc<MediaStream>, MediaError>;
}

/// Latest-value cell for a stream; starts absent
#[derive(Debug)]
pub struct StreamSlot {
    tx: watch::Sender<Option<Arc<MediaStream>>>,
}

impl StreamSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MediaStream>>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<Arc<MediaStream>> {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, stream: Option<Arc<MediaStream>>) -> Option<Arc<MediaStream>> {
        self.tx.send_replace(stream)
    }

    /// Wakes observers without changing the slot, used when the held
    /// stream gained a track
    pub fn touch(&self) {
        self.tx.send_modify(|_| {});
    }
}

impl Default for StreamSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct TestTrack {
        id: String,
        stopped: AtomicBool,
    }

    impl TestTrack {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl MediaTrack for TestTrack {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn kind(&self) -> TrackKind {
            TrackKind::Audio
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn duplicate_track_ids_are_ignored() {
        let stream = MediaStream::with_id("s");
        assert!(stream.add_track(TestTrack::new("a")));
        assert!(!stream.add_track(TestTrack::new("a")));
        assert!(stream.add_track(TestTrack::new("b")));
        assert_eq!(stream.track_ids(), vec!["a", "b"]);
    }

    #[test]
    fn stop_all_stops_every_track() {
        let a = TestTrack::new("a");
        let b = TestTrack::new("b");
        let stream = MediaStream::from_tracks("s", vec![a.clone(), b.clone()]);
        stream.stop_all();
        assert!(a.stopped.load(Ordering::SeqCst));
        assert!(b.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slot_notifies_on_replace_and_touch() {
        let slot = StreamSlot::new();
        let mut rx = slot.subscribe();
        assert!(rx.borrow().is_none());

        let stream = Arc::new(MediaStream::with_id("remote"));
        slot.replace(Some(stream.clone()));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|s| s.id().to_string()),
            Some("remote".into())
        );

        stream.add_track(TestTrack::new("t"));
        slot.touch();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|s| s.len()), Some(1));

        slot.replace(None);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
