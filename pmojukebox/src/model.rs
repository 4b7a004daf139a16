use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::queue::PlayQueue;

/// Shared handle on a track. Queues store handles, so a track keeps its
/// identity when it is moved around (shuffle, sort, undo).
pub type TrackRef = Arc<Track>;

/// A playable media file known to the library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
}

impl Track {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            size,
            title: None,
            artist: None,
            album: None,
            track_number: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_track_number(mut self, number: u32) -> Self {
        self.track_number = Some(number);
        self
    }

    pub fn into_ref(self) -> TrackRef {
        Arc::new(self)
    }

    /// Returns `parent/file` for log lines.
    pub fn short_path(&self) -> String {
        short_path(&self.path)
    }
}

fn short_path(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    match path
        .parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy())
    {
        Some(parent) => format!("{parent}/{file}"),
        None => file,
    }
}

/// Intended playback state of a queue (not the adapter state).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    #[default]
    Playing,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    TrackNumber,
    Artist,
    Album,
}

/// Criteria a random queue was generated from. The queue only carries it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomCriteria {
    pub count: usize,
    pub genre: Option<String>,
    pub from_year: Option<u32>,
    pub to_year: Option<u32>,
    pub music_folder: Option<String>,
}

/// State reported by a player adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Stopped,
    Playing,
    Paused,
}

/// Controller state, derived from the adapter slot and the adapter state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JukeboxState {
    Idle,
    Playing,
    Paused,
}

impl From<Option<AdapterState>> for JukeboxState {
    fn from(adapter: Option<AdapterState>) -> Self {
        match adapter {
            None | Some(AdapterState::Stopped) => JukeboxState::Idle,
            Some(AdapterState::Playing) => JukeboxState::Playing,
            Some(AdapterState::Paused) => JukeboxState::Paused,
        }
    }
}

/// A player session asking for jukebox playback.
///
/// The session owns its play queue for its whole lifetime; the jukebox only
/// borrows it while the session is bound.
#[derive(Clone, Debug)]
pub struct PlayerSession {
    pub id: String,
    pub username: String,
    /// Set for stateless REST clients. Those never scrobble.
    pub client_id: Option<String>,
    queue: Arc<PlayQueue>,
}

impl PlayerSession {
    pub fn new(id: impl Into<String>, username: impl Into<String>, queue: Arc<PlayQueue>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            client_id: None,
            queue,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn queue(&self) -> &Arc<PlayQueue> {
        &self.queue
    }

    pub fn is_rest_client(&self) -> bool {
        self.client_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_path() {
        let track = Track::new("1", "/music/Artist/Album/01 - Song.mp3", 10);
        assert_eq!(track.short_path(), "Album/01 - Song.mp3");
        assert_eq!(Track::new("2", "song.mp3", 1).short_path(), "song.mp3");
    }

    #[test]
    fn test_jukebox_state_from_adapter() {
        assert_eq!(JukeboxState::from(None), JukeboxState::Idle);
        assert_eq!(
            JukeboxState::from(Some(AdapterState::Stopped)),
            JukeboxState::Idle
        );
        assert_eq!(
            JukeboxState::from(Some(AdapterState::Paused)),
            JukeboxState::Paused
        );
    }

    #[test]
    fn test_rest_client_detection() {
        let queue = Arc::new(PlayQueue::new());
        let web = PlayerSession::new("p1", "alice", Arc::clone(&queue));
        let rest = PlayerSession::new("p2", "bob", queue).with_client_id("android");
        assert!(!web.is_rest_client());
        assert!(rest.is_rest_client());
    }
}
