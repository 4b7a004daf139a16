//! Collaborators notified by the jukebox.
//!
//! The jukebox does not own users, stream statuses or play history; it only
//! reports to them through the traits below. Simple implementations are
//! provided for standalone use (see `examples/local_jukebox.rs`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::model::{PlayerSession, Track};

/// Decides whether a user may drive the jukebox.
pub trait JukeboxAuthorizer: Send + Sync {
    fn has_jukebox_role(&self, username: &str) -> bool;
}

/// Status of one stream served to a player.
pub trait StreamStatus: Send + Sync {
    fn set_path(&self, path: &Path);
    fn add_bytes(&self, bytes: u64);
}

pub type StatusHandle = Arc<dyn StreamStatus>;

/// Keeps track of the streams currently served.
pub trait StatusTracker: Send + Sync {
    fn open(&self, session: &PlayerSession) -> StatusHandle;
    fn close(&self, status: &StatusHandle);
}

/// Play counts and scrobbling.
pub trait PlayHistory: Send + Sync {
    fn increment_play_count(&self, track: &Track);

    /// `submission` is false for "now playing", true once the track is done.
    fn register_scrobble(
        &self,
        track: &Track,
        username: &str,
        submission: bool,
        time: Option<DateTime<Utc>>,
    );
}

/// Bundle of collaborators handed to the jukebox.
#[derive(Clone)]
pub struct JukeboxServices {
    pub authorizer: Arc<dyn JukeboxAuthorizer>,
    pub status: Arc<dyn StatusTracker>,
    pub history: Arc<dyn PlayHistory>,
}

impl JukeboxServices {
    pub fn new(
        authorizer: Arc<dyn JukeboxAuthorizer>,
        status: Arc<dyn StatusTracker>,
        history: Arc<dyn PlayHistory>,
    ) -> Self {
        Self {
            authorizer,
            status,
            history,
        }
    }
}

// ============================================================================
// Standalone implementations
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAllAuthorizer;

impl JukeboxAuthorizer for AllowAllAuthorizer {
    fn has_jukebox_role(&self, _username: &str) -> bool {
        true
    }
}

/// Grants the jukebox role to a fixed set of users.
#[derive(Clone, Debug, Default)]
pub struct RoleTable {
    users: HashSet<String>,
}

impl RoleTable {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl JukeboxAuthorizer for RoleTable {
    fn has_jukebox_role(&self, username: &str) -> bool {
        self.users.contains(username)
    }
}

/// Status of a stream held by `InMemoryStatusTracker`.
#[derive(Debug)]
pub struct TransferStatus {
    id: u64,
    player_id: String,
    path: Mutex<Option<PathBuf>>,
    bytes: AtomicU64,
}

impl TransferStatus {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().expect("Status path mutex poisoned").clone()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl StreamStatus for TransferStatus {
    fn set_path(&self, path: &Path) {
        *self.path.lock().expect("Status path mutex poisoned") = Some(path.to_path_buf());
    }

    fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Keeps the open stream statuses in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatusTracker {
    next_id: AtomicU64,
    active: Mutex<Vec<Arc<TransferStatus>>>,
}

impl InMemoryStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the statuses currently open.
    pub fn active(&self) -> Vec<Arc<TransferStatus>> {
        self.active
            .lock()
            .expect("Status list mutex poisoned")
            .clone()
    }
}

impl StatusTracker for InMemoryStatusTracker {
    fn open(&self, session: &PlayerSession) -> StatusHandle {
        let status = Arc::new(TransferStatus {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            player_id: session.id.clone(),
            path: Mutex::new(None),
            bytes: AtomicU64::new(0),
        });
        self.active
            .lock()
            .expect("Status list mutex poisoned")
            .push(Arc::clone(&status));
        status
    }

    fn close(&self, status: &StatusHandle) {
        // Compare data pointers only: the handle is a trait object.
        let target = Arc::as_ptr(status) as *const ();
        self.active
            .lock()
            .expect("Status list mutex poisoned")
            .retain(|active| Arc::as_ptr(active) as *const () != target);
    }
}

/// Logs play counts and scrobbles instead of storing them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPlayHistory;

impl PlayHistory for LoggingPlayHistory {
    fn increment_play_count(&self, track: &Track) {
        info!(track = track.id.as_str(), path = %track.short_path(), "Play count incremented");
    }

    fn register_scrobble(
        &self,
        track: &Track,
        username: &str,
        submission: bool,
        time: Option<DateTime<Utc>>,
    ) {
        let time = time.unwrap_or_else(Utc::now);
        info!(
            track = track.id.as_str(),
            user = username,
            submission,
            time = %time.to_rfc3339(),
            "Scrobble registered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PlayQueue;

    #[test]
    fn test_role_table() {
        let roles = RoleTable::new(["alice", "bob"]);
        assert!(roles.has_jukebox_role("alice"));
        assert!(!roles.has_jukebox_role("mallory"));
        assert!(AllowAllAuthorizer.has_jukebox_role("mallory"));
    }

    #[test]
    fn test_in_memory_status_tracker() {
        let tracker = InMemoryStatusTracker::new();
        let session = PlayerSession::new("player-1", "alice", Arc::new(PlayQueue::new()));

        let first = tracker.open(&session);
        first.set_path(Path::new("/music/a.mp3"));
        first.add_bytes(1000);
        let second = tracker.open(&session);
        assert_eq!(tracker.active().len(), 2);

        let active = tracker.active();
        assert_eq!(active[0].player_id(), "player-1");
        assert_eq!(active[0].path(), Some(PathBuf::from("/music/a.mp3")));
        assert_eq!(active[0].bytes(), 1000);
        assert_ne!(active[0].id(), active[1].id());

        tracker.close(&first);
        let remaining = tracker.active();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), active[1].id());

        tracker.close(&second);
        assert!(tracker.active().is_empty());
    }
}
