//! Play queue of a player session.
//!
//! A `PlayQueue` is an ordered list of tracks (duplicates allowed) with a
//! cursor on the current track, a repeat flag, the intended playback status
//! and a single-level undo snapshot. It knows nothing about playback: the
//! jukebox reads and advances it, the UI layer edits it, both through the
//! queue's own reentrant lock.
//!
//! Cursor model:
//!   - `Some(i)`: index of the current track. An empty queue keeps `Some(0)`.
//!   - `None`: the end of the queue was reached without repeat.
//!
//! A second, independent cursor serves the sequential stream API used by
//! player adapters (`first_stream` / `next_stream`).

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rand::seq::SliceRandom;
use tracing::{Span, debug};

use crate::errors::JukeboxError;
use crate::model::{QueueStatus, RandomCriteria, SortOrder, TrackRef};
use crate::queue::backup::QueueBackup;
use crate::queue::existence::{ExistenceCheck, FileSystemCheck};

const DEFAULT_NAME: &str = "(unnamed)";

#[derive(Debug)]
struct QueueState {
    name: String,
    tracks: Vec<TrackRef>,
    cursor: Option<usize>,
    repeat: bool,
    status: QueueStatus,
    random_criteria: Option<RandomCriteria>,
    backup: QueueBackup,
    stream_cursor: Option<usize>,
}

/// Clamps `index` into `[0, len - 1]`; an empty queue clamps to 0.
fn clamp(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

impl QueueState {
    fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            tracks: Vec::new(),
            cursor: Some(0),
            repeat: false,
            status: QueueStatus::Playing,
            random_criteria: None,
            backup: QueueBackup::capture(&[], Some(0)),
            stream_cursor: None,
        }
    }

    fn make_backup(&mut self) {
        self.backup = QueueBackup::capture(&self.tracks, self.cursor);
    }

    fn current_track(&mut self, check: &dyn ExistenceCheck) -> Option<TrackRef> {
        loop {
            let found = self
                .cursor
                .and_then(|index| self.tracks.get(index).map(|track| (index, track.clone())));
            let Some((index, track)) = found else {
                // Nothing left to play: the queue stops.
                self.status = QueueStatus::Stopped;
                return None;
            };

            if check.exists(&track) {
                return Some(track);
            }

            debug!(
                index,
                path = %track.path.display(),
                "Removing vanished track from play queue"
            );
            self.tracks.remove(index);
            self.cursor = Some(clamp(index, self.tracks.len()));
        }
    }

    fn advance(&mut self) {
        let next = self.cursor.map_or(0, |cursor| cursor + 1);
        self.cursor = if next >= self.tracks.len() {
            self.repeat.then_some(0)
        } else {
            Some(next)
        };
    }

    fn set_status(&mut self, status: QueueStatus) {
        self.status = status;
        if self.cursor.is_none() {
            self.cursor = Some(0);
        }
    }

    /// Points the cursor at `current` again after a reordering.
    fn relocate(&mut self, current: Option<TrackRef>) {
        if let Some(current) = current {
            self.cursor = self
                .tracks
                .iter()
                .position(|track| Arc::ptr_eq(track, &current));
        }
    }
}

/// Ordered, mutable list of tracks bound to one player session.
pub struct PlayQueue {
    state: ReentrantMutex<RefCell<QueueState>>,
    check: Arc<dyn ExistenceCheck>,
    span: Span,
}

impl std::fmt::Debug for PlayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("PlayQueue");
        match self.state.try_lock() {
            Some(guard) => match guard.try_borrow() {
                Ok(state) => out
                    .field("name", &state.name)
                    .field("len", &state.tracks.len())
                    .field("cursor", &state.cursor)
                    .field("status", &state.status)
                    .finish(),
                Err(_) => out.finish_non_exhaustive(),
            },
            None => out.finish_non_exhaustive(),
        }
    }
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayQueue {
    /// Creates an empty queue checking track presence on the file system.
    pub fn new() -> Self {
        Self::with_existence_check(Arc::new(FileSystemCheck), Span::none())
    }

    pub fn with_existence_check(check: Arc<dyn ExistenceCheck>, span: Span) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(QueueState::new())),
            check,
            span,
        }
    }

    fn locked<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let _entered = self.span.enter();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Runs several queue operations as one atomic step.
    ///
    /// The queue lock is reentrant: operations called on the queue from
    /// inside `f` take it again without blocking.
    pub fn with_lock<R>(&self, f: impl FnOnce(&PlayQueue) -> R) -> R {
        let _guard = self.state.lock();
        f(self)
    }

    pub fn name(&self) -> String {
        self.locked(|state| state.name.clone())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.locked(|state| state.name = name);
    }

    /// Returns the current track, or `None` at the end of the queue or when
    /// the queue is empty.
    ///
    /// Tracks failing the existence check are dropped from the queue on the
    /// way.
    pub fn current_track(&self) -> Option<TrackRef> {
        let check = Arc::clone(&self.check);
        self.locked(|state| state.current_track(check.as_ref()))
    }

    /// Path of the current track, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_track().map(|track| track.path.clone())
    }

    pub fn tracks(&self) -> Vec<TrackRef> {
        self.locked(|state| state.tracks.clone())
    }

    pub fn get(&self, index: usize) -> Option<TrackRef> {
        self.locked(|state| state.tracks.get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.locked(|state| state.tracks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.locked(|state| state.tracks.is_empty())
    }

    /// Index of the current track, `None` once the end was reached.
    pub fn index(&self) -> Option<usize> {
        self.locked(|state| state.cursor)
    }

    pub fn set_index(&self, index: usize) {
        self.locked(|state| {
            state.make_backup();
            state.cursor = Some(clamp(index, state.tracks.len()));
            state.set_status(QueueStatus::Playing);
        });
    }

    /// Moves the cursor to the next track, wrapping when repeat is on.
    pub fn advance(&self) {
        self.locked(QueueState::advance);
    }

    pub fn add_tracks<I>(&self, append: bool, items: I)
    where
        I: IntoIterator<Item = TrackRef>,
    {
        self.locked(|state| {
            state.make_backup();
            if !append {
                state.cursor = Some(0);
                state.tracks.clear();
            }
            state.tracks.extend(items);
            state.set_status(QueueStatus::Playing);
        });
    }

    /// Removes the track at `index` (clamped) and returns it.
    ///
    /// Returns `None` on an empty queue.
    pub fn remove_at(&self, index: usize) -> Option<TrackRef> {
        self.locked(|state| {
            state.make_backup();
            if state.tracks.is_empty() {
                return None;
            }

            let index = clamp(index, state.tracks.len());
            if matches!(state.cursor, Some(cursor) if cursor > index) {
                state.cursor = state.cursor.map(|cursor| cursor - 1);
            }
            let removed = state.tracks.remove(index);
            state.cursor = Some(clamp(state.cursor.unwrap_or(0), state.tracks.len()));
            Some(removed)
        })
    }

    pub fn clear(&self) {
        self.locked(|state| {
            state.make_backup();
            state.tracks.clear();
            state.cursor = Some(0);
        });
    }

    pub fn shuffle(&self) {
        let check = Arc::clone(&self.check);
        self.locked(|state| {
            state.make_backup();
            let current = state.current_track(check.as_ref());
            state.tracks.shuffle(&mut rand::rng());
            state.relocate(current);
        });
    }

    /// Stable sort on `order`. Missing track numbers count as 0, missing
    /// artist or album names as empty strings.
    pub fn sort(&self, order: SortOrder) {
        let check = Arc::clone(&self.check);
        self.locked(|state| {
            state.make_backup();
            let current = state.current_track(check.as_ref());
            match order {
                SortOrder::TrackNumber => state
                    .tracks
                    .sort_by_key(|track| track.track_number.unwrap_or(0)),
                SortOrder::Artist => state.tracks.sort_by(|a, b| {
                    trim_to_empty(&a.artist).cmp(trim_to_empty(&b.artist))
                }),
                SortOrder::Album => state.tracks.sort_by(|a, b| {
                    trim_to_empty(&a.album).cmp(trim_to_empty(&b.album))
                }),
            }
            state.relocate(current);
        });
    }

    pub fn move_up(&self, index: usize) {
        self.locked(|state| {
            state.make_backup();
            if index == 0 || index >= state.tracks.len() {
                return;
            }
            state.tracks.swap(index, index - 1);

            if state.cursor == Some(index) {
                state.cursor = Some(index - 1);
            } else if state.cursor == Some(index - 1) {
                state.cursor = Some(index);
            }
        });
    }

    pub fn move_down(&self, index: usize) {
        self.locked(|state| {
            state.make_backup();
            if index >= state.tracks.len().saturating_sub(1) {
                return;
            }
            state.tracks.swap(index, index + 1);

            if state.cursor == Some(index) {
                state.cursor = Some(index + 1);
            } else if state.cursor == Some(index + 1) {
                state.cursor = Some(index);
            }
        });
    }

    pub fn is_repeat(&self) -> bool {
        self.locked(|state| state.repeat)
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.locked(|state| state.repeat = repeat);
    }

    /// Swaps the live tracks and cursor with the undo snapshot.
    pub fn undo(&self) {
        self.locked(|state| {
            let QueueState {
                tracks,
                cursor,
                backup,
                ..
            } = state;
            std::mem::swap(tracks, &mut backup.tracks);
            std::mem::swap(cursor, &mut backup.cursor);
        });
    }

    pub fn status(&self) -> QueueStatus {
        self.locked(|state| state.status)
    }

    /// Sets the playback intent. Leaving the end-of-queue position is forced
    /// here: a `None` cursor goes back to the first track.
    pub fn set_status(&self, status: QueueStatus) {
        self.locked(|state| state.set_status(status));
    }

    pub fn random_criteria(&self) -> Option<RandomCriteria> {
        self.locked(|state| state.random_criteria.clone())
    }

    pub fn set_random_criteria(&self, criteria: Option<RandomCriteria>) {
        self.locked(|state| state.random_criteria = criteria);
    }

    /// Total size of the queued files, in bytes.
    pub fn total_size(&self) -> u64 {
        self.locked(|state| state.tracks.iter().map(|track| track.size).sum())
    }

    /// Starts a sequential stream iteration at the current track.
    pub fn first_stream(&self) -> Option<TrackRef> {
        let check = Arc::clone(&self.check);
        self.locked(|state| {
            let track = state.current_track(check.as_ref());
            state.stream_cursor = state.cursor;
            track
        })
    }

    /// Next track of the stream iteration, `Ok(None)` past the end.
    ///
    /// # Errors
    /// `JukeboxError::StreamNotStarted` when `first_stream` was never called
    /// (or started at the end of the queue).
    pub fn next_stream(&self) -> Result<Option<TrackRef>, JukeboxError> {
        self.locked(|state| {
            let Some(stream_cursor) = state.stream_cursor else {
                return Err(JukeboxError::StreamNotStarted);
            };

            let next = stream_cursor.saturating_add(1);
            state.stream_cursor = Some(next);
            Ok(state.tracks.get(next).cloned())
        })
    }
}

fn trim_to_empty(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn track(id: &str) -> TrackRef {
        Track::new(id, format!("/music/{id}.mp3"), 100).into_ref()
    }

    fn queue_of(ids: &[&str]) -> (PlayQueue, Vec<TrackRef>) {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        let tracks: Vec<TrackRef> = ids.iter().map(|id| track(id)).collect();
        queue.add_tracks(false, tracks.clone());
        (queue, tracks)
    }

    fn ids(queue: &PlayQueue) -> Vec<String> {
        queue.tracks().iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn test_new_queue_defaults() {
        let queue = PlayQueue::new();
        assert_eq!(queue.name(), "(unnamed)");
        assert_eq!(queue.index(), Some(0));
        assert_eq!(queue.status(), QueueStatus::Playing);
        assert!(queue.is_empty());
        assert!(queue.current_track().is_none());
    }

    #[test]
    fn test_advance_without_repeat_reaches_end() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.advance();
        queue.advance();
        queue.advance();
        assert_eq!(queue.index(), None);
        assert_eq!(queue.status(), QueueStatus::Playing);
        assert!(queue.current_track().is_none());
        assert_eq!(queue.status(), QueueStatus::Stopped);
    }

    #[test]
    fn test_empty_queue_read_stops_queue() {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        assert!(queue.current_track().is_none());
        assert_eq!(queue.status(), QueueStatus::Stopped);

        // Reading a real track leaves the status alone.
        queue.add_tracks(false, vec![track("a")]);
        queue.set_status(QueueStatus::Stopped);
        assert_eq!(queue.current_track().unwrap().id, "a");
        assert_eq!(queue.status(), QueueStatus::Stopped);
    }

    #[test]
    fn test_advance_with_repeat_wraps() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.set_repeat(true);
        queue.advance();
        queue.advance();
        queue.advance();
        assert_eq!(queue.index(), Some(0));
        assert_eq!(queue.current_track().unwrap().id, "a");
    }

    #[test]
    fn test_replace_resets_cursor() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.set_index(2);
        queue.add_tracks(false, vec![track("x"), track("y")]);
        assert_eq!(queue.index(), Some(0));
        assert_eq!(ids(&queue), vec!["x", "y"]);
        assert_eq!(queue.status(), QueueStatus::Playing);
    }

    #[test]
    fn test_append_keeps_cursor() {
        let (queue, _) = queue_of(&["a", "b"]);
        queue.set_index(1);
        queue.add_tracks(true, vec![track("c")]);
        assert_eq!(queue.index(), Some(1));
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_vanished_tracks_are_pruned_on_read() {
        let gone: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let gone_check = Arc::clone(&gone);
        let queue = PlayQueue::with_existence_check(
            Arc::new(move |t: &Track| !gone_check.lock().unwrap().contains(&t.id)),
            Span::none(),
        );
        queue.add_tracks(false, vec![track("a"), track("b"), track("c")]);
        queue.set_index(1);

        gone.lock().unwrap().insert("b".to_string());
        // Pruning happens on read, not on write.
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.current_track().unwrap().id, "c");
        assert_eq!(ids(&queue), vec!["a", "c"]);
        assert_eq!(queue.index(), Some(1));

        gone.lock().unwrap().insert("c".to_string());
        assert_eq!(queue.current_track().unwrap().id, "a");
        assert_eq!(queue.index(), Some(0));

        gone.lock().unwrap().insert("a".to_string());
        assert!(queue.current_track().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.index(), Some(0));
    }

    #[test]
    fn test_remove_at_adjusts_cursor() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.set_index(2);
        let removed = queue.remove_at(0).unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(queue.index(), Some(1));
        assert_eq!(queue.current_track().unwrap().id, "c");

        // Removing the last track clamps the cursor back into range.
        queue.remove_at(1);
        assert_eq!(queue.index(), Some(0));
        assert_eq!(queue.current_track().unwrap().id, "b");

        // Out of range indices are clamped.
        queue.remove_at(42);
        assert!(queue.is_empty());
        assert!(queue.remove_at(0).is_none());
    }

    #[test]
    fn test_clear() {
        let (queue, _) = queue_of(&["a", "b"]);
        queue.set_index(1);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.index(), Some(0));
        queue.undo();
        assert_eq!(ids(&queue), vec!["a", "b"]);
        assert_eq!(queue.index(), Some(1));
    }

    #[test]
    fn test_shuffle_keeps_current_track() {
        let (queue, tracks) = queue_of(&["a", "b", "c", "d", "e", "f"]);
        queue.set_index(1);
        for _ in 0..10 {
            queue.shuffle();
            let current = queue.current_track().unwrap();
            assert!(Arc::ptr_eq(&current, &tracks[1]));
            assert_eq!(queue.len(), 6);
        }
    }

    #[test]
    fn test_shuffle_follows_identity_of_duplicates() {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        let first = track("dup");
        let second = track("dup");
        queue.add_tracks(false, vec![first, Arc::clone(&second), track("x")]);
        queue.set_index(1);
        queue.shuffle();
        assert!(Arc::ptr_eq(&queue.current_track().unwrap(), &second));
    }

    #[test]
    fn test_sort_by_track_number_treats_missing_as_zero() {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        let three = Track::new("three", "3.mp3", 1).with_track_number(3).into_ref();
        let none = Track::new("none", "n.mp3", 1).into_ref();
        let one = Track::new("one", "1.mp3", 1).with_track_number(1).into_ref();
        queue.add_tracks(false, vec![three, none, one]);
        queue.set_index(0);

        queue.sort(SortOrder::TrackNumber);
        assert_eq!(ids(&queue), vec!["none", "one", "three"]);
        assert_eq!(queue.current_track().unwrap().id, "three");
        assert_eq!(queue.index(), Some(2));
    }

    #[test]
    fn test_sort_by_artist_and_album_is_stable() {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        queue.add_tracks(
            false,
            vec![
                Track::new("1", "1.mp3", 1).with_artist("Zappa").with_album("B").into_ref(),
                Track::new("2", "2.mp3", 1).with_album("A").into_ref(),
                Track::new("3", "3.mp3", 1).with_artist("  Abba ").with_album("B").into_ref(),
                Track::new("4", "4.mp3", 1).with_artist("Abba").into_ref(),
            ],
        );

        queue.sort(SortOrder::Artist);
        assert_eq!(ids(&queue), vec!["2", "3", "4", "1"]);

        queue.sort(SortOrder::Album);
        assert_eq!(ids(&queue), vec!["4", "2", "3", "1"]);
    }

    #[test]
    fn test_move_boundaries_are_noops() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.set_index(1);
        queue.move_up(0);
        queue.move_down(2);
        queue.move_down(usize::MAX);
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
        assert_eq!(queue.index(), Some(1));
    }

    #[test]
    fn test_move_follows_position() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        queue.set_index(1);

        queue.move_up(1);
        assert_eq!(ids(&queue), vec!["b", "a", "c"]);
        assert_eq!(queue.index(), Some(0));

        queue.move_down(1);
        assert_eq!(ids(&queue), vec!["b", "c", "a"]);
        assert_eq!(queue.index(), Some(0));

        queue.move_down(0);
        assert_eq!(ids(&queue), vec!["c", "b", "a"]);
        assert_eq!(queue.index(), Some(1));
    }

    #[test]
    fn test_undo_is_single_level() {
        let queue = PlayQueue::with_existence_check(Arc::new(|_: &Track| true), Span::none());
        queue.add_tracks(false, vec![track("s0")]);
        let s0 = ids(&queue);

        queue.add_tracks(true, vec![track("a"), track("b")]);
        let s1 = ids(&queue);
        assert_ne!(s0, s1);

        queue.remove_at(0);
        queue.undo();
        assert_eq!(ids(&queue), s1);

        // A second undo redoes the removal.
        queue.undo();
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_set_status_leaves_end_position() {
        let (queue, _) = queue_of(&["a", "b"]);
        queue.advance();
        queue.advance();
        assert_eq!(queue.index(), None);

        queue.set_status(QueueStatus::Stopped);
        assert_eq!(queue.status(), QueueStatus::Stopped);
        assert_eq!(queue.index(), Some(0));
    }

    #[test]
    fn test_set_index_clamps() {
        let (queue, _) = queue_of(&["a", "b"]);
        queue.set_status(QueueStatus::Stopped);
        queue.set_index(9);
        assert_eq!(queue.index(), Some(1));
        assert_eq!(queue.status(), QueueStatus::Playing);
    }

    #[test]
    fn test_total_size() {
        let (queue, _) = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.total_size(), 300);
    }

    #[test]
    fn test_stream_iteration() {
        let (queue, _) = queue_of(&["a", "b"]);
        assert!(matches!(
            queue.next_stream(),
            Err(JukeboxError::StreamNotStarted)
        ));

        assert_eq!(queue.first_stream().unwrap().id, "a");
        assert_eq!(queue.next_stream().unwrap().unwrap().id, "b");
        assert!(queue.next_stream().unwrap().is_none());
        assert!(queue.next_stream().unwrap().is_none());

        // Restartable, and independent of the playback cursor.
        assert_eq!(queue.first_stream().unwrap().id, "a");
        assert_eq!(queue.index(), Some(0));
    }

    #[test]
    fn test_with_lock_reenters() {
        let (queue, _) = queue_of(&["a", "b"]);
        let next = queue.with_lock(|q| {
            q.advance();
            q.current_track()
        });
        assert_eq!(next.unwrap().id, "b");
    }

    #[test]
    fn test_random_criteria_and_name() {
        let queue = PlayQueue::new();
        queue.set_name("Party");
        queue.set_random_criteria(Some(RandomCriteria {
            count: 20,
            genre: Some("Jazz".to_string()),
            ..RandomCriteria::default()
        }));
        assert_eq!(queue.name(), "Party");
        assert_eq!(queue.random_criteria().unwrap().count, 20);
    }
}
