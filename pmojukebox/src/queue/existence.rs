//! Existence predicate used by the queue to prune vanished tracks.

use crate::model::Track;

/// Tells whether a track is still present on its backing storage.
///
/// The queue asks this lazily, only when it reads its current position.
pub trait ExistenceCheck: Send + Sync {
    fn exists(&self, track: &Track) -> bool;
}

/// Checks the track path on the local file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSystemCheck;

impl ExistenceCheck for FileSystemCheck {
    fn exists(&self, track: &Track) -> bool {
        track.path.exists()
    }
}

impl<F> ExistenceCheck for F
where
    F: Fn(&Track) -> bool + Send + Sync,
{
    fn exists(&self, track: &Track) -> bool {
        self(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_system_check() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let present = Track::new("1", file.path(), 0);
        let missing = Track::new("2", file.path().with_extension("gone"), 0);

        assert!(FileSystemCheck.exists(&present));
        assert!(!FileSystemCheck.exists(&missing));
    }

    #[test]
    fn test_closure_check() {
        let check = |track: &Track| track.id != "deleted";
        assert!(check.exists(&Track::new("1", "a.mp3", 0)));
        assert!(!ExistenceCheck::exists(&check, &Track::new("deleted", "b.mp3", 0)));
    }
}
