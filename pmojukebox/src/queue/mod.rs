mod backup;
mod existence;
mod play_queue;

use crate::adapter::StreamSource;
use crate::errors::JukeboxError;
use crate::model::TrackRef;

pub use existence::{ExistenceCheck, FileSystemCheck};
pub use play_queue::PlayQueue;

impl StreamSource for PlayQueue {
    fn first_stream(&self) -> Option<TrackRef> {
        PlayQueue::first_stream(self)
    }

    fn next_stream(&self) -> Result<Option<TrackRef>, JukeboxError> {
        PlayQueue::next_stream(self)
    }
}
