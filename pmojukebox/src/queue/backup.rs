use crate::model::TrackRef;

/// The one snapshot kept for undo.
///
/// Every structural mutation overwrites it; undoing swaps it with the live
/// state, so a second undo redoes.
#[derive(Clone, Debug, Default)]
pub(crate) struct QueueBackup {
    pub(crate) tracks: Vec<TrackRef>,
    pub(crate) cursor: Option<usize>,
}

impl QueueBackup {
    pub(crate) fn capture(tracks: &[TrackRef], cursor: Option<usize>) -> Self {
        Self {
            tracks: tracks.to_vec(),
            cursor,
        }
    }
}
