//! Control surface of the external player driving the local audio output.
//!
//! This module defines:
//!   - `StreamSource`: the sequential stream contract a player consumes
//!     (implemented by `PlayQueue`),
//!   - `PlayerAdapter`: one OS-level playback process, seen from the jukebox,
//!   - `AdapterFactory`: how the jukebox gets a fresh adapter when it needs one.
//!
//! Adapters report back asynchronously through the `AdapterListener` they are
//! registered with; they never call the jukebox directly.

mod mpg123;

use std::sync::Arc;

use crate::errors::JukeboxError;
use crate::model::{AdapterState, TrackRef};

pub use crate::events::{AdapterEvent, AdapterEventKind, AdapterListener};
pub use mpg123::{Mpg123Adapter, Mpg123Factory, RemoteStatus, parse_status_line};

/// Sequential access to the streams a player has to play.
pub trait StreamSource: Send + Sync {
    /// Restarts the iteration at the current track.
    fn first_stream(&self) -> Option<TrackRef>;

    /// Next stream, `Ok(None)` once the sequence is exhausted.
    ///
    /// Fails with `JukeboxError::StreamNotStarted` when `first_stream` was
    /// never called.
    fn next_stream(&self) -> Result<Option<TrackRef>, JukeboxError>;
}

/// One playback process owned by the jukebox.
///
/// All methods block until the process acknowledged the command (or failed).
pub trait PlayerAdapter: Send {
    // =====================================================================
    //  WIRING
    // =====================================================================

    /// Registers the listener receiving state, track-boundary and
    /// end-of-playback events.
    fn register_listener(&mut self, listener: AdapterListener);

    /// Binds the stream source the adapter pulls tracks from.
    fn bind_queue(&mut self, source: Arc<dyn StreamSource>);

    // =====================================================================
    //  TRANSPORT
    // =====================================================================

    /// Starts playback from the first stream, or resumes when paused.
    fn play(&mut self) -> Result<(), JukeboxError>;

    fn pause(&mut self) -> Result<(), JukeboxError>;

    /// Releases the process. The adapter is unusable afterwards, even when
    /// this fails.
    fn close(&mut self) -> Result<(), JukeboxError>;

    // =====================================================================
    //  VOLUME & STATUS
    // =====================================================================

    /// Sets the output gain, from 0.0 (silent) to 1.0.
    fn set_gain(&mut self, gain: f32) -> Result<(), JukeboxError>;

    fn state(&self) -> AdapterState;

    /// Position in the current stream, in seconds, when the adapter knows it.
    ///
    /// Must not block.
    fn position_seconds(&self) -> Option<u32> {
        None
    }
}

/// Creates player adapters on demand.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, initial_gain: f32) -> Result<Box<dyn PlayerAdapter>, JukeboxError>;
}
