//! Server-side jukebox: plays a player session's queue on the machine's own
//! audio output through an external player process.
//!
//! - [`queue::PlayQueue`]: ordered tracks, cursor, single-level undo and the
//!   sequential stream contract consumed by players.
//! - [`jukebox::JukeboxController`]: binds a session, drives one
//!   [`adapter::PlayerAdapter`] and reports track starts and ends to the
//!   [`sinks`].
//! - [`adapter::Mpg123Adapter`]: the `mpg123 -R` player process.

mod events;

pub mod adapter;
pub mod config;
pub mod errors;
pub mod jukebox;
pub mod logging;
pub mod model;
pub mod queue;
pub mod sinks;

pub use adapter::{
    AdapterEvent, AdapterEventKind, AdapterFactory, AdapterListener, Mpg123Adapter, Mpg123Factory,
    PlayerAdapter, StreamSource,
};
pub use config::{Config, PlayerConfig};
pub use errors::{JukeboxError, Result};
pub use jukebox::JukeboxController;
pub use model::{
    AdapterState, JukeboxState, PlayerSession, QueueStatus, RandomCriteria, SortOrder, Track,
    TrackRef,
};
pub use queue::{ExistenceCheck, FileSystemCheck, PlayQueue};
pub use sinks::{
    AllowAllAuthorizer, InMemoryStatusTracker, JukeboxAuthorizer, JukeboxServices,
    LoggingPlayHistory, PlayHistory, RoleTable, StatusHandle, StatusTracker, StreamStatus,
};
