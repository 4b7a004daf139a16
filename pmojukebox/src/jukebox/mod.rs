//! The jukebox: one player session's queue played on the server's own
//! audio output.

mod controller;
mod notifications;

pub use controller::JukeboxController;
