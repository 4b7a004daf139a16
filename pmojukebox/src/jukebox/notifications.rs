//! Side effects of a track starting or ending on the jukebox.

use tracing::{debug, info};

use crate::model::{PlayerSession, Track, TrackRef};
use crate::sinks::{JukeboxServices, StatusHandle};

/// A track start or end, reported for the session it belongs to.
#[derive(Clone, Debug)]
pub(crate) enum TrackEvent {
    Started { session: PlayerSession, track: TrackRef },
    Ended { session: PlayerSession, track: TrackRef },
}

/// Reports track starts and ends to the external collaborators.
pub(crate) struct TrackNotifier<'a> {
    services: &'a JukeboxServices,
}

impl<'a> TrackNotifier<'a> {
    pub(crate) fn new(services: &'a JukeboxServices) -> Self {
        Self { services }
    }

    pub(crate) fn report(&self, event: &TrackEvent, status: &mut Option<StatusHandle>) {
        match event {
            TrackEvent::Started { session, track } => self.track_started(session, track, status),
            TrackEvent::Ended { session, track } => self.track_ended(session, track, status),
        }
    }

    /// Opens a status for `session`, counts the play and scrobbles
    /// "now playing".
    fn track_started(
        &self,
        session: &PlayerSession,
        track: &Track,
        status: &mut Option<StatusHandle>,
    ) {
        // A handle left open means the previous end was never reported.
        if let Some(stale) = status.take() {
            debug!(player = session.id.as_str(), "Closing leftover stream status");
            self.services.status.close(&stale);
        }

        info!(
            player = session.id.as_str(),
            user = session.username.as_str(),
            path = %track.short_path(),
            "Jukebox track started"
        );

        let handle = self.services.status.open(session);
        handle.set_path(&track.path);
        handle.add_bytes(track.size);
        *status = Some(handle);

        self.services.history.increment_play_count(track);
        if !session.is_rest_client() {
            self.services
                .history
                .register_scrobble(track, &session.username, false, None);
        }
    }

    /// Closes the status and scrobbles the submission.
    fn track_ended(
        &self,
        session: &PlayerSession,
        track: &Track,
        status: &mut Option<StatusHandle>,
    ) {
        if let Some(handle) = status.take() {
            self.services.status.close(&handle);
        }

        info!(
            player = session.id.as_str(),
            path = %track.short_path(),
            "Jukebox track ended"
        );

        if !session.is_rest_client() {
            self.services
                .history
                .register_scrobble(track, &session.username, true, None);
        }
    }
}
