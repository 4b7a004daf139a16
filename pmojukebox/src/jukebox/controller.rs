use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{Span, debug, error, info, warn};

use crate::adapter::{AdapterEvent, AdapterEventKind, AdapterFactory, PlayerAdapter, StreamSource};
use crate::errors::{JukeboxError, Result};
use crate::events::{AdapterEventChannel, spawn_event_pump};
use crate::model::{AdapterState, JukeboxState, PlayerSession, QueueStatus, TrackRef};
use crate::sinks::{JukeboxServices, StatusHandle};

use super::notifications::{TrackEvent, TrackNotifier};

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<ControllerState>>;

/// The adapter currently owned by the controller.
struct AdapterSlot {
    adapter: Box<dyn PlayerAdapter>,
    /// Events tagged with another generation come from a released adapter.
    generation: u64,
}

/// The track being played and the session it was started for.
struct NowPlaying {
    track: TrackRef,
    session: PlayerSession,
}

struct ControllerState {
    bound_player: Option<PlayerSession>,
    adapter: Option<AdapterSlot>,
    gain: f32,
    current: Option<NowPlaying>,
    status_handle: Option<StatusHandle>,
    offset_seconds: u32,
    next_generation: u64,
}

/// Plays the queue of one player session on the local audio output.
///
/// Every public operation runs under the controller lock. When an operation
/// touches the bound queue, the queue lock is always taken second; the queue
/// never calls back into the controller.
///
/// Collaborators (status tracker, play history) are called once the state is
/// released and may call the controller again from the same thread. Adapters
/// are called with the state borrowed: they report through their listener
/// only.
///
/// Adapter events are queued on a channel. They are handled by the pump
/// thread started by [`JukeboxController::spawn`], or explicitly with
/// [`JukeboxController::process_pending_events`].
pub struct JukeboxController {
    inner: ReentrantMutex<RefCell<ControllerState>>,
    factory: Arc<dyn AdapterFactory>,
    services: JukeboxServices,
    events: AdapterEventChannel,
    span: Span,
}

impl std::fmt::Debug for JukeboxController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("JukeboxController");
        if let Some(guard) = self.inner.try_lock() {
            if let Ok(state) = guard.try_borrow() {
                debug
                    .field("bound_player", &state.bound_player.as_ref().map(|p| &p.id))
                    .field("has_adapter", &state.adapter.is_some())
                    .field("gain", &state.gain)
                    .field("current_track", &state.current.as_ref().map(|now| &now.track.id));
            }
        }
        debug.finish_non_exhaustive()
    }
}

impl JukeboxController {
    /// Creates a controller without event pump.
    ///
    /// Adapter events stay queued until `process_pending_events` is called.
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        services: JukeboxServices,
        initial_gain: f32,
        span: Span,
    ) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(ControllerState {
                bound_player: None,
                adapter: None,
                gain: initial_gain,
                current: None,
                status_handle: None,
                offset_seconds: 0,
                next_generation: 0,
            })),
            factory,
            services,
            events: AdapterEventChannel::new(),
            span,
        }
    }

    /// Creates a controller and starts the thread delivering adapter events.
    pub fn spawn(
        factory: Arc<dyn AdapterFactory>,
        services: JukeboxServices,
        initial_gain: f32,
        span: Span,
    ) -> Result<Arc<Self>> {
        let controller = Arc::new(Self::new(factory, services, initial_gain, span));
        spawn_event_pump(Arc::downgrade(&controller), controller.events.receiver())?;
        Ok(controller)
    }

    // =====================================================================
    //  COMMANDS
    // =====================================================================

    /// Applies the playback intent of `session`'s queue to the jukebox.
    ///
    /// A queue in `Playing` status binds the session and plays its current
    /// track; a `Stopped` queue pauses the track being played. Unauthorized
    /// users are logged and ignored.
    pub fn update_jukebox(&self, session: &PlayerSession, offset_seconds: u32) -> Result<()> {
        let _entered = self.span.enter();

        if !self.services.authorizer.has_jukebox_role(&session.username) {
            warn!(
                user = session.username.as_str(),
                player = session.id.as_str(),
                "User is not authorized for jukebox playback"
            );
            return Ok(());
        }

        let guard = self.inner.lock();
        let mut events = Vec::new();

        let result = match session.queue().status() {
            QueueStatus::Playing => {
                let mut state = guard.borrow_mut();
                state.bound_player = Some(session.clone());
                let track = session.queue().current_track();
                self.play_locked(&mut state, track, offset_seconds, &mut events)
            }
            QueueStatus::Stopped => self.pause_locked(&mut guard.borrow_mut(), session),
        };

        self.report(&guard, events);
        result
    }

    /// Plays `track` from the bound player's queue, or stops when `None`.
    ///
    /// Replaying the paused current track without offset resumes it.
    pub fn play(&self, track: Option<TrackRef>, offset_seconds: u32) -> Result<()> {
        let _entered = self.span.enter();
        let guard = self.inner.lock();
        let mut events = Vec::new();
        let result = self.play_locked(&mut guard.borrow_mut(), track, offset_seconds, &mut events);
        self.report(&guard, events);
        result
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        let _entered = self.span.enter();
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();

        state.gain = gain;
        match state.adapter.as_mut() {
            Some(slot) => slot.adapter.set_gain(gain),
            None => Ok(()),
        }
    }

    // =====================================================================
    //  ADAPTER EVENTS
    // =====================================================================

    /// The adapter moved on to its next stream: follow it in the queue.
    pub fn on_track_boundary(&self) {
        let _entered = self.span.enter();
        let guard = self.inner.lock();
        let mut events = Vec::new();
        self.track_boundary_locked(&mut guard.borrow_mut(), &mut events);
        self.report(&guard, events);
    }

    /// The adapter has nothing left to play.
    ///
    /// The adapter is kept; only the current track is ended.
    pub fn on_playback_ended(&self) {
        let _entered = self.span.enter();
        let guard = self.inner.lock();
        let mut events = Vec::new();
        end_current_track(&mut guard.borrow_mut(), &mut events);
        self.report(&guard, events);
    }

    /// State reports are logged only; no transition depends on them.
    pub fn on_adapter_state_changed(&self, adapter_state: AdapterState) {
        let _entered = self.span.enter();
        debug!(state = ?adapter_state, "Adapter state changed");
    }

    /// Handles every adapter event queued so far. Returns how many were
    /// taken from the channel, stale ones included.
    pub fn process_pending_events(&self) -> usize {
        let mut count = 0;
        while let Some(event) = self.events.try_recv() {
            self.dispatch_adapter_event(event);
            count += 1;
        }
        count
    }

    pub(crate) fn dispatch_adapter_event(&self, event: AdapterEvent) {
        let _entered = self.span.enter();
        let guard = self.inner.lock();

        let current = guard.borrow().adapter.as_ref().map(|slot| slot.generation);
        if current != Some(event.generation) {
            debug!(
                generation = event.generation,
                current = ?current,
                kind = ?event.kind,
                "Ignoring event from released adapter"
            );
            return;
        }

        match event.kind {
            AdapterEventKind::StateChanged(adapter_state) => {
                self.on_adapter_state_changed(adapter_state)
            }
            AdapterEventKind::TrackBoundary => self.on_track_boundary(),
            AdapterEventKind::PlaybackEnded => self.on_playback_ended(),
        }
    }

    // =====================================================================
    //  QUERIES
    // =====================================================================

    pub fn gain(&self) -> f32 {
        self.inner.lock().borrow().gain
    }

    pub fn bound_player(&self) -> Option<PlayerSession> {
        self.inner.lock().borrow().bound_player.clone()
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        self.inner
            .lock()
            .borrow()
            .current
            .as_ref()
            .map(|now| Arc::clone(&now.track))
    }

    /// Offset requested by the last `play`. It is recorded, not applied.
    pub fn offset_seconds(&self) -> u32 {
        self.inner.lock().borrow().offset_seconds
    }

    pub fn state(&self) -> JukeboxState {
        let guard = self.inner.lock();
        let state = guard.borrow();
        JukeboxState::from(state.adapter.as_ref().map(|slot| slot.adapter.state()))
    }

    /// Position in the current track, `0` when unknown.
    ///
    /// Never blocks: a busy controller also reports `0`.
    pub fn position_seconds(&self) -> u32 {
        let Some(guard) = self.inner.try_lock() else {
            return 0;
        };
        let Ok(state) = guard.try_borrow() else {
            return 0;
        };
        state
            .adapter
            .as_ref()
            .and_then(|slot| slot.adapter.position_seconds())
            .unwrap_or(0)
    }

    // =====================================================================
    //  INTERNALS (controller lock held)
    // =====================================================================

    /// Reports track starts and ends with the state released, so
    /// collaborators may call back into the controller.
    fn report(&self, guard: &StateGuard<'_>, events: Vec<TrackEvent>) {
        if events.is_empty() {
            return;
        }

        let mut status = guard.borrow_mut().status_handle.take();
        let notifier = TrackNotifier::new(&self.services);
        for event in &events {
            notifier.report(event, &mut status);
        }

        // A nested call may have opened a newer status meanwhile.
        let stale = {
            let mut state = guard.borrow_mut();
            if state.status_handle.is_none() {
                state.status_handle = status;
                None
            } else {
                status
            }
        };
        if let Some(stale) = stale {
            self.services.status.close(&stale);
        }
    }

    fn pause_locked(&self, state: &mut ControllerState, session: &PlayerSession) -> Result<()> {
        if state.current.is_none() {
            return Ok(());
        }
        match state.adapter.as_mut() {
            Some(slot) if slot.adapter.state() == AdapterState::Playing => {
                slot.adapter.pause()?;
                debug!(player = session.id.as_str(), "Jukebox paused");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn play_locked(
        &self,
        state: &mut ControllerState,
        track: Option<TrackRef>,
        offset_seconds: u32,
        events: &mut Vec<TrackEvent>,
    ) -> Result<()> {
        let same_track = match (&track, &state.current) {
            (Some(requested), Some(now)) => **requested == *now.track,
            _ => false,
        };

        if same_track && offset_seconds == 0 {
            if let Some(slot) = state.adapter.as_mut() {
                if slot.adapter.state() == AdapterState::Paused {
                    debug!("Resuming paused jukebox track");
                    return slot.adapter.play();
                }
            }
        }

        state.offset_seconds = offset_seconds;
        if offset_seconds > 0 {
            debug!(offset_seconds, "Start offset recorded but not applied");
        }

        release_adapter(state, events);

        let Some(track) = track else {
            debug!("Nothing to play, jukebox left idle");
            return Ok(());
        };

        if let Err(err) = self.start_adapter(state) {
            error!(error = %err, path = %track.short_path(), "Cannot start jukebox playback");
            if let Some(mut slot) = state.adapter.take() {
                if let Err(close_err) = slot.adapter.close() {
                    warn!(error = %close_err, "Cannot release failed player adapter");
                }
            }
            return Err(err);
        }

        if let Some(session) = state.bound_player.clone() {
            events.push(TrackEvent::Started {
                session: session.clone(),
                track: Arc::clone(&track),
            });
            state.current = Some(NowPlaying { track, session });
        }
        Ok(())
    }

    /// Creates the adapter when missing, binds it and starts playback.
    fn start_adapter(&self, state: &mut ControllerState) -> Result<()> {
        let source: Arc<dyn StreamSource> = match state.bound_player.as_ref() {
            Some(session) => Arc::clone(session.queue()) as Arc<dyn StreamSource>,
            None => return Err(JukeboxError::NoBoundPlayer),
        };

        if state.adapter.is_none() {
            let generation = state.next_generation;
            state.next_generation += 1;

            let mut adapter = self.factory.create(state.gain)?;
            adapter.register_listener(self.events.listener(generation));
            debug!(generation, "Player adapter created");
            state.adapter = Some(AdapterSlot {
                adapter,
                generation,
            });
        }

        let gain = state.gain;
        let Some(slot) = state.adapter.as_mut() else {
            return Err(JukeboxError::AdapterClosed);
        };
        slot.adapter.bind_queue(source);
        slot.adapter.set_gain(gain)?;
        slot.adapter.play()
    }

    fn track_boundary_locked(&self, state: &mut ControllerState, events: &mut Vec<TrackEvent>) {
        end_current_track(state, events);

        let Some(session) = state.bound_player.clone() else {
            debug!("Track boundary without bound player");
            return;
        };

        let next = session.queue().with_lock(|queue| {
            queue.advance();
            queue.current_track()
        });

        match next {
            Some(track) => {
                events.push(TrackEvent::Started {
                    session: session.clone(),
                    track: Arc::clone(&track),
                });
                state.current = Some(NowPlaying { track, session });
            }
            None => info!(player = session.id.as_str(), "Jukebox queue exhausted"),
        }
    }
}

/// Closes the adapter, if any. Failures are logged and swallowed.
///
/// The current track, if any, is ended first.
fn release_adapter(state: &mut ControllerState, events: &mut Vec<TrackEvent>) {
    let Some(mut slot) = state.adapter.take() else {
        return;
    };

    end_current_track(state, events);

    if let Err(err) = slot.adapter.close() {
        warn!(
            generation = slot.generation,
            error = %err,
            "Cannot release player adapter, dropping it anyway"
        );
    } else {
        debug!(generation = slot.generation, "Player adapter released");
    }
}

/// Ends the current track on behalf of the session that started it.
fn end_current_track(state: &mut ControllerState, events: &mut Vec<TrackEvent>) {
    if let Some(NowPlaying { track, session }) = state.current.take() {
        events.push(TrackEvent::Ended { session, track });
    }
}

impl Drop for JukeboxController {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        let state = self.inner.get_mut().get_mut();
        let mut events = Vec::new();
        release_adapter(state, &mut events);

        let notifier = TrackNotifier::new(&self.services);
        for event in &events {
            notifier.report(event, &mut state.status_handle);
        }
    }
}
