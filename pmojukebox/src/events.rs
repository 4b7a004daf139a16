//! Adapter events and their delivery into the jukebox.
//!
//! Player adapters run their own threads (process readers, decoders…). They
//! never call the controller directly: they post `AdapterEvent`s on a channel
//! and a single pump thread hands them to the controller, which processes
//! them under its own lock, one at a time, like any other command.

use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::{debug, trace};

use crate::jukebox::JukeboxController;
use crate::model::AdapterState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterEventKind {
    /// The adapter state changed (playing, paused, stopped).
    StateChanged(AdapterState),
    /// The adapter moved on to the next stream by itself.
    TrackBoundary,
    /// The adapter has no stream left to play.
    PlaybackEnded,
}

/// An event tagged with the generation of the adapter that emitted it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterEvent {
    pub generation: u64,
    pub kind: AdapterEventKind,
}

/// Sending side handed to an adapter when it is registered.
#[derive(Clone, Debug)]
pub struct AdapterListener {
    generation: u64,
    tx: Sender<AdapterEvent>,
}

impl AdapterListener {
    pub(crate) fn new(generation: u64, tx: Sender<AdapterEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state_changed(&self, state: AdapterState) {
        self.send(AdapterEventKind::StateChanged(state));
    }

    pub fn track_boundary(&self) {
        self.send(AdapterEventKind::TrackBoundary);
    }

    pub fn playback_ended(&self) {
        self.send(AdapterEventKind::PlaybackEnded);
    }

    fn send(&self, kind: AdapterEventKind) {
        let event = AdapterEvent {
            generation: self.generation,
            kind,
        };
        // The jukebox is gone: nobody is interested any more.
        if self.tx.send(event).is_err() {
            trace!(generation = self.generation, "Adapter event dropped");
        }
    }
}

#[derive(Clone)]
pub(crate) struct AdapterEventChannel {
    tx: Sender<AdapterEvent>,
    rx: Receiver<AdapterEvent>,
}

impl AdapterEventChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded::<AdapterEvent>();
        Self { tx, rx }
    }

    pub(crate) fn listener(&self, generation: u64) -> AdapterListener {
        AdapterListener::new(generation, self.tx.clone())
    }

    pub(crate) fn try_recv(&self) -> Option<AdapterEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<AdapterEvent> {
        self.rx.clone()
    }
}

/// Spawns the thread feeding adapter events into `controller`.
///
/// The thread only keeps a weak reference: it stops once the controller is
/// dropped, or when the channel is disconnected.
pub(crate) fn spawn_event_pump(
    controller: Weak<JukeboxController>,
    rx: Receiver<AdapterEvent>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("jukebox-events".to_string())
        .spawn(move || {
            while let Ok(event) = rx.recv() {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.dispatch_adapter_event(event);
            }
            debug!("Jukebox event pump exiting");
        })
}
