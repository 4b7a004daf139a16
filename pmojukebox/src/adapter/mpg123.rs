//! Player adapter driving an `mpg123 -R` child process.
//!
//! mpg123's remote-control mode reads commands on stdin and reports on
//! stdout:
//!   - commands: `LOAD <file>`, `PAUSE` (toggle), `VOLUME <percent>`, `QUIT`;
//!   - status:   `@P 0` stopped, `@P 1` paused, `@P 2` playing,
//!     `@P 3` end of track (recent versions, followed by `@P 0`),
//!     `@F <frame> <frames-left> <secs> <secs-left>`, `@E <message>`.
//!
//! A reader thread follows the status lines. When a track ends while
//! playing, it pulls the next stream from the bound queue and loads it
//! (track boundary), or reports the end of playback when the queue is
//! exhausted.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{Span, debug, warn};

use crate::adapter::{AdapterFactory, AdapterListener, PlayerAdapter, StreamSource};
use crate::config::PlayerConfig;
use crate::errors::JukeboxError;
use crate::model::{AdapterState, Track};

/// A status line emitted by mpg123 in remote mode.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteStatus {
    Stopped,
    Paused,
    Playing,
    TrackEnded,
    Frame { seconds: f64 },
    Error(String),
}

/// Parses one stdout line of `mpg123 -R`. Unknown lines give `None`.
pub fn parse_status_line(line: &str) -> Option<RemoteStatus> {
    let line = line.trim();
    let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));

    match tag {
        "@P" => match rest.trim() {
            "0" => Some(RemoteStatus::Stopped),
            "1" => Some(RemoteStatus::Paused),
            "2" => Some(RemoteStatus::Playing),
            "3" => Some(RemoteStatus::TrackEnded),
            _ => None,
        },
        "@F" => {
            let seconds = rest.split_whitespace().nth(2)?.parse::<f64>().ok()?;
            Some(RemoteStatus::Frame { seconds })
        }
        "@E" => Some(RemoteStatus::Error(rest.trim().to_string())),
        _ => None,
    }
}

fn gain_to_percent(gain: f32) -> u32 {
    (gain.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Builds `Mpg123Adapter`s from the configured command line.
#[derive(Clone, Debug)]
pub struct Mpg123Factory {
    command: PathBuf,
    args: Vec<String>,
    span: Span,
}

impl Mpg123Factory {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            span: Span::none(),
        }
    }

    pub fn from_config(config: &PlayerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl AdapterFactory for Mpg123Factory {
    fn create(&self, initial_gain: f32) -> Result<Box<dyn PlayerAdapter>, JukeboxError> {
        let adapter = Mpg123Adapter::spawn(&self.command, &self.args, initial_gain, self.span.clone())?;
        Ok(Box::new(adapter))
    }
}

struct Shared {
    stdin: ChildStdin,
    state: AdapterState,
    source: Option<Arc<dyn StreamSource>>,
    listener: Option<AdapterListener>,
    /// Set after `@P 3`: the `@P 0` that follows belongs to the same track end.
    ignore_next_stop: bool,
    closing: bool,
}

impl Shared {
    fn command(&mut self, command: &str) -> Result<(), JukeboxError> {
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn load(&mut self, track: &Track) -> Result<(), JukeboxError> {
        self.command(&format!("LOAD {}", track.path.display()))
    }

    fn update_state(&mut self, state: AdapterState) {
        if self.state != state {
            self.state = state;
            if let Some(listener) = &self.listener {
                listener.state_changed(state);
            }
        }
    }

    /// Current stream is over: chain the next one or report the end.
    fn stream_finished(&mut self, position: &AtomicU32) {
        let next = match self.source.as_ref() {
            Some(source) => source.next_stream(),
            None => Ok(None),
        };

        match next {
            Ok(Some(track)) => match self.load(&track) {
                Ok(()) => {
                    position.store(0, Ordering::Relaxed);
                    debug!(path = %track.path.display(), "mpg123 moved to next stream");
                    if let Some(listener) = &self.listener {
                        listener.track_boundary();
                    }
                    return;
                }
                Err(err) => {
                    warn!(error = %err, path = %track.path.display(), "mpg123 failed to load next stream");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Cannot read next stream from queue");
            }
        }

        self.state = AdapterState::Stopped;
        if let Some(listener) = &self.listener {
            listener.playback_ended();
        }
    }
}

/// `PlayerAdapter` backed by an `mpg123 -R` process.
pub struct Mpg123Adapter {
    child: Child,
    shared: Arc<Mutex<Shared>>,
    position: Arc<AtomicU32>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
    span: Span,
}

impl std::fmt::Debug for Mpg123Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mpg123Adapter")
            .field("pid", &self.child.id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Mpg123Adapter {
    pub fn spawn(
        command: &Path,
        args: &[String],
        initial_gain: f32,
        span: Span,
    ) -> Result<Self, JukeboxError> {
        let _entered = span.enter();

        let mut child = Command::new(command)
            .arg("-R")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                JukeboxError::adapter_creation(format!("{}: {err}", command.display()))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(JukeboxError::adapter_creation("mpg123 pipes unavailable"));
            }
        };

        let shared = Arc::new(Mutex::new(Shared {
            stdin,
            state: AdapterState::Stopped,
            source: None,
            listener: None,
            ignore_next_stop: false,
            closing: false,
        }));
        let position = Arc::new(AtomicU32::new(0));

        let reader = {
            let shared = Arc::clone(&shared);
            let position = Arc::clone(&position);
            let span = span.clone();
            thread::Builder::new()
                .name(format!("mpg123-{}", child.id()))
                .spawn(move || reader_loop(stdout, shared, position, span))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };

        debug!(pid = child.id(), command = %command.display(), "mpg123 started");

        let mut adapter = Self {
            child,
            shared,
            position,
            reader: Some(reader),
            closed: false,
            span: span.clone(),
        };
        // Dropping the adapter on failure kills the process.
        adapter.set_gain(initial_gain)?;
        Ok(adapter)
    }

    fn ensure_open(&self) -> Result<(), JukeboxError> {
        if self.closed {
            Err(JukeboxError::AdapterClosed)
        } else {
            Ok(())
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mpg123 state mutex poisoned")
    }
}

fn reader_loop(
    stdout: ChildStdout,
    shared: Arc<Mutex<Shared>>,
    position: Arc<AtomicU32>,
    span: Span,
) {
    let _entered = span.enter();

    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else {
            break;
        };
        let Some(status) = parse_status_line(&line) else {
            continue;
        };

        let mut shared = shared.lock().expect("mpg123 state mutex poisoned");
        if shared.closing {
            break;
        }

        match status {
            RemoteStatus::Frame { seconds } => {
                position.store(seconds.max(0.0) as u32, Ordering::Relaxed);
            }
            RemoteStatus::TrackEnded => {
                shared.ignore_next_stop = true;
                if shared.state == AdapterState::Playing {
                    shared.stream_finished(&position);
                }
            }
            RemoteStatus::Stopped => {
                if shared.ignore_next_stop {
                    shared.ignore_next_stop = false;
                } else if shared.state == AdapterState::Playing {
                    shared.stream_finished(&position);
                }
            }
            RemoteStatus::Paused => shared.update_state(AdapterState::Paused),
            RemoteStatus::Playing => shared.update_state(AdapterState::Playing),
            RemoteStatus::Error(message) => {
                warn!(message = message.as_str(), "mpg123 reported an error");
            }
        }
    }

    debug!("mpg123 reader exiting");
}

impl PlayerAdapter for Mpg123Adapter {
    fn register_listener(&mut self, listener: AdapterListener) {
        self.shared().listener = Some(listener);
    }

    fn bind_queue(&mut self, source: Arc<dyn StreamSource>) {
        self.shared().source = Some(source);
    }

    fn play(&mut self) -> Result<(), JukeboxError> {
        self.ensure_open()?;
        let _entered = self.span.enter();
        let mut shared = self.shared();

        match shared.state {
            AdapterState::Playing => Ok(()),
            AdapterState::Paused => {
                shared.command("PAUSE")?;
                shared.state = AdapterState::Playing;
                Ok(())
            }
            AdapterState::Stopped => {
                let source = shared.source.clone().ok_or(JukeboxError::NothingToPlay)?;
                let track = source.first_stream().ok_or(JukeboxError::NothingToPlay)?;
                shared.load(&track)?;
                shared.state = AdapterState::Playing;
                self.position.store(0, Ordering::Relaxed);
                debug!(path = %track.path.display(), "mpg123 loading first stream");
                Ok(())
            }
        }
    }

    fn pause(&mut self) -> Result<(), JukeboxError> {
        self.ensure_open()?;
        let mut shared = self.shared();
        if shared.state == AdapterState::Playing {
            shared.command("PAUSE")?;
            shared.state = AdapterState::Paused;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), JukeboxError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _entered = self.span.enter();

        {
            let mut shared = self.shared();
            shared.closing = true;
            shared.state = AdapterState::Stopped;
            if let Err(err) = shared.command("QUIT") {
                debug!(error = %err, "mpg123 QUIT not delivered");
            }
        }

        // The process may already be gone after QUIT.
        let _ = self.child.kill();
        let status = self.child.wait()?;
        debug!(status = %status, "mpg123 exited");

        if let Some(reader) = self.reader.take() {
            reader
                .join()
                .map_err(|_| JukeboxError::adapter("mpg123 reader thread panicked"))?;
        }
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) -> Result<(), JukeboxError> {
        self.ensure_open()?;
        self.shared()
            .command(&format!("VOLUME {}", gain_to_percent(gain)))
    }

    fn state(&self) -> AdapterState {
        if self.closed {
            return AdapterState::Stopped;
        }
        self.shared().state
    }

    fn position_seconds(&self) -> Option<u32> {
        (!self.closed).then(|| self.position.load(Ordering::Relaxed))
    }
}

impl Drop for Mpg123Adapter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "mpg123 release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playback_status() {
        assert_eq!(parse_status_line("@P 0"), Some(RemoteStatus::Stopped));
        assert_eq!(parse_status_line("@P 1"), Some(RemoteStatus::Paused));
        assert_eq!(parse_status_line("@P 2\n"), Some(RemoteStatus::Playing));
        assert_eq!(parse_status_line("@P 3"), Some(RemoteStatus::TrackEnded));
        assert_eq!(parse_status_line("@P 9"), None);
    }

    #[test]
    fn test_parse_frame_and_error() {
        assert_eq!(
            parse_status_line("@F 1234 5678 32.25 148.11"),
            Some(RemoteStatus::Frame { seconds: 32.25 })
        );
        assert_eq!(parse_status_line("@F 12"), None);
        assert_eq!(
            parse_status_line("@E No stream opened. (code 24)"),
            Some(RemoteStatus::Error("No stream opened. (code 24)".to_string()))
        );
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        assert_eq!(parse_status_line("@R MPG123 (ThOr) v10"), None);
        assert_eq!(parse_status_line("@I ID3:Title"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn test_gain_to_percent() {
        assert_eq!(gain_to_percent(0.5), 50);
        assert_eq!(gain_to_percent(1.7), 100);
        assert_eq!(gain_to_percent(-0.2), 0);
    }

    /// Writes a shell script answering like `mpg123 -R`: every `LOAD` plays
    /// to the end at once (`@P 2`, `@P 3`, `@P 0`). Received commands are
    /// appended to the file given as first argument after `-R`.
    #[cfg(unix)]
    fn scripted_player(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-mpg123");
        std::fs::write(
            &script,
            r#"#!/bin/sh
log="$2"
while IFS= read -r line; do
  echo "$line" >> "$log"
  case "$line" in
    LOAD*) echo "@F 0 100 0.00 2.61"; echo "@P 2"; echo "@P 3"; echo "@P 0" ;;
    QUIT) exit 0 ;;
  esac
done
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_reader_chains_streams_then_reports_end() {
        use std::time::Duration;

        use crate::events::{AdapterEvent, AdapterEventChannel, AdapterEventKind};
        use crate::queue::PlayQueue;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("commands.log");
        let config = PlayerConfig {
            command: scripted_player(dir.path()),
            args: vec![log.display().to_string()],
        };

        let queue = Arc::new(PlayQueue::with_existence_check(
            Arc::new(|_: &Track| true),
            Span::none(),
        ));
        queue.add_tracks(
            false,
            vec![
                Track::new("a", "/music/a.mp3", 1).into_ref(),
                Track::new("b", "/music/b.mp3", 1).into_ref(),
            ],
        );

        let channel = AdapterEventChannel::new();
        let mut adapter = Mpg123Factory::from_config(&config).create(0.5).unwrap();
        adapter.register_listener(channel.listener(3));
        adapter.bind_queue(queue);
        adapter.play().unwrap();

        let events = channel.receiver();
        let next = || events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            next(),
            AdapterEvent {
                generation: 3,
                kind: AdapterEventKind::TrackBoundary
            }
        );
        assert_eq!(next().kind, AdapterEventKind::PlaybackEnded);
        assert_eq!(adapter.state(), AdapterState::Stopped);

        // Each track end is reported once: the trailing `@P 0` is swallowed.
        std::thread::sleep(Duration::from_millis(100));
        assert!(channel.try_recv().is_none());

        let commands = std::fs::read_to_string(&log).unwrap();
        let commands: Vec<&str> = commands.lines().collect();
        assert_eq!(
            commands,
            vec!["VOLUME 50", "LOAD /music/a.mp3", "LOAD /music/b.mp3"]
        );

        adapter.close().unwrap();
        assert_eq!(adapter.position_seconds(), None);
        assert!(matches!(adapter.play(), Err(JukeboxError::AdapterClosed)));
    }

    #[test]
    fn test_missing_binary_fails_creation() {
        let factory = Mpg123Factory::new("/nonexistent/pmojukebox-mpg123", Vec::new());
        let result = factory.create(0.5);
        assert!(matches!(result, Err(JukeboxError::AdapterCreation(_))));
    }
}
