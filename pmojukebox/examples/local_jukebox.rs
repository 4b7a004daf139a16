//! Plays audio files on the local output through mpg123.
//!
//! ```text
//! cargo run -p pmojukebox --example local_jukebox -- [--config FILE] [--shuffle] FILE...
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use pmojukebox::logging::{component_span, init_tracing};
use pmojukebox::{
    AllowAllAuthorizer, Config, FileSystemCheck, InMemoryStatusTracker, JukeboxController,
    JukeboxServices, JukeboxState, LoggingPlayHistory, Mpg123Factory, PlayQueue, PlayerSession,
    Track,
};

fn main() -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut shuffle = false;
    let mut files = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().context("--config needs a file")?.into());
            }
            "--shuffle" => shuffle = true,
            _ => files.push(PathBuf::from(arg)),
        }
    }
    if files.is_empty() {
        bail!("usage: local_jukebox [--config FILE] [--shuffle] FILE...");
    }

    let config = Config::load(config_path.as_deref())?;
    init_tracing(&config.logging.filter)?;

    let user = std::env::var("USER").unwrap_or_else(|_| "jukebox".to_string());

    let queue = Arc::new(PlayQueue::with_existence_check(
        Arc::new(FileSystemCheck),
        component_span("queue", &user),
    ));
    let tracks = files.into_iter().enumerate().map(|(i, path)| {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Track::new(format!("local-{i}"), path, size).into_ref()
    });
    queue.add_tracks(false, tracks);
    queue.set_name("Command line");
    if shuffle {
        queue.shuffle();
    }

    let services = JukeboxServices::new(
        Arc::new(AllowAllAuthorizer),
        Arc::new(InMemoryStatusTracker::new()),
        Arc::new(LoggingPlayHistory),
    );
    let factory = Mpg123Factory::from_config(&config.jukebox.player)
        .with_span(component_span("mpg123", &user));
    let jukebox = JukeboxController::spawn(
        Arc::new(factory),
        services,
        config.jukebox.gain,
        component_span("controller", &user),
    )?;

    let session = PlayerSession::new("local", user, Arc::clone(&queue));
    jukebox.update_jukebox(&session, 0)?;

    println!(
        "Playing {} track(s), {} bytes",
        queue.len(),
        queue.total_size()
    );

    while jukebox.state() != JukeboxState::Idle && jukebox.current_track().is_some() {
        thread::sleep(Duration::from_secs(1));
        if let Some(track) = jukebox.current_track() {
            println!("{} [{}s]", track.short_path(), jukebox.position_seconds());
        }
    }

    println!("Queue exhausted");
    Ok(())
}
