use thiserror::Error;

#[derive(Error, Debug)]
pub enum JukeboxError {
    // Levée par next_stream() quand first_stream() n'a jamais été appelé
    #[error("Stream iteration not started: call first_stream() first")]
    StreamNotStarted,
    #[error("No player session is bound to the jukebox")]
    NoBoundPlayer,
    #[error("Nothing to play: the stream source has no current track")]
    NothingToPlay,
    #[error("Cannot create player adapter: {0}")]
    AdapterCreation(String),
    #[error("Player adapter error: {0}")]
    Adapter(String),
    #[error("Player adapter is closed")]
    AdapterClosed,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JukeboxError {
    pub fn adapter_creation(message: impl Into<String>) -> Self {
        JukeboxError::AdapterCreation(message.into())
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        JukeboxError::Adapter(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        JukeboxError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, JukeboxError>;
