use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    /// A structurally complete frame whose event tag or JSON payload is invalid.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Comment-only or whitespace frame; carries no event.
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Both full and delta forms of {0} are set")]
    AmbiguousText(&'static str),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
