/// Errors that can occur in device session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error. Fatal to the session.
    #[error("transport error: {0}")]
    Transport(#[from] rfbridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] rfbridge_frame::FrameError),

    /// The session's worker loops have stopped.
    #[error("session closed")]
    Closed,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
