//! SSH Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Invalid SSH target: {0}")]
    InvalidTarget(String),

    /// No credential could be resolved at session start
    #[error("No usable authentication method, add a password to the remote URL or generate SSH keys")]
    NoAuthMethods,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session is gone; the next dial will re-establish it
    #[error("SSH session closed")]
    Disconnected,

    /// The remote side refused to open a channel to the destination
    #[error("Channel to {target} refused: {reason}")]
    ChannelOpenFailed { target: String, reason: String },

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("SSH Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("SSH Agent error: {0}")]
    AgentError(String),
}

impl SshError {
    /// Whether this error means the underlying session is unusable.
    ///
    /// Only these errors trigger a reconnect. Destination-level failures
    /// (`ChannelOpenFailed`) do not: a fresh session cannot fix them.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, SshError::Disconnected)
    }

    /// Classify an error returned while opening a channel on a live handle.
    pub(crate) fn from_channel_open(err: russh::Error, target: &str) -> Self {
        match err {
            russh::Error::ChannelOpenFailure(reason) => SshError::ChannelOpenFailed {
                target: target.to_string(),
                reason: format!("{:?}", reason),
            },
            // A healthy session only ever answers a channel open with a
            // ChannelOpenFailure; anything else means the transport is gone.
            _ => SshError::Disconnected,
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::SendError | russh::Error::HUP => {
                SshError::Disconnected
            }
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}
