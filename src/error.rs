use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures of the serial link. Every variant sends the loop to the
/// reconnect supervisor.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Device answered the handshake with something unexpected.
    #[error("handshake failed: expected {expected:#04x}, got {got:#04x}")]
    Handshake { expected: u8, got: u8 },

    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    /// Read returned end of stream, possibly mid-frame.
    #[error("device closed the connection")]
    Closed,

    #[error("device did not finish the handshake within {0:?}")]
    Timeout(Duration),

    /// Device sent a handshake request while already connected.
    #[error("device restarted")]
    DeviceReset,

    /// Byte at a frame boundary is not an event code.
    #[error("unexpected event code {0:#04x}")]
    Framing(u8),
}

/// Failure reported by the remote channel service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote returned status {0}")]
    Status(u16),

    #[error("remote call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors escaping the synchronization core.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Remote read during resync. Counted as a failed connection attempt.
    #[error("resync failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("device unusable after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Shutdown was requested while reconnecting.
    #[error("shutdown requested")]
    Shutdown,
}

/// Per-connection command socket failure. Drops only that peer.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("peer I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("synchronization core is gone")]
    CoreGone,
}
