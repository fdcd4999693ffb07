use crate::consts::{device_op, host_op, HANDSHAKE_ACK, HANDSHAKE_DONE, HANDSHAKE_REQUEST};
use crate::error::LinkError;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Physical buttons on the indicator box.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Button {
    /// Flips the open/closed status.
    Toggle,
    /// Hold to switch the relay on.
    PowerOn,
    /// Switches the relay off immediately.
    PowerOff,
}

/// Frames written by the host.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HostFrame {
    Led(bool),
    Relay(bool),
    /// Relay write requested by a command socket peer.
    RemoteRelay(bool),
}

impl HostFrame {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            HostFrame::Led(on) => [host_op::SET_LED, on as u8],
            HostFrame::Relay(on) => [host_op::SET_RELAY, on as u8],
            HostFrame::RemoteRelay(on) => [host_op::REMOTE_RELAY, on as u8],
        }
    }

    /// Parse host bytes. Used by device simulators.
    pub fn from_bytes(raw: [u8; 2]) -> Option<Self> {
        let on = raw[1] != 0;
        match raw[0] {
            host_op::SET_LED => Some(HostFrame::Led(on)),
            host_op::SET_RELAY => Some(HostFrame::Relay(on)),
            host_op::REMOTE_RELAY => Some(HostFrame::RemoteRelay(on)),
            _ => None,
        }
    }
}

/// Frames read from the device after the handshake.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DeviceFrame {
    Button { button: Button, pressed: bool },
}

impl DeviceFrame {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            DeviceFrame::Button { button, pressed } => {
                let code = match button {
                    Button::Toggle => device_op::TOGGLE,
                    Button::PowerOn => device_op::POWER_ON,
                    Button::PowerOff => device_op::POWER_OFF,
                };
                [code, pressed as u8]
            }
        }
    }
}

/// Pop one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. A handshake request byte
/// at a frame boundary means the device restarted, any other unknown code
/// means we lost frame alignment.
pub fn decode(buf: &mut Vec<u8>) -> Result<Option<DeviceFrame>, LinkError> {
    let Some(&code) = buf.first() else {
        return Ok(None);
    };
    if code == HANDSHAKE_REQUEST {
        buf.remove(0);
        return Err(LinkError::DeviceReset);
    }
    let button = match code {
        device_op::TOGGLE => Button::Toggle,
        device_op::POWER_ON => Button::PowerOn,
        device_op::POWER_OFF => Button::PowerOff,
        _ => {
            warn!("Unknown device event code {:#04x}, dropping link", code);
            buf.remove(0);
            return Err(LinkError::Framing(code));
        }
    };
    if buf.len() < 2 {
        return Ok(None);
    }
    let pressed = buf[1] != 0;
    buf.drain(0..2);
    Ok(Some(DeviceFrame::Button { button, pressed }))
}

async fn read_byte<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u8, LinkError> {
    match stream.read_u8().await {
        Ok(byte) => Ok(byte),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(LinkError::Closed),
        Err(err) => Err(err.into()),
    }
}

/// Run the host side of the handshake: `0xFF` in, `0xFA` out, `0x02` in.
pub async fn handshake<S>(stream: &mut S) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Handshaking");
    let request = read_byte(stream).await?;
    if request != HANDSHAKE_REQUEST {
        return Err(LinkError::Handshake {
            expected: HANDSHAKE_REQUEST,
            got: request,
        });
    }
    stream.write_all(&[HANDSHAKE_ACK]).await?;
    stream.flush().await?;

    let done = read_byte(stream).await?;
    if done != HANDSHAKE_DONE {
        return Err(LinkError::Handshake {
            expected: HANDSHAKE_DONE,
            got: done,
        });
    }
    info!("Handshake successful");
    Ok(())
}
