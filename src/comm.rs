use crate::error::LinkError;
use crate::protocol::{self, DeviceFrame, HostFrame};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tracing::debug;

/// Opens fresh byte streams to the device. Reconnecting means dropping the
/// old `Device` and calling `open` again.
pub trait Connector: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn open(&mut self) -> Result<Self::Stream, LinkError>;

    fn describe(&self) -> String;
}

/// USB serial port connector.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub port_name: String,
    pub baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    type Stream = tokio_serial::SerialStream;

    #[tracing::instrument]
    fn open(&mut self) -> Result<Self::Stream, LinkError> {
        let builder = tokio_serial::new(&self.port_name, self.baud_rate);
        let stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|err| LinkError::Io(err.into()))?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port_name, self.baud_rate)
    }
}

/// A handshaken connection to the device. Replaced, never repaired.
pub struct Device<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    pending: Vec<u8>,
    connected_at: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Device<S> {
    /// Handshake on a freshly opened stream, bounded by `timeout`.
    pub async fn establish(mut stream: S, timeout: Duration) -> Result<Self, LinkError> {
        match tokio::time::timeout(timeout, protocol::handshake(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => return Err(LinkError::Timeout(timeout)),
        }
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            reader,
            writer,
            pending: Vec::new(),
            connected_at: Instant::now(),
        })
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Wait for the next complete frame.
    ///
    /// Cancel safe: partially received frames stay buffered in `self`.
    pub async fn next_frame(&mut self) -> Result<DeviceFrame, LinkError> {
        let mut buf = [0u8; 64];
        loop {
            if let Some(frame) = protocol::decode(&mut self.pending)? {
                return Ok(frame);
            }
            let count = self.reader.read(&mut buf).await?;
            if count == 0 {
                return Err(LinkError::Closed);
            }
            debug!("USB->RX: {} bytes: {:02x?}", count, &buf[..count]);
            self.pending.extend_from_slice(&buf[..count]);
        }
    }

    pub async fn send(&mut self, frame: HostFrame) -> Result<(), LinkError> {
        let raw = frame.to_bytes();
        self.writer.write_all(&raw).await?;
        self.writer.flush().await?;
        debug!("TX->USB: {:02x?} ({:?})", raw, frame);
        Ok(())
    }
}
