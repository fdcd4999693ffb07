#![allow(dead_code)]
//! Simulated indicator device and remote channel for driving the core.

use async_trait::async_trait;
use shack_gate::comm::Connector;
use shack_gate::config::SyncConfig;
use shack_gate::consts::{ChannelId, HANDSHAKE_ACK, HANDSHAKE_DONE, HANDSHAKE_REQUEST};
use shack_gate::error::{LinkError, RemoteError, SyncError};
use shack_gate::protocol::{Button, DeviceFrame, HostFrame};
use shack_gate::remote::{ChannelUpdate, RemoteChannel};
use shack_gate::sync::{Inbox, SyncCore};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const CHANNEL: ChannelId = 1234;

pub fn test_config() -> SyncConfig {
    SyncConfig {
        channel_id: CHANNEL,
        ..SyncConfig::default()
    }
}

/// Everything the host wrote to any simulated device, in order.
#[derive(Clone, Default)]
pub struct FrameLog(Arc<Mutex<Vec<(Instant, HostFrame)>>>);

impl FrameLog {
    fn push(&self, frame: HostFrame) {
        self.0.lock().unwrap().push((Instant::now(), frame));
    }

    pub fn frames(&self) -> Vec<HostFrame> {
        self.0.lock().unwrap().iter().map(|(_, f)| *f).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, HostFrame)> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn since(&self, start: usize) -> Vec<HostFrame> {
        self.frames()[start..].to_vec()
    }

    pub fn last_led(&self) -> Option<bool> {
        self.frames().iter().rev().find_map(|f| match f {
            HostFrame::Led(on) => Some(*on),
            _ => None,
        })
    }
}

/// Device end of a duplex pipe: answers the handshake, then records frames.
pub struct SimDevice {
    writer: WriteHalf<DuplexStream>,
    task: JoinHandle<()>,
}

impl SimDevice {
    pub fn spawn(log: FrameLog) -> (DuplexStream, SimDevice) {
        let (host, device) = tokio::io::duplex(256);
        let (mut reader, writer) = tokio::io::split(device);
        let task = tokio::spawn(async move {
            if reader.read_u8().await.ok() != Some(HANDSHAKE_ACK) {
                return;
            }
            let mut raw = [0u8; 2];
            while reader.read_exact(&mut raw).await.is_ok() {
                if let Some(frame) = HostFrame::from_bytes(raw) {
                    log.push(frame);
                }
            }
        });

        (host, SimDevice { writer, task })
    }

    pub async fn hello(&mut self) {
        self.writer.write_all(&[HANDSHAKE_REQUEST]).await.unwrap();
        self.writer.write_all(&[HANDSHAKE_DONE]).await.unwrap();
    }

    pub async fn raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub async fn event(&mut self, button: Button, pressed: bool) {
        let raw = DeviceFrame::Button { button, pressed }.to_bytes();
        self.writer.write_all(&raw).await.unwrap();
    }

    pub async fn click(&mut self, button: Button) {
        self.event(button, true).await;
        self.event(button, false).await;
    }

    /// Yank the cable.
    pub fn unplug(self) {
        self.task.abort();
        drop(self.writer);
    }
}

/// Hands out prepared streams in order. `None` entries and an exhausted
/// script make `open` fail.
pub struct ScriptedConnector {
    script: VecDeque<Option<DuplexStream>>,
    opens: Arc<AtomicU32>,
}

impl ScriptedConnector {
    pub fn new(streams: Vec<DuplexStream>) -> (Self, Arc<AtomicU32>) {
        Self::scripted(streams.into_iter().map(Some).collect())
    }

    pub fn scripted(script: Vec<Option<DuplexStream>>) -> (Self, Arc<AtomicU32>) {
        let opens = Arc::new(AtomicU32::new(0));
        (
            Self {
                script: script.into(),
                opens: opens.clone(),
            },
            opens,
        )
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    fn open(&mut self) -> Result<DuplexStream, LinkError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.script
            .pop_front()
            .flatten()
            .ok_or_else(|| LinkError::Io(io::Error::new(io::ErrorKind::NotFound, "no device")))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct RemoteInner {
    name: Mutex<String>,
    renames: Mutex<Vec<String>>,
    fail_renames: AtomicBool,
    fail_reads: AtomicBool,
    rename_delay: Mutex<Duration>,
    echo: Mutex<Option<mpsc::Sender<ChannelUpdate>>>,
}

/// In-memory channel. Successful renames are echoed back like the real
/// gateway does when an echo sender is attached.
#[derive(Clone)]
pub struct FakeRemote(Arc<RemoteInner>);

impl FakeRemote {
    pub fn new(name: &str) -> Self {
        Self(Arc::new(RemoteInner {
            name: Mutex::new(name.to_string()),
            renames: Mutex::new(Vec::new()),
            fail_renames: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            rename_delay: Mutex::new(Duration::ZERO),
            echo: Mutex::new(None),
        }))
    }

    pub fn renames(&self) -> Vec<String> {
        self.0.renames.lock().unwrap().clone()
    }

    pub fn name(&self) -> String {
        self.0.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.0.name.lock().unwrap() = name.to_string();
    }

    pub fn fail_renames(&self, fail: bool) {
        self.0.fail_renames.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.0.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every rename take `delay` before it lands.
    pub fn delay_renames(&self, delay: Duration) {
        *self.0.rename_delay.lock().unwrap() = delay;
    }

    /// Stop echoing renames back.
    pub fn mute_echo(&self) {
        *self.0.echo.lock().unwrap() = None;
    }

    pub fn echo_to(&self, sender: mpsc::Sender<ChannelUpdate>) {
        *self.0.echo.lock().unwrap() = Some(sender);
    }
}

#[async_trait]
impl RemoteChannel for FakeRemote {
    async fn channel_name(&self, _id: ChannelId) -> Result<String, RemoteError> {
        if self.0.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Status(500));
        }
        Ok(self.name())
    }

    async fn rename_channel(&self, id: ChannelId, name: &str) -> Result<(), RemoteError> {
        let delay = *self.0.rename_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.0.renames.lock().unwrap().push(name.to_string());
        if self.0.fail_renames.load(Ordering::SeqCst) {
            return Err(RemoteError::Status(403));
        }
        self.set_name(name);
        let echo = self.0.echo.lock().unwrap().clone();
        if let Some(echo) = echo {
            let _ = echo.try_send(ChannelUpdate {
                channel_id: id,
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// A running core plus the handles tests poke it with.
pub struct Harness {
    pub updates: mpsc::Sender<ChannelUpdate>,
    pub relay: mpsc::Sender<shack_gate::command::RelayRequest>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<(SyncCore<ScriptedConnector, FakeRemote>, Result<(), SyncError>)>,
}

impl Harness {
    pub fn start(config: SyncConfig, connector: ScriptedConnector, remote: FakeRemote) -> Self {
        let (updates, updates_rx) = mpsc::channel(16);
        let (relay, relay_rx) = mpsc::channel(16);
        let (shutdown, shutdown_rx) = watch::channel(false);
        remote.echo_to(updates.clone());

        let mut core = SyncCore::new(config, connector, remote);
        let task = tokio::spawn(async move {
            let mut inbox = Inbox {
                updates: updates_rx,
                relay: relay_rx,
            };
            let result = core.run(&mut inbox, shutdown_rx).await;
            (core, result)
        });
        Self {
            updates,
            relay,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) -> (SyncCore<ScriptedConnector, FakeRemote>, Result<(), SyncError>) {
        let _ = self.shutdown.send(true);
        self.task.await.unwrap()
    }

    /// Wait for the core to exit on its own.
    pub async fn join(self) -> (SyncCore<ScriptedConnector, FakeRemote>, Result<(), SyncError>) {
        self.task.await.unwrap()
    }

    pub async fn rename(&self, name: &str) {
        self.rename_channel(CHANNEL, name).await;
    }

    pub async fn rename_channel(&self, channel_id: ChannelId, name: &str) {
        self.updates
            .send(ChannelUpdate {
                channel_id,
                name: name.to_string(),
            })
            .await
            .unwrap();
    }
}

pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Connected core past its startup grace period.
pub async fn connected(remote: &FakeRemote) -> (Harness, SimDevice, FrameLog) {
    let log = FrameLog::default();
    let (stream, mut device) = SimDevice::spawn(log.clone());
    device.hello().await;
    let (connector, _) = ScriptedConnector::new(vec![stream]);
    let harness = Harness::start(test_config(), connector, remote.clone());
    settle(Duration::from_millis(2500)).await;
    (harness, device, log)
}
