use crate::command::RelayRequest;
use crate::comm::{Connector, Device};
use crate::config::SyncConfig;
use crate::consts::{BLINKS_CONFIRM, BLINKS_COOLDOWN, BLINKS_REMOTE_FAILURE, BLINK_STEP};
use crate::error::{LinkError, RemoteError, SyncError};
use crate::protocol::{Button, DeviceFrame, HostFrame};
use crate::remote::{ChannelUpdate, RemoteChannel};
use crate::supervisor::Supervisor;
use crate::timing::{Cooldown, HoldAction, PowerHold};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// State shared between button handling and rename notifications.
#[derive(Debug, Default)]
pub struct SyncState {
    /// Authoritative LED state: true means open.
    pub led: bool,
    /// Name requested by our own rename. The next notification is its echo.
    pub pending_echo: Option<String>,
}

/// Queues feeding the device loop.
pub struct Inbox {
    pub updates: mpsc::Receiver<ChannelUpdate>,
    pub relay: mpsc::Receiver<RelayRequest>,
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RemoteError::Timeout))
}

/// Sleep one blink step. False when shutdown was requested meanwhile.
async fn blink_pause(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(BLINK_STEP) => true,
    }
}

/// Keeps the device LED in sync with the remote channel name.
///
/// Owns the device handle exclusively. Rename notifications and command
/// socket requests reach it through [`Inbox`] and are handled on the same
/// loop, so state updates never interleave.
pub struct SyncCore<C: Connector, R: RemoteChannel> {
    config: SyncConfig,
    connector: C,
    remote: R,
    state: SyncState,
    cooldown: Cooldown,
    hold: PowerHold,
    supervisor: Supervisor,
}

impl<C: Connector, R: RemoteChannel> SyncCore<C, R> {
    pub fn new(config: SyncConfig, connector: C, remote: R) -> Self {
        Self {
            cooldown: Cooldown::new(config.press_delay),
            hold: PowerHold::new(config.hold_confirm, config.blink_half_period),
            supervisor: Supervisor::new(config.usb_retries, config.retry_backoff),
            config,
            connector,
            remote,
            state: SyncState::default(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn power_state(&self) -> bool {
        self.hold.power_state()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Main device loop. Returns Ok on shutdown and Err only when the
    /// device is gone for good.
    pub async fn run(
        &mut self,
        inbox: &mut Inbox,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        info!("Connecting to {}", self.connector.describe());
        let mut device = match self.connect_with_retry(&mut shutdown).await {
            Err(SyncError::Shutdown) => return Ok(()),
            other => other?,
        };

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            let step = tokio::select! {
                _ = shutdown.changed() => break,
                frame = device.next_frame() => match frame {
                    Ok(frame) => self.on_frame(&mut device, frame, &shutdown).await,
                    Err(err) => Err(err),
                },
                Some(update) = inbox.updates.recv() => {
                    self.on_channel_update(&mut device, update).await
                }
                Some(request) = inbox.relay.recv() => {
                    self.on_relay_request(&mut device, request).await
                }
                _ = tick.tick() => self.on_tick(&mut device, &shutdown).await,
            };

            if let Err(err) = step {
                self.supervisor.lost(&err);
                // Close before reopening, the port is exclusive.
                drop(device);
                device = match self.connect_with_retry(&mut shutdown).await {
                    Err(SyncError::Shutdown) => break,
                    other => other?,
                };
            }
        }
        info!("Device loop finishing");
        Ok(())
    }

    /// Open, handshake and resync, retrying with a fixed backoff until the
    /// supervisor gives up.
    async fn connect_with_retry(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Device<C::Stream>, SyncError> {
        loop {
            if *shutdown.borrow() {
                return Err(SyncError::Shutdown);
            }
            self.supervisor.attempting();
            let attempt = tokio::select! {
                _ = shutdown.changed() => return Err(SyncError::Shutdown),
                attempt = self.connect() => attempt,
            };
            match attempt {
                Ok(device) => {
                    self.supervisor.connected();
                    // Any hold in progress died with the old connection.
                    self.hold.release();
                    return Ok(device);
                }
                Err(err) => {
                    self.supervisor.failed(&err)?;
                    tokio::select! {
                        _ = shutdown.changed() => return Err(SyncError::Shutdown),
                        _ = tokio::time::sleep(self.supervisor.backoff()) => {}
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<Device<C::Stream>, SyncError> {
        let stream = self.connector.open()?;
        let mut device = Device::establish(stream, self.config.handshake_timeout).await?;
        self.resync(&mut device).await?;
        Ok(device)
    }

    /// Derive the LED state from the channel name.
    async fn resync(&mut self, device: &mut Device<C::Stream>) -> Result<(), SyncError> {
        let name = bounded(
            self.config.remote_timeout,
            self.remote.channel_name(self.config.channel_id),
        )
        .await?;
        let open = self.config.is_open(&name);
        info!(name = %name, open, "Resynced with remote channel");
        self.set_led(device, open).await?;
        Ok(())
    }

    async fn set_led(&mut self, device: &mut Device<C::Stream>, on: bool) -> Result<(), LinkError> {
        device.send(HostFrame::Led(on)).await?;
        self.state.led = on;
        Ok(())
    }

    /// Flash the LED `times` times, then show the real state again.
    ///
    /// Cut short by shutdown, in which case the LED is left as is.
    async fn blink(
        &mut self,
        device: &mut Device<C::Stream>,
        times: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let mut stop = shutdown.clone();
        for _ in 0..times {
            device.send(HostFrame::Led(false)).await?;
            if !blink_pause(&mut stop).await {
                return Ok(());
            }
            device.send(HostFrame::Led(true)).await?;
            if !blink_pause(&mut stop).await {
                return Ok(());
            }
        }
        device.send(HostFrame::Led(self.state.led)).await
    }

    async fn on_frame(
        &mut self,
        device: &mut Device<C::Stream>,
        frame: DeviceFrame,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let now = Instant::now();
        if now.saturating_duration_since(device.connected_at()) < self.config.startup_grace {
            debug!("Discarding {:?} received during startup grace", frame);
            return Ok(());
        }

        match frame {
            DeviceFrame::Button {
                button: Button::Toggle,
                pressed: true,
            } => self.on_toggle_press(device, now, shutdown).await,
            DeviceFrame::Button {
                button: Button::PowerOn,
                pressed: true,
            } => {
                info!("Power-on button held");
                self.hold.press(now, self.state.led);
                Ok(())
            }
            DeviceFrame::Button {
                button: Button::PowerOn,
                pressed: false,
            } => {
                if self.hold.release() {
                    device.send(HostFrame::Led(self.state.led)).await?;
                }
                Ok(())
            }
            DeviceFrame::Button {
                button: Button::PowerOff,
                pressed: true,
            } => {
                info!("Power off");
                self.hold.power_off();
                device.send(HostFrame::Relay(false)).await
            }
            // Release edges of toggle and power-off carry no meaning.
            DeviceFrame::Button { .. } => Ok(()),
        }
    }

    async fn on_toggle_press(
        &mut self,
        device: &mut Device<C::Stream>,
        now: Instant,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        if let Err(remaining) = self.cooldown.try_accept(now) {
            info!(
                "Button pressed too soon, there is {:.1}s left",
                remaining.as_secs_f64()
            );
            return self.blink(device, BLINKS_COOLDOWN, shutdown).await;
        }

        let open = !self.state.led;
        let target = self.config.name_for(open).to_string();
        self.state.pending_echo = Some(target.clone());
        let result = bounded(
            self.config.remote_timeout,
            self.remote.rename_channel(self.config.channel_id, &target),
        )
        .await;

        match result {
            Ok(()) => {
                self.set_led(device, open).await?;
                info!("Button pressed, LED state: {}", open);
                Ok(())
            }
            Err(err) => {
                self.state.pending_echo = None;
                warn!("Failed to update channel: {}", err);
                self.blink(device, BLINKS_REMOTE_FAILURE, shutdown).await
            }
        }
    }

    async fn on_channel_update(
        &mut self,
        device: &mut Device<C::Stream>,
        update: ChannelUpdate,
    ) -> Result<(), LinkError> {
        if let Some(expected) = self.state.pending_echo.take() {
            if update.name == expected {
                debug!("Ignoring echo of our own rename to {}", expected);
            } else {
                warn!(
                    "Ignored update {:?} while expecting echo of {}",
                    update, expected
                );
            }
            return Ok(());
        }

        if update.channel_id != self.config.channel_id {
            debug!("Update for another channel {}", update.channel_id);
            return Ok(());
        }

        let open = self.config.is_open(&update.name);
        info!("Channel renamed to {}, LED state: {}", update.name, open);
        self.set_led(device, open).await
    }

    async fn on_relay_request(
        &mut self,
        device: &mut Device<C::Stream>,
        request: RelayRequest,
    ) -> Result<(), LinkError> {
        info!("Relay {} requested by {}", request.on, request.peer);
        device.send(HostFrame::RemoteRelay(request.on)).await
    }

    async fn on_tick(
        &mut self,
        device: &mut Device<C::Stream>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        match self.hold.poll(Instant::now()) {
            Some(HoldAction::Blink(on)) => device.send(HostFrame::Led(on)).await,
            Some(HoldAction::Confirm) => {
                info!("Power-on hold confirmed");
                device.send(HostFrame::Relay(true)).await?;
                self.blink(device, BLINKS_CONFIRM, shutdown).await
            }
            None => Ok(()),
        }
    }
}
