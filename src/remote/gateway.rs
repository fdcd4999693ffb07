use super::ChannelUpdate;
use crate::consts::{ChannelId, GATE_NAME};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Wait before reconnecting a dropped gateway session.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: u64,
    pub api_version: u8,
}

#[derive(Deserialize, Debug)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// What the session loop has to do with an inbound payload.
#[derive(Debug, PartialEq)]
enum GatewayEvent {
    Hello { heartbeat_interval: Duration },
    HeartbeatRequest,
    HeartbeatAck,
    Dispatch {
        seq: Option<u64>,
        update: Option<ChannelUpdate>,
    },
    /// Server wants us to reconnect.
    Reconnect,
    Other(u8),
}

fn parse_channel_update(data: &Value) -> Option<ChannelUpdate> {
    let channel_id: ChannelId = data.get("id")?.as_str()?.parse().ok()?;
    let name = data.get("name")?.as_str()?.to_string();
    Some(ChannelUpdate { channel_id, name })
}

fn interpret(text: &str) -> Result<GatewayEvent, serde_json::Error> {
    let payload: Payload = serde_json::from_str(text)?;
    Ok(match payload.op {
        op::HELLO => {
            let millis = payload
                .d
                .get("heartbeat_interval")
                .and_then(Value::as_u64)
                .unwrap_or(41_250);
            GatewayEvent::Hello {
                heartbeat_interval: Duration::from_millis(millis),
            }
        }
        op::HEARTBEAT => GatewayEvent::HeartbeatRequest,
        op::HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
        op::DISPATCH => {
            let update = match payload.t.as_deref() {
                Some("CHANNEL_UPDATE") => parse_channel_update(&payload.d),
                Some("READY") => {
                    info!("Gateway ready");
                    None
                }
                other => {
                    debug!("Unhandled event {:?}", other);
                    None
                }
            };
            GatewayEvent::Dispatch {
                seq: payload.s,
                update,
            }
        }
        op::RECONNECT | op::INVALID_SESSION => GatewayEvent::Reconnect,
        other => GatewayEvent::Other(other),
    })
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Gateway subscription forwarding channel renames to the core.
pub struct Gateway {
    config: GatewayConfig,
    url: String,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let url = format!(
            "wss://gateway.discord.gg/?v={}&encoding=json",
            config.api_version
        );
        Self { config, url }
    }

    fn identify(&self) -> String {
        json!({
            "op": op::IDENTIFY,
            "d": {
                "token": self.config.token,
                "intents": self.config.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": GATE_NAME,
                    "device": GATE_NAME,
                }
            }
        })
        .to_string()
    }

    /// One websocket session. Returns Ok(true) when shutdown was requested.
    async fn session(
        &self,
        updates: &mpsc::Sender<ChannelUpdate>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<bool> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("Connected to gateway");
        let (mut sink, mut stream) = ws.split();
        let mut heartbeat: Option<Interval> = None;
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return Ok(true);
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    let beat = json!({"op": op::HEARTBEAT, "d": sequence}).to_string();
                    sink.send(Message::Text(beat)).await?;
                }
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            warn!("Gateway closed the session: {:?}", frame);
                            return Ok(false);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return Err(err.into()),
                        None => return Ok(false),
                    };
                    let event = match interpret(&text) {
                        Ok(event) => event,
                        Err(err) => {
                            warn!("Unparsable gateway payload: {}", err);
                            continue;
                        }
                    };
                    match event {
                        GatewayEvent::Hello { heartbeat_interval } => {
                            // First beat is jittered.
                            let jitter = heartbeat_interval.mul_f64(rand::random::<f64>());
                            heartbeat = Some(interval_at(Instant::now() + jitter, heartbeat_interval));
                            sink.send(Message::Text(self.identify())).await?;
                        }
                        GatewayEvent::HeartbeatRequest => {
                            let beat = json!({"op": op::HEARTBEAT, "d": sequence}).to_string();
                            sink.send(Message::Text(beat)).await?;
                        }
                        GatewayEvent::HeartbeatAck => {}
                        GatewayEvent::Dispatch { seq, update } => {
                            if seq.is_some() {
                                sequence = seq;
                            }
                            if let Some(update) = update {
                                info!("Got channel update {:?}", update);
                                if updates.send(update).await.is_err() {
                                    // Nobody listens anymore.
                                    return Ok(true);
                                }
                            }
                        }
                        GatewayEvent::Reconnect => {
                            info!("Gateway requested reconnect");
                            return Ok(false);
                        }
                        GatewayEvent::Other(code) => debug!("Ignoring gateway op {}", code),
                    }
                }
            }
        }
    }

    /// Keep a session alive until shutdown, reconnecting on failures.
    pub async fn run(self, updates: mpsc::Sender<ChannelUpdate>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            match self.session(&updates, &mut shutdown).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => error!("Gateway session failed: {:?}", err),
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        info!("Gateway task finishing");
    }
}
