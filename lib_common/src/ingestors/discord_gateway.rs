//! # Discord Gateway Ingestor
//!
//! Resilient WebSocket client for the Discord gateway (v10, JSON encoding).
//! It identifies with a bot token, keeps the heartbeat going, and forwards
//! `READY` and `MESSAGE_CREATE` dispatches to the ingestion task over an mpsc
//! channel, in arrival order.
//!
//! ## Connection Lifecycle:
//! 1.  Connect and wait for HELLO (op 10), which carries the heartbeat interval.
//! 2.  Send IDENTIFY (op 2) with the token and intents.
//! 3.  Heartbeat (op 1) with the last sequence number. If the previous beat
//!     was never acknowledged (op 11) the connection is a zombie and is dropped.
//! 4.  RECONNECT (op 7), INVALID_SESSION (op 9), read errors and remote closes
//!     all end the session; the outer loop reconnects after a delay.
//!
//! Close code 4004 (authentication failed) stops the ingestor for good, since
//! retrying with the same token cannot succeed. Sessions are never resumed; a
//! reconnect always identifies afresh.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::core::message::InboundMessage;

/// Default gateway endpoint.
pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// `GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT`. Embeds on messages that do
/// not mention the bot are only delivered with the message content intent.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Configuration for the gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub gateway_url: String,
    pub token: String,
    pub intents: u64,
    pub reconnect_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: DISCORD_GATEWAY_URL.to_string(),
            token: String::new(),
            intents: DEFAULT_INTENTS,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// What the ingestor hands to its consumer.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The session is identified; `user` is the bot's username.
    Ready { user: String },
    Message(InboundMessage),
}

/// The envelope every gateway frame arrives in.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Reconnect,
    Fatal(String),
    Shutdown,
}

pub struct DiscordGatewayIngestor {
    config: GatewayConfig,
    events: mpsc::Sender<GatewayEvent>,
}

impl DiscordGatewayIngestor {
    pub fn new(config: GatewayConfig, events: mpsc::Sender<GatewayEvent>) -> Self {
        Self { config, events }
    }

    /// Primary execution loop with reconnection logic. Returns on shutdown,
    /// on an authentication failure, or when the consumer goes away.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            log::info!("Connecting to Discord gateway: {}", self.config.gateway_url);

            let end = match connect_async(self.config.gateway_url.as_str()).await {
                Ok((ws_stream, _)) => {
                    log::info!("Connected to Discord gateway.");
                    self.session(ws_stream, &mut shutdown).await
                }
                Err(e) => {
                    log::error!("Failed to connect to Discord gateway: {}", e);
                    SessionEnd::Reconnect
                }
            };

            match end {
                SessionEnd::Shutdown => {
                    log::info!("Gateway ingestor shutting down...");
                    return;
                }
                SessionEnd::Fatal(reason) => {
                    log::error!("Gateway ingestor stopped: {}", reason);
                    return;
                }
                SessionEnd::Reconnect => {
                    log::warn!("Gateway session ended. Reconnecting in {}ms", self.config.reconnect_delay.as_millis());
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn session<S>(&self, ws_stream: S, shutdown: &mut broadcast::Receiver<()>) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();
        let mut seq: Option<u64> = None;
        let mut heartbeat: Option<Interval> = None;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = next_beat(&mut heartbeat) => {
                    if awaiting_ack {
                        log::warn!("Heartbeat not acknowledged. Dropping zombie connection.");
                        return SessionEnd::Reconnect;
                    }
                    if let Err(e) = write.send(Message::Text(heartbeat_frame(seq).into())).await {
                        log::error!("Failed to send heartbeat: {}", e);
                        return SessionEnd::Reconnect;
                    }
                    awaiting_ack = true;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => return close_reason(frame.map(|f| u16::from(f.code))),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            log::error!("Gateway read error: {}", e);
                            return SessionEnd::Reconnect;
                        }
                        None => {
                            log::warn!("Gateway stream closed by remote host.");
                            return SessionEnd::Reconnect;
                        }
                    };

                    let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::warn!("Undecodable gateway frame skipped: {}", e);
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }

                    match payload.op {
                        OP_HELLO => {
                            let period = hello_interval(&payload.d);
                            log::debug!("Gateway HELLO, heartbeat every {}ms", period.as_millis());
                            let mut beat = interval_at(Instant::now() + period, period);
                            beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            heartbeat = Some(beat);
                            awaiting_ack = false;

                            if let Err(e) = write.send(Message::Text(self.identify_frame().into())).await {
                                log::error!("Failed to identify: {}", e);
                                return SessionEnd::Reconnect;
                            }
                        }
                        OP_HEARTBEAT => {
                            if let Err(e) = write.send(Message::Text(heartbeat_frame(seq).into())).await {
                                log::error!("Failed to answer heartbeat request: {}", e);
                                return SessionEnd::Reconnect;
                            }
                        }
                        OP_HEARTBEAT_ACK => awaiting_ack = false,
                        OP_RECONNECT => {
                            log::info!("Gateway requested a reconnect.");
                            return SessionEnd::Reconnect;
                        }
                        OP_INVALID_SESSION => {
                            log::warn!("Gateway session invalidated.");
                            return SessionEnd::Reconnect;
                        }
                        OP_DISPATCH => {
                            if let Some(event) = dispatch_event(payload.t.as_deref(), payload.d) {
                                if self.events.send(event).await.is_err() {
                                    log::info!("Event consumer dropped. Closing gateway session.");
                                    let _ = write.close().await;
                                    return SessionEnd::Shutdown;
                                }
                            }
                        }
                        other => log::trace!("Ignoring gateway op {}", other),
                    }
                }
            }
        }
    }

    fn identify_frame(&self) -> String {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.config.token,
                "intents": self.config.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "lib_common",
                    "device": "lib_common"
                }
            }
        })
        .to_string()
    }
}

/// Resolves on the next heartbeat tick, or never before HELLO.
async fn next_beat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(beat) => {
            beat.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn heartbeat_frame(seq: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": seq }).to_string()
}

fn hello_interval(d: &Value) -> Duration {
    let millis = d.get("heartbeat_interval").and_then(Value::as_u64).unwrap_or(41_250);
    Duration::from_millis(millis.max(1))
}

fn close_reason(code: Option<u16>) -> SessionEnd {
    match code {
        Some(CLOSE_AUTHENTICATION_FAILED) => SessionEnd::Fatal("authentication failed (close code 4004)".to_string()),
        Some(code) => {
            log::warn!("Gateway closed the connection with code {}", code);
            SessionEnd::Reconnect
        }
        None => {
            log::warn!("Gateway closed the connection.");
            SessionEnd::Reconnect
        }
    }
}

/// Maps a DISPATCH frame to an event. Payloads that fail to decode are
/// logged and dropped so one bad message never stalls the stream.
fn dispatch_event(event_type: Option<&str>, d: Value) -> Option<GatewayEvent> {
    match event_type? {
        "READY" => {
            let user = d
                .pointer("/user/username")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            Some(GatewayEvent::Ready { user })
        }
        "MESSAGE_CREATE" => match serde_json::from_value::<InboundMessage>(d) {
            Ok(message) => Some(GatewayEvent::Message(message)),
            Err(e) => {
                log::warn!("Skipping undecodable MESSAGE_CREATE: {}", e);
                None
            }
        },
        _ => None,
    }
}
