//! Gateway (WebSocket) connection to Discord.
//!
//! Owns the connection lifecycle:
//!   - connect, read HELLO, send IDENTIFY (or RESUME when a session exists)
//!   - background heartbeat at the interval HELLO announced
//!   - sequence number and session tracking
//!   - reconnect with exponential backoff
//!   - outbound send budget (120 payloads per 60 s)
//!
//! The bot only sees the [`GatewayEvent`] stream on [`GatewayHandle::events`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::{GatewayPayload, Intents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

const MAX_RECONNECT_ATTEMPTS: u32 = 8;
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("bad HELLO: {0}")]
    Hello(String),
    #[error("failed to encode gateway payload: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Send budget
// ---------------------------------------------------------------------------

/// Sliding window over recent sends.
struct SendRateLimiter {
    sent: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            sent: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long to wait before the next send, if at all. Does not record.
    fn delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let in_window = self
            .sent
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window);
        if (in_window.clone().count() as u32) < self.budget {
            return None;
        }
        in_window
            .min()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    fn record(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.sent.retain(|&t| now.duration_since(t) < window);
        self.sent.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration and session
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    pub url: String,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": 2,
            "d": {
                "token": self.token,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "cardinfo-bot",
                    "device": "cardinfo-bot"
                },
                "intents": self.intents.bits(),
            }
        })
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("url", &self.url)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct Session {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl Session {
    /// RESUME payload, when there is a session to resume.
    fn resume(&self, token: &str) -> Option<Value> {
        let (session_id, seq) = (self.session_id.as_ref()?, self.sequence?);
        Some(json!({
            "op": 6,
            "d": { "token": token, "session_id": session_id, "seq": seq }
        }))
    }

    fn connect_url(&self, default: &str) -> String {
        let url = self.resume_gateway_url.as_deref().unwrap_or(default);
        if url.contains("v=10") {
            url.to_string()
        } else if url.contains('?') {
            format!("{}&v=10&encoding=json", url)
        } else {
            format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
        }
    }

    fn forget(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

pub struct GatewayHandle {
    pub events: async_channel::Receiver<GatewayEvent>,
    pub driver: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver. The driver stops once [`GatewayHandle::events`]
/// is dropped, on a fatal close code, or after too many failed reconnects.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, event_rx) = async_channel::bounded(256);
    let driver = tokio::spawn(drive(config, event_tx));
    GatewayHandle {
        events: event_rx,
        driver,
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectReason {
    Resume,
    Reidentify,
    Fatal,
    Closed,
}

async fn drive(config: GatewayConfig, event_tx: async_channel::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(Session::default()));
    let limiter = Arc::new(Mutex::new(SendRateLimiter::new(
        SEND_BUDGET_MAX,
        SEND_BUDGET_WINDOW,
    )));
    let mut attempt: u32 = 0;

    loop {
        let reason = match run_session(&config, &session, &limiter, &event_tx).await {
            Ok(reason) => {
                attempt = 0;
                reason
            }
            Err(e) => {
                error!(error = %e, "gateway connection failed");
                DisconnectReason::Resume
            }
        };

        match reason {
            DisconnectReason::Resume => info!("will attempt RESUME"),
            DisconnectReason::Reidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.forget();
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway close, shutting down");
                event_tx.close();
                return;
            }
            DisconnectReason::Closed => {
                info!("event channel closed, stopping gateway");
                return;
            }
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(attempts = attempt - 1, "giving up on gateway reconnects");
            event_tx.close();
            return;
        }
        let delay = backoff_delay(attempt);
        warn!(
            delay_ms = delay.as_millis() as u64,
            attempt, "reconnecting after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One connection from handshake to disconnect.
async fn run_session(
    config: &GatewayConfig,
    session: &Arc<Mutex<Session>>,
    limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
) -> Result<DisconnectReason, GatewayError> {
    let url = session.lock().await.connect_url(&config.url);
    info!(url = %url, "connecting to Discord gateway");

    let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (sink, mut read) = stream.split();
    let sink = Arc::new(Mutex::new(sink));

    let interval = read_hello(&mut read).await?;
    info!(interval_ms = interval, "received HELLO");

    let resume = session.lock().await.resume(&config.token);
    match resume {
        Some(payload) => {
            send(&sink, limiter, &payload).await?;
            info!("sent RESUME");
        }
        None => {
            send(&sink, limiter, &config.identify()).await?;
            info!("sent IDENTIFY");
        }
    }

    let heartbeat = tokio::spawn(heartbeat_loop(
        Duration::from_millis(interval),
        Arc::clone(&sink),
        Arc::clone(limiter),
        Arc::clone(session),
    ));

    let reason = read_loop(&mut read, &sink, limiter, session, event_tx).await;

    heartbeat.abort();
    let _ = sink.lock().await.send(WsMessage::Close(None)).await;
    Ok(reason)
}

async fn heartbeat_loop(
    every: Duration,
    sink: Arc<Mutex<WsSink>>,
    limiter: Arc<Mutex<SendRateLimiter>>,
    session: Arc<Mutex<Session>>,
) {
    // First beat after `interval * jitter`.
    let jitter = rand::random::<f64>();
    tokio::time::sleep(every.mul_f64(jitter)).await;

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = send(&sink, &limiter, &json!({ "op": 1, "d": seq })).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat");
            return;
        }
        debug!(seq, "sent heartbeat");
    }
}

async fn read_loop(
    read: &mut WsRead,
    sink: &Arc<Mutex<WsSink>>,
    limiter: &Arc<Mutex<SendRateLimiter>>,
    session: &Arc<Mutex<Session>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
) -> DisconnectReason {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code));
                warn!(close_code = ?code, "gateway closed by server");
                return code.map(close_reason).unwrap_or(DisconnectReason::Resume);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "gateway read error");
                return DisconnectReason::Resume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };
        if let Some(seq) = payload.s {
            session.lock().await.sequence = Some(seq);
        }

        let event = GatewayEvent::from_payload(payload);
        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
            }
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = send(sink, limiter, &json!({ "op": 1, "d": seq })).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect");
                return DisconnectReason::Resume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated");
                let wait = rand::random::<f64>().mul_add(4.0, 1.0);
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                return if *resumable {
                    DisconnectReason::Resume
                } else {
                    DisconnectReason::Reidentify
                };
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            return DisconnectReason::Closed;
        }
    }

    info!("gateway stream ended");
    DisconnectReason::Resume
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 4004 and 4010-4014 cannot be fixed by reconnecting. 4007 and 4009 mean the
/// session is gone.
fn close_reason(code: u16) -> DisconnectReason {
    match code {
        4004 | 4010..=4014 => DisconnectReason::Fatal,
        4007 | 4009 => DisconnectReason::Reidentify,
        _ => DisconnectReason::Resume,
    }
}

async fn read_hello(read: &mut WsRead) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, read.next())
        .await
        .map_err(|_| GatewayError::Hello("timed out".into()))?
        .ok_or_else(|| GatewayError::Hello("stream ended".into()))??;

    let WsMessage::Text(text) = msg else {
        return Err(GatewayError::Hello(format!("unexpected frame {:?}", msg)));
    };
    parse_hello(&text)
}

fn parse_hello(text: &str) -> Result<u64, GatewayError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    if payload.op != 10 {
        return Err(GatewayError::Hello(format!("expected op 10, got op {}", payload.op)));
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::Hello("missing heartbeat_interval".into()))
}

/// Send `payload`, waiting for send budget first.
async fn send(
    sink: &Arc<Mutex<WsSink>>,
    limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &Value,
) -> Result<(), GatewayError> {
    loop {
        let delay = limiter.lock().await.delay();
        let Some(delay) = delay else { break };
        debug!(delay_ms = delay.as_millis() as u64, "gateway send budget exhausted");
        tokio::time::sleep(delay).await;
    }
    limiter.lock().await.record();

    let text = serde_json::to_string(payload)?;
    sink.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(close_reason(4004), DisconnectReason::Fatal);
        assert_eq!(close_reason(4014), DisconnectReason::Fatal);
        assert_eq!(close_reason(4009), DisconnectReason::Reidentify);
        assert_eq!(close_reason(4000), DisconnectReason::Resume);
        assert_eq!(close_reason(1000), DisconnectReason::Resume);
    }

    #[test]
    fn backoff_is_bounded() {
        for attempt in 1..=12 {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_secs(60));
        }
    }

    #[test]
    fn hello_parsing() {
        assert_eq!(
            parse_hello(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#).unwrap(),
            41250
        );
        assert!(matches!(
            parse_hello(r#"{"op":0,"d":{},"s":null,"t":"READY"}"#),
            Err(GatewayError::Hello(_))
        ));
        assert!(matches!(parse_hello("nope"), Err(GatewayError::Encode(_))));
    }

    #[test]
    fn identify_carries_intents_and_token() {
        let config = GatewayConfig::new("secret", Intents::GUILDS);
        let identify = config.identify();
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "secret");
        assert_eq!(identify["d"]["intents"], 1);
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn resume_needs_session_and_sequence() {
        let mut session = Session::default();
        assert!(session.resume("t").is_none());
        session.session_id = Some("abc".into());
        assert!(session.resume("t").is_none());
        session.sequence = Some(42);
        let resume = session.resume("t").unwrap();
        assert_eq!(resume["op"], 6);
        assert_eq!(resume["d"]["seq"], 42);

        session.forget();
        assert!(session.resume("t").is_none());
    }

    #[test]
    fn connect_url_prefers_resume_url() {
        let mut session = Session::default();
        assert_eq!(session.connect_url(DEFAULT_GATEWAY_URL), DEFAULT_GATEWAY_URL);
        session.resume_gateway_url = Some("wss://gateway-us-east1-c.discord.gg".into());
        assert_eq!(
            session.connect_url(DEFAULT_GATEWAY_URL),
            "wss://gateway-us-east1-c.discord.gg/?v=10&encoding=json"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_budget_window() {
        let mut limiter = SendRateLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.delay(), None);
        limiter.record();
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.record();
        assert_eq!(limiter.delay(), Some(Duration::from_secs(50)));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(limiter.delay(), None);
    }
}
