//! The per-shard gateway session state machine (§4.2): one task owns a
//! websocket connection to Discord, speaks HELLO/IDENTIFY/RESUME/HEARTBEAT,
//! and republishes a [`SessionSnapshot`] every time something worth
//! reporting happens.

use crate::{
    error::{Error, Result},
    metrics::{Latency, ShardMetrics},
};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use shardline_model::{
    DispatchEvent, HeartbeatPayload, HelloData, IdentifyPayload, InboundPayload, Intents,
    InvalidSessionData, Opcode, ReadyData, ResumePayload, ShardStatus,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};
use tokio::{net::TcpStream, sync::mpsc, sync::watch, task::JoinHandle};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands a [`GatewaySession`] handle can send into its background task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Close the connection and stop; auto-reconnect is disabled.
    Disconnect,
}

/// Sink a session forwards decoded `Dispatch` events into. Modeled as a
/// channel rather than a trait object so a session never blocks waiting on
/// slow application code.
pub type Dispatcher = mpsc::UnboundedSender<DispatchEvent>;

/// Sink a session reports fatal errors to (§7): invoked at most once, right
/// before the session gives up and [`Outcome::Disconnect`]s for good. A
/// close code of 4004 (Authentication failure) is the only close code this
/// session treats as fatal; every other close falls back to the normal
/// reconnect path.
pub type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

const AUTHENTICATION_FAILED_CLOSE_CODE: u16 = 4004;

fn is_fatal_close(code: Option<u16>) -> bool {
    code == Some(AUTHENTICATION_FAILED_CLOSE_CODE)
}

/// Pulls the guild snowflake out of a `GUILD_CREATE`/`GUILD_DELETE` dispatch
/// payload. Discord sends ids as strings to avoid precision loss in
/// JSON-number clients, so this parses rather than reading a number.
fn guild_id_from_payload(data: &serde_json::Value) -> Option<u64> {
    data.get("id")?.as_str()?.parse().ok()
}

/// Fine-grained connection stage. Coarser than [`ShardStatus`], which is
/// what gets reported to peers; see [`Stage::status`] for the mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
    Failed,
}

impl Stage {
    pub const fn status(self) -> ShardStatus {
        match self {
            Self::Disconnected => ShardStatus::Disconnected,
            Self::Connecting => ShardStatus::Connecting,
            Self::Authenticating => ShardStatus::Connected,
            Self::Ready => ShardStatus::Ready,
            Self::Reconnecting => ShardStatus::Reconnecting,
            Self::Failed => ShardStatus::Failed,
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.status(), f)
    }
}

/// A point-in-time view of a session, published over a `watch` channel so
/// the owning [`ShardRunner`](crate::runner::ShardRunner) can read it
/// without holding a lock across an await point.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub session_id: Option<String>,
    pub sequence: u64,
    pub latency: Option<Duration>,
    pub reconnects: u32,
}

/// Everything a session needs to establish and re-establish a connection.
#[derive(Clone, Debug)]
pub struct GatewaySessionConfig {
    pub token: String,
    pub intents: Intents,
    pub shard: Option<(u32, u32)>,
    pub gateway_url: String,
}

/// A handle to a running gateway session task.
#[derive(Debug)]
pub struct GatewaySession {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl GatewaySession {
    pub fn connect(config: GatewaySessionConfig, dispatcher: Dispatcher, metrics: Arc<ShardMetrics>, error_sink: ErrorSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let handle = tokio::spawn(run_session(config, dispatcher, metrics, error_sink, command_rx, snapshot_tx));

        Self { commands: command_tx, handle, snapshot: snapshot_rx }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the session to close and stop reconnecting, then wait for its
    /// task to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Disconnect);
        let _ = self.handle.await;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AuthAction {
    Identify,
    Resume,
}

fn next_auth_action(session_id: &Option<String>, sequence: u64) -> AuthAction {
    match session_id {
        Some(_) if sequence > 0 => AuthAction::Resume,
        _ => AuthAction::Identify,
    }
}

fn invalid_session_action(resumable: bool) -> AuthAction {
    if resumable {
        AuthAction::Resume
    } else {
        AuthAction::Identify
    }
}

/// `min(30000, 1000 * 2^min(8, attempt)) + rand(0, 500)` milliseconds.
fn reconnect_delay(attempt: u32) -> Duration {
    let exponential = 1000u64.saturating_mul(1u64 << attempt.min(8));
    let base = exponential.min(30_000);
    let jitter = rand::thread_rng().gen_range(0..=500);
    Duration::from_millis(base + jitter)
}

fn build_url(base: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(base).map_err(|_| Error::invalid_url(base))?;
    url.query_pairs_mut().append_pair("v", "10").append_pair("encoding", "json");
    Ok(url)
}

fn publish(
    tx: &watch::Sender<SessionSnapshot>,
    stage: Stage,
    session_id: &Option<String>,
    sequence: u64,
    latency: &Latency,
    reconnects: u32,
) {
    let _ = tx.send(SessionSnapshot {
        stage,
        session_id: session_id.clone(),
        sequence,
        latency: latency.most_recent(),
        reconnects,
    });
}

enum Flow {
    Continue,
    Stop,
}

async fn wait_or_stop(commands: &mut mpsc::UnboundedReceiver<Command>, delay: Duration) -> Flow {
    tokio::select! {
        () = tokio::time::sleep(delay) => Flow::Continue,
        command = commands.recv() => match command {
            Some(Command::Disconnect) | None => Flow::Stop,
        },
    }
}

enum PayloadOutcome {
    Payload(std::result::Result<InboundPayload, ()>),
    Closed(Option<u16>),
}

async fn next_payload(stream: &mut GatewayStream) -> Option<PayloadOutcome> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(PayloadOutcome::Payload(serde_json::from_str(&text).map_err(|_| ()))),
            Ok(Message::Binary(bytes)) => return Some(PayloadOutcome::Payload(serde_json::from_slice(&bytes).map_err(|_| ()))),
            Ok(Message::Close(frame)) => return Some(PayloadOutcome::Closed(frame.map(|frame| frame.code.into()))),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(_) => return Some(PayloadOutcome::Payload(Err(()))),
        }
    }
}

async fn send_json<T: serde::Serialize>(
    stream: &mut GatewayStream,
    metrics: &ShardMetrics,
    payload: &T,
) -> std::result::Result<(), ()> {
    let text = serde_json::to_string(payload).map_err(|_| ())?;
    stream.send(Message::Text(text)).await.map_err(|_| ())?;
    metrics.events.record_command();
    Ok(())
}

async fn send_auth(
    stream: &mut GatewayStream,
    metrics: &ShardMetrics,
    config: &GatewaySessionConfig,
    session_id: &Option<String>,
    sequence: u64,
) -> std::result::Result<(), ()> {
    match next_auth_action(session_id, sequence) {
        AuthAction::Identify => {
            let payload = IdentifyPayload::new(config.token.clone(), config.intents, config.shard);
            send_json(stream, metrics, &payload).await
        }
        AuthAction::Resume => {
            let payload =
                ResumePayload::new(config.token.clone(), session_id.clone().expect("resume requires a session id"), sequence);
            send_json(stream, metrics, &payload).await
        }
    }
}

enum Outcome {
    Disconnect,
    Reconnect,
}

#[allow(clippy::too_many_arguments)]
async fn run_connected(
    mut stream: GatewayStream,
    config: &GatewaySessionConfig,
    dispatcher: &Dispatcher,
    metrics: &ShardMetrics,
    error_sink: &ErrorSink,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    session_id: &mut Option<String>,
    sequence: &mut u64,
    latency: &mut Latency,
    reconnects: &mut u32,
) -> Outcome {
    let hello_frame = match next_payload(&mut stream).await {
        Some(PayloadOutcome::Payload(Ok(frame))) => frame,
        Some(PayloadOutcome::Closed(code)) if is_fatal_close(code) => {
            error_sink(Error::authentication(code.unwrap_or_default()));
            publish(snapshot_tx, Stage::Failed, session_id, *sequence, latency, *reconnects);
            return Outcome::Disconnect;
        }
        _ => return Outcome::Reconnect,
    };
    if !matches!(hello_frame.op, Opcode::Hello) {
        return Outcome::Reconnect;
    }
    let Ok(hello) = serde_json::from_value::<HelloData>(hello_frame.d) else {
        return Outcome::Reconnect;
    };

    if send_auth(&mut stream, metrics, config, session_id, *sequence).await.is_err() {
        return Outcome::Reconnect;
    }
    publish(snapshot_tx, Stage::Authenticating, session_id, *sequence, latency, *reconnects);

    let mut heartbeat_interval = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval.max(1)));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat_interval.tick().await;

    let mut awaiting_ack = false;
    let mut missed_acks: u8 = 0;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                match command {
                    Some(Command::Disconnect) | None => {
                        let _ = stream.close(None).await;
                        return Outcome::Disconnect;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_ack {
                    missed_acks += 1;
                    if missed_acks >= 2 {
                        tracing::warn!("missed two heartbeat acks in a row; reconnecting");
                        return Outcome::Reconnect;
                    }
                }

                let payload = HeartbeatPayload::new((*sequence > 0).then_some(*sequence));
                if send_json(&mut stream, metrics, &payload).await.is_err() {
                    return Outcome::Reconnect;
                }
                latency.track_sent();
                awaiting_ack = true;
            }

            frame = next_payload(&mut stream) => {
                let payload = match frame {
                    Some(PayloadOutcome::Payload(Ok(payload))) => payload,
                    Some(PayloadOutcome::Closed(code)) if is_fatal_close(code) => {
                        error_sink(Error::authentication(code.unwrap_or_default()));
                        publish(snapshot_tx, Stage::Failed, session_id, *sequence, latency, *reconnects);
                        return Outcome::Disconnect;
                    }
                    _ => return Outcome::Reconnect,
                };

                if let Some(seq) = payload.s {
                    *sequence = seq;
                }

                match payload.op {
                    Opcode::Dispatch => {
                        let Some(name) = payload.t.clone() else { continue };
                        metrics.events.record_event();

                        match name.as_str() {
                            "READY" => match serde_json::from_value::<ReadyData>(payload.d.clone()) {
                                Ok(ready) => {
                                    *session_id = Some(ready.session_id);
                                    *reconnects = 0;
                                    publish(snapshot_tx, Stage::Ready, session_id, *sequence, latency, *reconnects);
                                }
                                Err(error) => tracing::warn!(%error, "failed to decode READY payload"),
                            },
                            "GUILD_CREATE" => {
                                if let Some(guild_id) = guild_id_from_payload(&payload.d) {
                                    metrics.record_guild_create(guild_id);
                                }
                            }
                            "GUILD_DELETE" => {
                                if let Some(guild_id) = guild_id_from_payload(&payload.d) {
                                    metrics.record_guild_delete(guild_id);
                                }
                            }
                            _ => {}
                        }

                        let event = DispatchEvent { name, sequence: *sequence, data: payload.d };
                        if dispatcher.send(event).is_err() {
                            tracing::debug!("dispatch channel has no receiver; event dropped");
                        }
                    }
                    Opcode::Heartbeat => {
                        let ack = HeartbeatPayload::new((*sequence > 0).then_some(*sequence));
                        if send_json(&mut stream, metrics, &ack).await.is_err() {
                            return Outcome::Reconnect;
                        }
                    }
                    Opcode::HeartbeatAck => {
                        latency.track_received();
                        awaiting_ack = false;
                        missed_acks = 0;
                    }
                    Opcode::Reconnect => return Outcome::Reconnect,
                    Opcode::InvalidSession => {
                        let resumable = serde_json::from_value::<InvalidSessionData>(payload.d)
                            .map(|data| data.0)
                            .unwrap_or(false);

                        let delay = Duration::from_millis(rand::thread_rng().gen_range(1000..=5000));
                        tokio::time::sleep(delay).await;

                        if !resumable {
                            *session_id = None;
                            *sequence = 0;
                        }

                        match invalid_session_action(resumable) {
                            AuthAction::Identify => {
                                let identify = IdentifyPayload::new(config.token.clone(), config.intents, config.shard);
                                if send_json(&mut stream, metrics, &identify).await.is_err() {
                                    return Outcome::Reconnect;
                                }
                            }
                            AuthAction::Resume => {
                                let Some(id) = session_id.clone() else { return Outcome::Reconnect };
                                let resume = ResumePayload::new(config.token.clone(), id, *sequence);
                                if send_json(&mut stream, metrics, &resume).await.is_err() {
                                    return Outcome::Reconnect;
                                }
                            }
                        }
                    }
                    Opcode::Identify
                    | Opcode::PresenceUpdate
                    | Opcode::VoiceStateUpdate
                    | Opcode::Resume
                    | Opcode::RequestGuildMembers => {}
                }
            }
        }
    }
}

async fn run_session(
    config: GatewaySessionConfig,
    dispatcher: Dispatcher,
    metrics: Arc<ShardMetrics>,
    error_sink: ErrorSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
) {
    let mut session_id: Option<String> = None;
    let mut sequence: u64 = 0;
    let mut reconnects: u32 = 0;
    let mut latency = Latency::new();

    loop {
        publish(&snapshot_tx, Stage::Connecting, &session_id, sequence, &latency, reconnects);

        let url = match build_url(&config.gateway_url) {
            Ok(url) => url,
            Err(error) => {
                tracing::error!(%error, "invalid gateway url; session is giving up");
                publish(&snapshot_tx, Stage::Failed, &session_id, sequence, &latency, reconnects);
                return;
            }
        };

        let stream = match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => stream,
            Err(source) => {
                tracing::warn!(error = %source, reconnects, "gateway handshake failed");
                reconnects += 1;
                publish(&snapshot_tx, Stage::Reconnecting, &session_id, sequence, &latency, reconnects);
                if matches!(wait_or_stop(&mut commands, reconnect_delay(reconnects)).await, Flow::Stop) {
                    return;
                }
                continue;
            }
        };

        let outcome = run_connected(
            stream,
            &config,
            &dispatcher,
            &metrics,
            &error_sink,
            &mut commands,
            &snapshot_tx,
            &mut session_id,
            &mut sequence,
            &mut latency,
            &mut reconnects,
        )
        .await;

        match outcome {
            Outcome::Disconnect => {
                publish(&snapshot_tx, Stage::Disconnected, &session_id, sequence, &latency, reconnects);
                return;
            }
            Outcome::Reconnect => {
                reconnects += 1;
                publish(&snapshot_tx, Stage::Reconnecting, &session_id, sequence, &latency, reconnects);
                if matches!(wait_or_stop(&mut commands, reconnect_delay(reconnects)).await, Flow::Stop) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_action_resumes_when_session_and_sequence_are_known() {
        assert_eq!(next_auth_action(&Some("abc".into()), 42), AuthAction::Resume);
    }

    #[test]
    fn auth_action_identifies_without_a_prior_session() {
        assert_eq!(next_auth_action(&None, 0), AuthAction::Identify);
        assert_eq!(next_auth_action(&Some("abc".into()), 0), AuthAction::Identify);
    }

    #[test]
    fn fatal_close_is_only_the_authentication_failure_code() {
        assert!(is_fatal_close(Some(4004)));
        assert!(!is_fatal_close(Some(4000)));
        assert!(!is_fatal_close(Some(1000)));
        assert!(!is_fatal_close(None));
    }

    #[test]
    fn guild_id_is_parsed_from_the_dispatch_payload() {
        let data = serde_json::json!({"id": "123456789012345678", "name": "test"});
        assert_eq!(guild_id_from_payload(&data), Some(123456789012345678));

        assert_eq!(guild_id_from_payload(&serde_json::json!({"name": "no id"})), None);
        assert_eq!(guild_id_from_payload(&serde_json::json!({"id": 123})), None);
    }

    #[test]
    fn invalid_session_action_follows_the_resumable_flag() {
        assert_eq!(invalid_session_action(true), AuthAction::Resume);
        assert_eq!(invalid_session_action(false), AuthAction::Identify);
    }

    #[test]
    fn reconnect_delay_grows_then_caps_at_thirty_seconds() {
        let first = reconnect_delay(0).as_millis();
        let later = reconnect_delay(3).as_millis();
        let capped = reconnect_delay(20).as_millis();

        assert!(first >= 1000 && first <= 1500);
        assert!(later >= 8000 && later <= 8500);
        assert!(capped >= 30_000 && capped <= 30_500);
    }

    #[test]
    fn stage_maps_onto_the_reported_shard_status() {
        assert_eq!(Stage::Disconnected.status(), ShardStatus::Disconnected);
        assert_eq!(Stage::Connecting.status(), ShardStatus::Connecting);
        assert_eq!(Stage::Authenticating.status(), ShardStatus::Connected);
        assert_eq!(Stage::Ready.status(), ShardStatus::Ready);
        assert_eq!(Stage::Reconnecting.status(), ShardStatus::Reconnecting);
        assert_eq!(Stage::Failed.status(), ShardStatus::Failed);
    }
}
