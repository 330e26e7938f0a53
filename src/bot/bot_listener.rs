use super::constants::{
    ControlState, LifecycleEvent, Operator, Value, CLOSE_GRACE, KEEP_ALIVE_INTERVAL, KEEP_ALIVE_TIMEOUT,
};
use super::session::{ConnectOptions, EventSink, GameConnector, GameSession, SessionEvent, SessionId};
use crate::errors::{AppError, Result};
use futures::SinkExt;
use futures_util::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector::NativeTls;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connector for a game bridge that exposes sessions over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeConnector;

impl GameConnector for BridgeConnector {
    type Session = BridgeSession;

    async fn probe(&self, host: &str, port: u16, limit: Duration) -> Result<()> {
        let stream = timeout(limit, TcpStream::connect((host, port))).await??;
        drop(stream);
        Ok(())
    }

    async fn establish(
        &self,
        id: SessionId,
        options: &ConnectOptions,
        sink: EventSink,
    ) -> Result<Self::Session> {
        BridgeSession::new(id, options, sink).await
    }
}

pub struct BridgeSession {
    id: SessionId,
    live: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedSender<Message>,
    sink: EventSink,
    cancel: CancellationToken,
    released: AtomicBool,
}

impl BridgeSession {
    pub async fn new(id: SessionId, options: &ConnectOptions, sink: EventSink) -> Result<Self> {
        let scheme = if options.secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{}:{}/", options.host, options.port);
        let connector = if options.secure {
            Some(NativeTls(native_tls::TlsConnector::builder().build()?))
        } else {
            None
        };
        let (socket, _) = tokio_tungstenite::connect_async_tls_with_config(
            url,
            Some(WebSocketConfig::default()),
            false,
            connector,
        )
        .await?;
        let (mut writer, mut reader) = socket.split();

        // ask the bridge to log in before anything else is queued
        writer.send(Message::Text(hello_frame(options))).await?;

        let cancel = CancellationToken::new();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let keep_alive = options.keep_alive;
        let w_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ping = interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    msg = outgoing_rx.recv() => {
                        let Some(msg) = msg else { break };
                        let closing = matches!(msg, Message::Close(_));
                        if writer.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    _ = w_cancel.cancelled() => break,
                    _ = ping.tick(), if keep_alive => {
                        if writer.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tokio::select! {
                _ = writer.close() => {}
                _ = w_cancel.cancelled() => {}
            }
        });

        let live = Arc::new(AtomicBool::new(false));
        let c_live = live.clone();
        let c_sink = sink.clone();
        let r_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut reason = None;
            let mut last_seen = Instant::now();
            loop {
                let msg_result = tokio::select! {
                    msg = reader.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = r_cancel.cancelled() => break,
                    _ = sleep_until(last_seen + KEEP_ALIVE_TIMEOUT), if keep_alive => {
                        c_sink.emit(SessionEvent::Error(AppError::Timeout(format!(
                            "client timed out after {} ms",
                            KEEP_ALIVE_TIMEOUT.as_millis()
                        ))));
                        break;
                    }
                };
                last_seen = Instant::now();
                match msg_result {
                    Ok(Message::Text(text)) => match decode_event(&text) {
                        Ok(Some(SessionEvent::Ended { reason: why })) => {
                            reason = why;
                            break;
                        }
                        Ok(Some(event)) => {
                            match event {
                                SessionEvent::Ready => c_live.store(true, Ordering::SeqCst),
                                SessionEvent::Death => c_live.store(false, Ordering::SeqCst),
                                _ => {}
                            }
                            if !c_sink.emit(event) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(session = id, error = %e, "ignoring malformed bridge frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        c_sink.emit(SessionEvent::Error(e.into()));
                        break;
                    }
                }
            }
            c_live.store(false, Ordering::SeqCst);
            debug!(session = id, "bridge connection closed");
            c_sink.emit(SessionEvent::Ended { reason });
            // reader gone, let the writer drop its half so the socket closes
            r_cancel.cancel();
        });

        Ok(BridgeSession {
            id,
            live,
            outgoing,
            sink,
            cancel,
            released: AtomicBool::new(false),
        })
    }

    fn send(&self, frame: String) {
        if self.outgoing.send(Message::Text(frame)).is_err() {
            debug!(session = self.id, "bridge writer gone, dropping frame");
        }
    }

    /// Give the close handshake `CLOSE_GRACE`, then stop both socket tasks.
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = self.cancel.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    sleep(CLOSE_GRACE).await;
                    cancel.cancel();
                });
            }
            Err(_) => cancel.cancel(),
        }
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
            self.release();
        }
    }
}

impl GameSession for BridgeSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set_control_state(&self, control: ControlState, active: bool) {
        self.send(control_frame(control, active));
    }

    fn clear_control_states(&self) {
        self.send(bare_frame(Operator::ClearControls));
    }

    fn detach_all_callbacks(&self) {
        self.sink.detach();
    }

    fn terminate(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.send(bare_frame(Operator::Quit));
        let _ = self.outgoing.send(Message::Close(None));
        self.release();
    }
}

fn hello_frame(options: &ConnectOptions) -> String {
    json!([
        Operator::Hello.value(),
        { "username": options.username, "version": options.version }
    ])
    .to_string()
}

fn control_frame(control: ControlState, active: bool) -> String {
    json!([
        Operator::Control.value(),
        { "control": control.value(), "state": active }
    ])
    .to_string()
}

fn bare_frame(op: Operator) -> String {
    json!([op.value(), null]).to_string()
}

/// Decode one `[op, event, data]` frame from the bridge.
///
/// Frames with other operators or unknown event names decode to `None`.
pub(super) fn decode_event(text: &str) -> Result<Option<SessionEvent>> {
    let (op, name, data): (i32, String, Option<serde_json::Value>) = serde_json::from_str(text)?;
    if Operator::from_value(op) != Some(Operator::Event) {
        debug!(op, "ignoring non-event frame");
        return Ok(None);
    }
    let Some(kind) = LifecycleEvent::from_value(name.as_str()) else {
        debug!(event = %name, "ignoring unknown bridge event");
        return Ok(None);
    };
    let data = data.unwrap_or(serde_json::Value::Null);
    let text_field = |key: &str| -> Option<String> {
        match &data {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map.get(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    };
    let event = match kind {
        LifecycleEvent::Login => SessionEvent::Login {
            username: text_field("username").unwrap_or_default(),
        },
        LifecycleEvent::Spawn => SessionEvent::Ready,
        LifecycleEvent::Death => SessionEvent::Death,
        LifecycleEvent::Kicked => SessionEvent::Kicked {
            reason: text_field("reason").unwrap_or_else(|| "no reason given".to_owned()),
        },
        LifecycleEvent::Error => SessionEvent::Error(match text_field("code") {
            Some(code) if code.eq_ignore_ascii_case("ETIMEDOUT") => AppError::Timeout(
                text_field("message").unwrap_or(code),
            ),
            _ => AppError::Session(
                text_field("message").unwrap_or_else(|| "unknown error".to_owned()),
            ),
        }),
        LifecycleEvent::End => SessionEvent::Ended {
            reason: text_field("reason"),
        },
    };
    Ok(Some(event))
}
