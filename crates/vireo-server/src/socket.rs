// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live websocket connections.
//!
//! One connection binds a [`LiveTransport`] to an existing session, sends the
//! boot message, then runs three pieces side by side: a writer task that owns
//! the socket sink, a ping loop, and the reader loop in the calling task.
//! Closing either side detaches the connection from the registry.

use std::fmt::Display;
use std::sync::Arc;

use anyhow::anyhow;
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use vireo_proto::wire::{decode_client, encode_server, WireError};
use vireo_proto::{
    topic, ClientConfig, ClientMessage, Diagnostic, ErrorMessage, Location, ServerEvt,
    ServerMessage,
};
use vireo_session::{close_quietly, LiveTransport, RequestInfo, Session, Transport};

use crate::app::AppState;

/// Control frames (boot, errors, pongs, pings) queued ahead of events.
const CONTROL_CAPACITY: usize = 32;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const WRITER_DRAIN: Duration = Duration::from_secs(1);

type TaskResult<T> = Result<T, JoinError>;

/// Everything the upgrade handler learned about a live connection.
#[derive(Debug, Clone)]
pub(crate) struct LiveRequest {
    pub(crate) sid: String,
    pub(crate) location: Location,
    pub(crate) info: RequestInfo,
}

fn text_frame(msg: &ServerMessage, max: usize) -> Result<Message, WireError> {
    Ok(Message::Text(encode_server(msg, max)?.into()))
}

fn error_frame(sid: &str, code: &str, message: &str, max: usize) -> Option<Message> {
    let msg = ServerMessage::Error(ErrorMessage {
        sid: sid.to_string(),
        code: code.to_string(),
        message: message.to_string(),
        stack: None,
        meta: None,
    });
    text_frame(&msg, max).ok()
}

/// Send an error and a close frame, then give up on the socket.
async fn reject<W>(mut sink: W, sid: &str, code: &str, message: &str, max: usize)
where
    W: Sink<Message> + Unpin,
{
    if let Some(frame) = error_frame(sid, code, message, max) {
        let _ = sink.send(frame).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: message.to_string().into(),
        })))
        .await;
}

/// Serve one live connection until either side closes it.
pub(crate) async fn serve_connection<R, W, E>(
    state: AppState,
    request: LiveRequest,
    mut reader: R,
    sink: W,
) where
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    let settings = Arc::clone(&state.settings);
    let max = settings.max_frame_bytes;
    let sid = request.sid;

    let Some(session) = state.registry.get(&sid) else {
        warn!(sid = %sid, "live connection for unknown session");
        reject(sink, &sid, "session_not_found", "unknown session", max).await;
        return;
    };

    let conn_id = Session::generate_id();
    let (transport, events) = LiveTransport::channel(
        settings.live_channel_capacity,
        settings.live_pending_limit,
        request.info,
    );
    let transport = Arc::new(transport);
    if let Err(err) = state.registry.attach(&sid, &conn_id, transport.clone()) {
        warn!(sid = %sid, %err, "attach failed");
        reject(sink, &sid, "session_not_found", &err.to_string(), max).await;
        return;
    }

    let (control, control_rx) = mpsc::channel::<Message>(CONTROL_CAPACITY);
    let client = ClientConfig {
        debug: Some(settings.debug),
    };
    let boot = session
        .boot(request.location, Some(client))
        .map_err(anyhow::Error::from)
        .and_then(|boot| {
            text_frame(&ServerMessage::Boot(boot), max).map_err(anyhow::Error::from)
        });
    match boot {
        Ok(frame) => {
            let _ = control.try_send(frame);
        }
        Err(err) => {
            error!(sid = %sid, "boot failed: {err:#}");
            release(&state, &conn_id, transport.as_ref());
            reject(sink, &sid, "boot_failed", &err.to_string(), max).await;
            return;
        }
    }
    info!(sid = %sid, conn = %conn_id, "live connection opened");

    // Diagnostics reach the client as error messages.
    let diag_tx = control.clone();
    let diag_sid = sid.clone();
    let diagnostics = session.bus().subscribe(topic::DIAGNOSTIC, move |ev| {
        let Some(diag) = Diagnostic::from_payload(&ev.data) else {
            return;
        };
        let msg = ServerMessage::Error(diag.to_error(diag_sid.clone(), "diagnostic"));
        if let Ok(frame) = text_frame(&msg, max) {
            let _ = diag_tx.try_send(frame);
        }
    });

    let mut writer = tokio::spawn(write_loop(sink, events, control_rx, max));

    let ping_tx = control.clone();
    let ping = tokio::spawn(async move {
        let mut interval = time::interval(PING_INTERVAL);
        // The first tick fires immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if ping_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                break;
            }
        }
    });

    let mut writer_done = false;
    loop {
        let next = tokio::select! {
            next = reader.next() => next,
            res = &mut writer => {
                log_result_task_result("writer", &sid, res);
                writer_done = true;
                break;
            }
        };
        let Some(msg) = next else {
            break;
        };
        match msg {
            Ok(Message::Text(text)) => match decode_client(text.as_str(), max) {
                Ok(ClientMessage::Evt(evt)) => {
                    let session = Arc::clone(&session);
                    tokio::task::spawn_blocking(move || {
                        if let Err(err) = session.receive(evt) {
                            debug!(sid = %session.id(), %err, "client event rejected");
                        }
                    });
                }
                Ok(ClientMessage::Ack(ack)) => {
                    transport.ack_through(ack.seq);
                    session.touch();
                }
                Err(err @ WireError::FrameTooLarge { .. }) => {
                    warn!(sid = %sid, %err, "client frame too large; closing");
                    break;
                }
                Err(err) => {
                    warn!(sid = %sid, %err, "malformed client frame");
                    if let Some(frame) = error_frame(&sid, "bad_frame", &err.to_string(), max) {
                        let _ = control.try_send(frame);
                    }
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = control.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => warn!(sid = %sid, "ignoring binary frame"),
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(sid = %sid, %err, "websocket receive failed");
                break;
            }
        }
    }

    ping.abort();
    session.bus().unsubscribe(diagnostics);
    release(&state, &conn_id, transport.as_ref());
    drop(control);

    // Closing the transport ends the event stream, so the writer drains and
    // exits; force-cancel on slow clients.
    if !writer_done {
        match time::timeout(WRITER_DRAIN, &mut writer).await {
            Ok(res) => log_result_task_result("writer", &sid, res),
            Err(_) => {
                writer.abort();
                log_result_task_result("writer", &sid, writer.await);
            }
        }
    }
    log_void_task_result("ping", &sid, ping.await);
    info!(sid = %sid, conn = %conn_id, "live connection closed");
}

fn release(state: &AppState, conn_id: &str, transport: &dyn Transport) {
    if let Err(err) = state.registry.detach(conn_id) {
        debug!(conn = %conn_id, %err, "connection already released");
    }
    close_quietly(transport);
}

async fn write_loop<W>(
    mut sink: W,
    mut events: mpsc::Receiver<ServerEvt>,
    mut control: mpsc::Receiver<Message>,
    max: usize,
) -> anyhow::Result<()>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = control.recv() => msg,
            Some(evt) = events.recv() => text_frame(&ServerMessage::Evt(evt), max)?,
            else => break,
        };
        let closing = matches!(msg, Message::Close(_));
        sink.send(msg)
            .await
            .map_err(|err| anyhow!("websocket send failed: {err}"))?;
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
    Ok(())
}

fn log_void_task_result(name: &'static str, sid: &str, res: TaskResult<()>) {
    if let Err(err) = res {
        log_join_error(name, sid, &err);
    }
}

fn log_result_task_result(name: &'static str, sid: &str, res: TaskResult<anyhow::Result<()>>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(sid = %sid, "{name} task returned error: {err:#}"),
        Err(err) => log_join_error(name, sid, &err),
    }
}

fn log_join_error(name: &'static str, sid: &str, err: &JoinError) {
    if err.is_cancelled() {
        return;
    }
    if err.is_panic() {
        error!(sid = %sid, ?err, "{name} task panicked");
    } else {
        warn!(sid = %sid, ?err, "{name} task failed");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::demo::DemoView;
    use serde_json::Value;
    use std::convert::Infallible;
    use tokio::task::JoinHandle;
    use vireo_app_core::prefs::ServerPrefs;
    use vireo_proto::wire::encode_client;
    use vireo_proto::{ClientAck, ClientEvt};
    use vireo_session::{Registry, SessionConfig};

    type Inbound = mpsc::UnboundedSender<Result<Message, Infallible>>;
    type Outbound = mpsc::UnboundedReceiver<Message>;

    fn state() -> AppState {
        let registry = Arc::new(Registry::with_memory_ttl(Duration::from_secs(60)));
        AppState::new(registry, &ServerPrefs::default())
    }

    fn request(sid: &str) -> LiveRequest {
        LiveRequest {
            sid: sid.to_string(),
            location: Location::path("/"),
            info: RequestInfo::default(),
        }
    }

    /// Run a connection over in-memory channels.
    fn connect(state: &AppState, sid: &str) -> (Inbound, Outbound, JoinHandle<()>) {
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Message, Infallible>>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        let reader = Box::pin(futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }));
        let writer = Box::pin(futures_util::sink::unfold(
            out_tx,
            |tx, msg: Message| async move {
                tx.send(msg).map_err(|_| "socket gone")?;
                Ok::<_, &'static str>(tx)
            },
        ));
        let handle = tokio::spawn(serve_connection(state.clone(), request(sid), reader, writer));
        (in_tx, out_rx, handle)
    }

    async fn next_json(out: &mut Outbound) -> Value {
        match time::timeout(Duration::from_secs(2), out.recv()).await.unwrap() {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    fn text(msg: &ClientMessage) -> Message {
        Message::Text(encode_client(msg).unwrap().into())
    }

    fn register(state: &AppState, sid: &str) -> Arc<Session> {
        let session = Session::new(sid, DemoView::default(), SessionConfig::default());
        state.registry.put(Arc::clone(&session));
        session
    }

    #[tokio::test]
    async fn unknown_sessions_get_an_error_then_a_close() {
        let state = state();
        let (_in, mut out, handle) = connect(&state, "missing");
        let err = next_json(&mut out).await;
        assert_eq!(err["t"], "error");
        assert_eq!(err["code"], "session_not_found");
        assert!(matches!(out.recv().await, Some(Message::Close(Some(_)))));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn boot_then_frames_then_detach_on_close() {
        let state = state();
        let session = register(&state, "s1");
        let (input, mut out, handle) = connect(&state, "s1");

        let boot = next_json(&mut out).await;
        assert_eq!(boot["t"], "boot");
        assert_eq!(boot["sid"], "s1");
        assert_eq!(boot["seq"], 0);

        input
            .send(Ok(text(&ClientMessage::Evt(ClientEvt::handler("inc", Value::Null)))))
            .unwrap();
        let evt = next_json(&mut out).await;
        assert_eq!(evt["t"], "evt");
        assert_eq!(evt["topic"], topic::FRAME);
        assert_eq!(evt["seq"], 1);
        assert_eq!(evt["payload"][0]["op"], "setText");

        input
            .send(Ok(text(&ClientMessage::Ack(ClientAck {
                sid: "s1".into(),
                seq: 1,
            }))))
            .unwrap();
        let deadline = time::Instant::now() + Duration::from_secs(2);
        while session.transport().map_or(0, |t| t.acked_seq()) < 1 {
            assert!(time::Instant::now() < deadline, "ack never applied");
            time::sleep(Duration::from_millis(5)).await;
        }

        input.send(Ok(Message::Close(None))).unwrap();
        handle.await.unwrap();
        assert!(session.transport().is_none());
        assert!(state.registry.get("s1").is_some());
    }

    #[tokio::test]
    async fn unknown_handlers_come_back_as_diagnostics() {
        let state = state();
        register(&state, "s2");
        let (input, mut out, handle) = connect(&state, "s2");
        next_json(&mut out).await;

        input
            .send(Ok(text(&ClientMessage::Evt(ClientEvt::handler("nope", Value::Null)))))
            .unwrap();
        let err = next_json(&mut out).await;
        assert_eq!(err["t"], "error");
        assert_eq!(err["code"], "diagnostic");
        assert_eq!(err["sid"], "s2");

        input.send(Ok(Message::Text("{not json".to_string().into()))).unwrap();
        let bad = next_json(&mut out).await;
        assert_eq!(bad["code"], "bad_frame");

        drop(input);
        handle.await.unwrap();
    }
}
