use super::{
    parse_frame, ChannelEvent, ChannelEventKind, ChannelHandle, CloseReason, Connector,
    Generation,
};
use crate::model::{OutboundFrame, TextDraft};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

enum Command {
    Send(OutboundFrame),
    Close,
}

/// Opens one WebSocket per activation and pushes typed events into a shared
/// sink. Frames are forwarded in the order they arrive; nothing is batched
/// or reordered, and there is no automatic reconnect.
pub struct ConnectionManager {
    ws_base: String,
    sink: mpsc::UnboundedSender<ChannelEvent>,
}

impl ConnectionManager {
    pub fn new(api_base: &str, sink: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            ws_base: ws_base_url(api_base),
            sink,
        }
    }

    pub fn url_for(&self, conversation_id: &str) -> String {
        format!("{}/ws/{}", self.ws_base, conversation_id)
    }
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`.
fn ws_base_url(api_base: &str) -> String {
    let trimmed = api_base.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    }
}

impl Connector for ConnectionManager {
    type Handle = ConnectionHandle;

    fn open(&self, conversation_id: &str, generation: Generation) -> ConnectionHandle {
        let url = self.url_for(conversation_id);
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        log::info!("[ws] {} opening {}", generation, url);
        tokio::spawn(run_channel(
            url,
            generation,
            state.clone(),
            cmd_rx,
            self.sink.clone(),
        ));
        ConnectionHandle {
            generation,
            state,
            commands: cmd_tx,
        }
    }
}

pub struct ConnectionHandle {
    generation: Generation,
    state: Arc<AtomicU8>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelHandle for ConnectionHandle {
    fn generation(&self) -> Generation {
        self.generation
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    fn send(&self, draft: &TextDraft) -> bool {
        if !self.is_open() {
            log::debug!("[ws] {} not open, dropping draft", self.generation);
            return false;
        }
        self.commands
            .send(Command::Send(OutboundFrame::Text(draft.clone())))
            .is_ok()
    }

    fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        let _ = self.commands.send(Command::Close);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Send(_)) => continue,
        }
    }
}

async fn run_channel(
    url: String,
    generation: Generation,
    state: Arc<AtomicU8>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    sink: mpsc::UnboundedSender<ChannelEvent>,
) {
    let emit = |kind: ChannelEventKind| {
        let _ = sink.send(ChannelEvent { generation, kind });
    };

    let ws_stream = tokio::select! {
        res = connect_async(url.as_str()) => match res {
            Ok((stream, _)) => stream,
            Err(e) => {
                state.store(STATE_CLOSED, Ordering::SeqCst);
                log::warn!("[ws] {} connect failed: {}", generation, e);
                emit(ChannelEventKind::Closed(CloseReason::ConnectFailed(e.to_string())));
                return;
            }
        },
        _ = wait_for_close(&mut commands) => {
            log::debug!("[ws] {} closed while connecting", generation);
            emit(ChannelEventKind::Closed(CloseReason::Local));
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if state
        .compare_exchange(STATE_CONNECTING, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let _ = ws_tx.close().await;
        emit(ChannelEventKind::Closed(CloseReason::Local));
        return;
    }
    log::info!("[ws] {} connected", generation);
    emit(ChannelEventKind::Opened);

    let reason = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(frame)) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(t) => t,
                        Err(e) => {
                            log::error!("[ws] {} failed to encode draft: {}", generation, e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(text.into())).await {
                        break CloseReason::Error(e.to_string());
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_tx.close().await;
                    break CloseReason::Local;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => match parse_frame(&text) {
                    Ok(event) => emit(ChannelEventKind::Live(event)),
                    Err(e) => log::warn!("[ws] {} dropping frame: {}", generation, e),
                },
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => CloseReason::Remote {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                        },
                        None => CloseReason::Dropped,
                    };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break CloseReason::Error(e.to_string()),
                None => break CloseReason::Dropped,
            },
        }
    };

    state.store(STATE_CLOSED, Ordering::SeqCst);
    log::info!("[ws] {} closed: {}", generation, reason);
    emit(ChannelEventKind::Closed(reason));
}
