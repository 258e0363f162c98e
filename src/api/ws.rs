use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use log::{debug, warn};

use super::AppState;
use crate::db::ReadingPayload;
use crate::stream::{CloseReason, StreamManager, Subscriber};

/// Write half of an upgraded socket, driven by the subscriber's session.
pub struct WsSubscriber {
    sink: SplitSink<WebSocket, Message>,
}

impl WsSubscriber {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&mut self, payload: &ReadingPayload) -> Result<()> {
        let text = serde_json::to_string(payload).context("failed to encode reading")?;
        self.sink
            .send(Message::Text(text))
            .await
            .context("failed to write to websocket")
    }

    async fn close(&mut self, reason: CloseReason) {
        let (code, text) = match reason {
            CloseReason::Closed => (close_code::NORMAL, "stream closed"),
            CloseReason::ShuttingDown => (close_code::AWAY, "server shutting down"),
            CloseReason::SetupFailed => (close_code::ERROR, "failed to load stored readings"),
            // The socket already failed; there is nobody to tell.
            CloseReason::EmitFailed => return,
        };

        let frame = CloseFrame {
            code,
            reason: text.into(),
        };
        if let Err(err) = self.sink.send(Message::Close(Some(frame))).await {
            debug!("Close frame not delivered: {err}");
        }
    }
}

pub async fn stream_readings(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.streams))
}

async fn handle_socket(socket: WebSocket, streams: StreamManager) {
    let (sink, mut incoming) = socket.split();

    let ticket = match streams.on_connect(WsSubscriber::new(sink)).await {
        Ok(ticket) => ticket,
        Err(err) => {
            warn!("WebSocket stream not started: {err}");
            return;
        }
    };
    let id = ticket.id();

    loop {
        tokio::select! {
            _ = ticket.closed() => break,
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                // Clients have nothing to say on this stream.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    streams.on_error(id, err).await;
                    break;
                }
            },
        }
    }

    streams.on_disconnect(id).await;
}
