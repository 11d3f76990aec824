//! WebSocket endpoints for interactive terminals and resource monitoring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webshell_core::channel::ClientChannel;
use webshell_core::errors::ChannelError;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuery {
    connection_id: Option<String>,
    user_id: Option<String>,
}

impl ChannelQuery {
    fn connection_id(&self) -> Result<String, ApiError> {
        match self.connection_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
            _ => Err(ApiError::BadRequest(
                "Query parameter `connectionId` is required".into(),
            )),
        }
    }
}

/// A WebSocket seen through the [`ClientChannel`] trait.
///
/// Frames are queued on an unbounded channel and written by a dedicated
/// task, so `send` never blocks the caller.
pub struct WsChannel {
    id: String,
    open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Message>,
}

impl WsChannel {
    /// Split `socket`, spawn its writer task and return the channel with
    /// the receiving half.
    fn attach(socket: WebSocket) -> (Arc<Self>, SplitStream<WebSocket>) {
        let (mut sink, stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let channel = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            open: Arc::new(AtomicBool::new(true)),
            tx,
        });

        let open = Arc::clone(&channel.open);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            open.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
        });

        (channel, stream)
    }
}

impl ClientChannel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send(&self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError(format!("channel {} is closed", self.id)));
        }
        self.tx
            .send(Message::Text(text.to_string()))
            .map_err(|_| ChannelError(format!("channel {} is closed", self.id)))
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Message::Close(None));
        }
    }
}

/// `GET /api/ssh/terminal?connectionId=..&userId=..`
pub async fn terminal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let connection_id = query.connection_id()?;
    Ok(ws
        .on_upgrade(move |socket| handle_terminal(socket, state, connection_id, query.user_id))
        .into_response())
}

async fn handle_terminal(
    socket: WebSocket,
    state: Arc<AppState>,
    connection_id: String,
    user_id: Option<String>,
) {
    let (channel, mut stream) = WsChannel::attach(socket);
    let channel_id = channel.id().to_string();
    info!("Terminal channel {channel_id} opened for {connection_id}");

    let client: Arc<dyn ClientChannel> = channel.clone();
    if let Err(e) = state
        .terminals
        .open(client, &connection_id, user_id.as_deref())
        .await
    {
        debug!("Terminal channel {channel_id} rejected: {e}");
        return;
    }

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.terminals.handle_message(&channel_id, &text).await {
                    warn!("Terminal channel {channel_id} write failed: {e}");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Terminal channel {channel_id} receive error: {e}");
                break;
            }
        }
        if !channel.is_open() {
            break;
        }
    }

    state.terminals.close(&channel_id).await;
    channel.close();
    info!("Terminal channel {channel_id} closed");
}

/// `GET /api/ssh/resources?connectionId=..&userId=..`
pub async fn resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let connection_id = query.connection_id()?;
    Ok(ws
        .on_upgrade(move |socket| handle_resources(socket, state, connection_id, query.user_id))
        .into_response())
}

async fn handle_resources(
    socket: WebSocket,
    state: Arc<AppState>,
    connection_id: String,
    user_id: Option<String>,
) {
    let (channel, mut stream) = WsChannel::attach(socket);
    let channel_id = channel.id().to_string();

    let client: Arc<dyn ClientChannel> = channel.clone();
    if state
        .monitor
        .subscribe(client, &connection_id, user_id)
        .await
        .is_err()
    {
        return;
    }

    // Inbound frames carry no meaning here; read only to notice the close.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
        if !channel.is_open() {
            break;
        }
    }

    state.monitor.unsubscribe(&connection_id, &channel_id).await;
    channel.close();
    debug!("Resource channel {channel_id} closed");
}
