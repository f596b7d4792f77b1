use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::warn;

use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live gateway connection: typed command sender + typed event stream.
/// The access token is carried in the handshake query string; a rejected
/// handshake surfaces as a `Gateway` error before any event is delivered.
pub struct GatewayConnection {
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
}

pub async fn connect(ws_base_url: &str, token: &str) -> Result<GatewayConnection, ClientError> {
    let url = format!("{}/ws?token={}", ws_base_url.trim_end_matches('/'), token);
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| ClientError::Gateway(e.to_string()))?;

    let (sink, stream) = stream.split();
    Ok(GatewayConnection { sink, stream })
}

impl GatewayConnection {
    pub async fn send(&mut self, cmd: &GatewayCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(cmd).expect("gateway command serializes");
        self.sink
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| ClientError::Gateway(e.to_string()))
    }

    pub async fn join_conversation(&mut self, conversation_id: uuid::Uuid) -> Result<(), ClientError> {
        self.send(&GatewayCommand::JoinConversation { conversation_id })
            .await
    }

    /// Next typed event; `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Option<Result<GatewayEvent, ClientError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    return Some(
                        serde_json::from_str(&text)
                            .map_err(|e| ClientError::Gateway(format!("bad event: {}", e))),
                    );
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue, // ping/pong/binary
                Err(e) => {
                    warn!("gateway read error: {}", e);
                    return Some(Err(ClientError::Gateway(e.to_string())));
                }
            }
        }
        None
    }
}
