//! Janus WebSocket signaling channel.
//!
//! One WebSocket connection carries one gateway session. Requests are
//! correlated with replies by transaction id; asynchronous notifications are
//! converted to [`GatewayEvent`]s and pushed to the controller.
//!
//! Three background tasks run per connection, all bound to one
//! `CancellationToken`:
//! - writer: drains the outbound queue into the socket
//! - reader: routes replies and events
//! - keepalive: refreshes the gateway session

use crate::config::TransportSettings;
use crate::errors::ClientError;
use crate::signaling::{GatewayEvent, GatewayEventKind, SignalingChannel};
use common::secret::ExposeSecret;
use common::types::HandleId;
use futures_util::{SinkExt, Stream, StreamExt};
use gateway_protocol::{
    decode_incoming, decode_room_event, encode_outgoing, Command, IncomingKind, IncomingMessage,
    Jsep, OutgoingMessage, RoomEvent, RoomRequest, SessionId, VIDEOROOM_PLUGIN,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

/// WebSocket subprotocol the gateway requires.
pub const JANUS_SUBPROTOCOL: &str = "janus-protocol";

/// [`SignalingChannel`] over a Janus WebSocket connection.
pub struct JanusWsChannel {
    settings: TransportSettings,
    connection: RwLock<Option<Connection>>,
}

/// An open gateway session.
struct Connection {
    session_id: SessionId,
    link: Arc<Link>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.link.cancel_token.cancel();
    }
}

/// Socket plumbing shared by the background tasks.
struct Link {
    settings: TransportSettings,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, oneshot::Sender<IncomingMessage>>>,
    cancel_token: CancellationToken,
}

impl JanusWsChannel {
    #[must_use]
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            connection: RwLock::new(None),
        }
    }

    async fn session(&self) -> Result<(SessionId, Arc<Link>), ClientError> {
        let guard = self.connection.read().await;
        let Some(connection) = guard.as_ref() else {
            return Err(ClientError::Transport("signaling channel not open".to_string()));
        };
        if connection.link.cancel_token.is_cancelled() {
            return Err(ClientError::Transport("signaling connection lost".to_string()));
        }
        Ok((connection.session_id, Arc::clone(&connection.link)))
    }
}

#[async_trait::async_trait]
impl SignalingChannel for JanusWsChannel {
    #[instrument(skip_all, fields(url = %self.settings.url))]
    async fn open(&self, events: mpsc::UnboundedSender<GatewayEvent>) -> Result<(), ClientError> {
        let mut guard = self.connection.write().await;
        if guard.is_some() {
            return Err(ClientError::State("signaling channel already open".to_string()));
        }

        let mut request = self
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(format!("invalid gateway url: {e}")))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(JANUS_SUBPROTOCOL),
        );

        let (stream, _) = tokio::time::timeout(self.settings.request_timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::Timeout("gateway connect timed out".to_string()))?
            .map_err(|e| ClientError::Transport(format!("websocket connect failed: {e}")))?;
        let (mut write, read) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let link = Arc::new(Link {
            settings: self.settings.clone(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            cancel_token: CancellationToken::new(),
        });

        let writer_token = link.cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_token.cancelled() => break,
                    next = outbound_rx.recv() => {
                        let Some(text) = next else { break };
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            debug!(target: "room.transport", error = %e, "Websocket send failed");
                            writer_token.cancel();
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(read_loop(Arc::clone(&link), read, events));

        let created = match link.transact(Command::Create).await {
            Ok(reply) => reply,
            Err(e) => {
                link.cancel_token.cancel();
                return Err(e);
            }
        };
        let Some(data) = created.data else {
            link.cancel_token.cancel();
            return Err(ClientError::Protocol("create reply without session id".to_string()));
        };
        let session_id = SessionId(data.id);

        tokio::spawn(keepalive_loop(Arc::clone(&link), session_id));

        info!(
            target: "room.transport",
            session_id = %session_id,
            "Gateway session created"
        );
        *guard = Some(Connection { session_id, link });
        Ok(())
    }

    async fn attach(&self) -> Result<HandleId, ClientError> {
        let (session_id, link) = self.session().await?;
        let reply = link
            .transact(Command::Attach {
                session_id,
                plugin: VIDEOROOM_PLUGIN.to_string(),
            })
            .await?;

        let data = reply
            .data
            .ok_or_else(|| ClientError::Protocol("attach reply without handle id".to_string()))?;
        let handle = HandleId(data.id);

        debug!(target: "room.transport", handle_id = %handle, "Plugin handle attached");
        Ok(handle)
    }

    async fn request(&self, handle: HandleId, body: RoomRequest) -> Result<RoomEvent, ClientError> {
        let (session_id, link) = self.session().await?;
        let name = body.name();
        let reply = link
            .transact(Command::Message {
                session_id,
                handle_id: handle,
                body,
                jsep: None,
            })
            .await?;

        if reply.janus != IncomingKind::Success {
            return Err(ClientError::Protocol(format!(
                "{name} answered with {:?} instead of success",
                reply.janus
            )));
        }
        Ok(decode_room_event(&reply)?)
    }

    async fn message(
        &self,
        handle: HandleId,
        body: RoomRequest,
        jsep: Option<Jsep>,
    ) -> Result<(), ClientError> {
        let (session_id, link) = self.session().await?;
        trace!(
            target: "room.transport",
            handle_id = %handle,
            request = body.name(),
            with_jsep = jsep.is_some(),
            "Sending plugin message"
        );
        link.transact(Command::Message {
            session_id,
            handle_id: handle,
            body,
            jsep,
        })
        .await?;
        Ok(())
    }

    async fn detach(&self, handle: HandleId) -> Result<(), ClientError> {
        let (session_id, link) = self.session().await?;
        link.transact(Command::Detach {
            session_id,
            handle_id: handle,
        })
        .await?;

        debug!(target: "room.transport", handle_id = %handle, "Plugin handle detached");
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        let Some(connection) = self.connection.write().await.take() else {
            return Ok(());
        };

        if !connection.link.cancel_token.is_cancelled() {
            let destroyed = connection
                .link
                .transact(Command::Destroy {
                    session_id: connection.session_id,
                })
                .await;
            if let Err(e) = destroyed {
                debug!(
                    target: "room.transport",
                    session_id = %connection.session_id,
                    error = %e,
                    "Session destroy not acknowledged"
                );
            }
        }

        info!(
            target: "room.transport",
            session_id = %connection.session_id,
            "Gateway session closed"
        );
        // Dropping the connection cancels the background tasks
        drop(connection);
        Ok(())
    }
}

impl Link {
    /// Send a command and wait for the reply on its transaction.
    ///
    /// Gateway `error` replies become [`ClientError::Rejected`].
    async fn transact(&self, command: Command) -> Result<IncomingMessage, ClientError> {
        let verb = command.verb();
        let transaction = Uuid::new_v4().to_string();
        let text = encode_outgoing(&OutgoingMessage {
            command,
            transaction: transaction.clone(),
            apisecret: self
                .settings
                .api_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(transaction.clone(), tx);

        if self.cancel_token.is_cancelled() || self.outbound.send(text).is_err() {
            self.pending.lock().await.remove(&transaction);
            return Err(ClientError::Transport("signaling connection closed".to_string()));
        }

        let reply = match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(ClientError::Transport(format!(
                    "connection closed before {verb} was answered"
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&transaction);
                return Err(ClientError::Timeout(format!(
                    "{verb} not answered within {}s",
                    self.settings.request_timeout.as_secs()
                )));
            }
        };

        if reply.janus == IncomingKind::Error {
            let (code, reason) = reply
                .error
                .map_or((0, "unspecified gateway error".to_string()), |e| {
                    (e.code, e.reason)
                });
            return Err(ClientError::Rejected { code, reason });
        }

        Ok(reply)
    }

    async fn deliver_reply(&self, message: IncomingMessage) {
        let Some(transaction) = message.transaction.clone() else {
            debug!(target: "room.transport", "Reply without transaction dropped");
            return;
        };

        match self.pending.lock().await.remove(&transaction) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                debug!(
                    target: "room.transport",
                    transaction = %transaction,
                    "Reply for unknown transaction dropped"
                );
            }
        }
    }
}

/// Route inbound frames until the socket or the token ends.
async fn read_loop<S>(link: Arc<Link>, mut read: S, events: mpsc::UnboundedSender<GatewayEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            () = link.cancel_token.cancelled() => return,
            next = read.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let message = match decode_incoming(text.as_str()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(target: "room.transport", error = %e, "Undecodable gateway message");
                        continue;
                    }
                };

                if message.janus == IncomingKind::Timeout {
                    break "gateway session timed out".to_string();
                }
                if message.janus.is_reply() {
                    link.deliver_reply(message).await;
                    continue;
                }
                if let Some(event) = to_gateway_event(message) {
                    if events.send(event).is_err() {
                        debug!(target: "room.transport", "Event receiver gone");
                    }
                }
            }
            Some(Ok(Message::Close(_))) => break "gateway closed the websocket".to_string(),
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("websocket error: {e}"),
            None => break "websocket stream ended".to_string(),
        }
    };

    if !link.cancel_token.is_cancelled() {
        warn!(target: "room.transport", reason = %reason, "Signaling connection lost");
        link.cancel_token.cancel();
        let _ = events.send(GatewayEvent::TransportClosed { reason });
    }
    // Fail every in-flight request
    link.pending.lock().await.clear();
}

/// Keep the gateway session alive until the token is cancelled.
async fn keepalive_loop(link: Arc<Link>, session_id: SessionId) {
    let mut ticker = tokio::time::interval(link.settings.keepalive_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = link.cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = link.transact(Command::Keepalive { session_id }).await {
                    debug!(
                        target: "room.transport",
                        session_id = %session_id,
                        error = %e,
                        "Keepalive failed"
                    );
                }
            }
        }
    }
}

/// Convert a non-reply message into an event for the controller.
///
/// Messages without a sending handle, and kinds the controller does not
/// act on, yield `None`.
fn to_gateway_event(message: IncomingMessage) -> Option<GatewayEvent> {
    let handle = message.sender?;

    let kind = match message.janus {
        IncomingKind::Event => match decode_room_event(&message) {
            Ok(event) => GatewayEventKind::Plugin {
                event,
                jsep: message.jsep,
            },
            Err(e) => GatewayEventKind::Malformed {
                reason: e.to_string(),
            },
        },
        IncomingKind::Webrtcup => GatewayEventKind::WebrtcUp,
        IncomingKind::Media => GatewayEventKind::Media {
            kind: message.media_type.unwrap_or_default(),
            receiving: message.receiving.unwrap_or(false),
        },
        IncomingKind::Hangup => GatewayEventKind::Hangup {
            reason: message.reason.unwrap_or_default(),
        },
        IncomingKind::Detached => GatewayEventKind::Detached,
        IncomingKind::Slowlink
        | IncomingKind::Timeout
        | IncomingKind::Other
        | IncomingKind::Success
        | IncomingKind::Error
        | IncomingKind::Ack => return None,
    };

    Some(GatewayEvent::Handle { handle, kind })
}
