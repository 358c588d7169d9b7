// src/protocol/client.rs
//! Persistent RPC client
//!
//! Owns one connection plus the correlation state for it: a strictly
//! increasing command id and a map from id to the pending completion handle.
//! A reader task settles handles as responses arrive; a writer task drains
//! the outbound queue. Closing the connection for any reason rejects every
//! pending command.

use crate::protocol::message::{
    methods, InboundMessage, OutboundCommand, SessionErrorParams, SESSION_ERROR_EVENT,
};
use crate::protocol::transport;
use crate::runtime::deferred::Deferred;
use crate::utils::errors::{Result, UplinkError};
use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Context stored alongside every in-flight command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub method: String,
    pub session_id: Option<String>,
}

/// Completion handle of one in-flight command
pub type PendingCommand = Deferred<Value, CommandContext>;

/// Callback for uncorrelated server events
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct ClientInner {
    next_id: AtomicU64,
    pending: DashMap<u64, PendingCommand>,
    listeners: DashMap<String, Vec<EventHandler>>,
    outbound: mpsc::UnboundedSender<String>,
    authenticated: Deferred<()>,
    closed: AtomicBool,
    stop: CancellationToken,
}

/// Handle to the shared connection; clones share the same state
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

impl ProtocolClient {
    /// Connect over TCP and start the authentication handshake
    pub async fn connect(address: &str, access_token: Option<String>) -> Result<Self> {
        let transport = transport::connect(address).await?;
        Ok(Self::from_transport(transport, access_token))
    }

    /// Run the client over any line sink/stream pair.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_transport<T, E>(transport: T, access_token: Option<String>) -> Self
    where
        T: Sink<String, Error = E> + Stream<Item = std::result::Result<String, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (sink, stream) = transport.split::<String>();
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            listeners: DashMap::new(),
            outbound: tx,
            authenticated: Deferred::new(),
            closed: AtomicBool::new(false),
            stop: CancellationToken::new(),
        });

        let client = Self { inner };
        client.install_session_error_listener();

        tokio::spawn(write_loop(sink, rx, Arc::clone(&client.inner)));
        tokio::spawn(read_loop(stream, Arc::clone(&client.inner)));

        client.start_handshake(access_token);
        client
    }

    fn install_session_error_listener(&self) {
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        self.on(SESSION_ERROR_EVENT, move |params| {
            if let Some(inner) = weak.upgrade() {
                inner.reject_session(params);
            }
        });
    }

    fn start_handshake(&self, access_token: Option<String>) {
        let authenticated = self.inner.authenticated.clone();

        let Some(token) = access_token else {
            let _ = authenticated.reject(UplinkError::AuthenticationRequired(
                "No access token configured".to_string(),
            ));
            return;
        };

        let handshake = self.send_command(
            methods::SET_ACCESS_TOKEN,
            json!({ "accessToken": token }),
            None,
        );
        tokio::spawn(async move {
            let outcome = handshake.wait().await.map(|_| ());
            match &outcome {
                Ok(()) => info!("Authenticated with the service"),
                Err(e) => warn!("Authentication failed: {}", e),
            }
            let _ = authenticated.settle(outcome);
        });
    }

    /// Resolves once the access-token handshake succeeded
    pub async fn wait_until_authenticated(&self) -> Result<()> {
        self.inner.authenticated.wait().await
    }

    /// Queue a command and return its completion handle.
    ///
    /// No authentication check happens here; callers that need it await
    /// [`wait_until_authenticated`](Self::wait_until_authenticated) first.
    pub fn send_command(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> PendingCommand {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let pending = PendingCommand::with_data(CommandContext {
            method: method.to_string(),
            session_id: session_id.map(str::to_string),
        });

        let command = OutboundCommand {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };
        let line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                let _ = pending.reject(e.into());
                return pending;
            }
        };

        self.inner.pending.insert(id, pending.clone());
        if self.inner.closed.load(Ordering::SeqCst) || self.inner.outbound.send(line).is_err() {
            if let Some((_, cmd)) = self.inner.pending.remove(&id) {
                let _ = cmd.reject(UplinkError::ConnectionClosed(format!(
                    "Cannot send {}: connection is closed",
                    method
                )));
            }
            return pending;
        }

        debug!(id, method, "Sent command");
        pending
    }

    /// Send a command and wait for its result
    pub async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        self.send_command(method, params, session_id).wait().await
    }

    /// Register a listener for an uncorrelated server event
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Commands still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the connection, rejecting everything still pending
    pub fn close(&self) {
        self.inner
            .shutdown(UplinkError::ConnectionClosed("Client closed".to_string()));
    }
}

impl ClientInner {
    fn dispatch(&self, line: &str) -> Result<()> {
        let message = match InboundMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed message: {}", e);
                return Ok(());
            }
        };

        match message {
            InboundMessage::Response { id, result } => {
                let pending = self.take_pending(id)?;
                let _ = pending.resolve(result);
            }
            InboundMessage::Error { id, error } => {
                let pending = self.take_pending(id)?;
                debug!(id, code = error.code, "Command failed: {}", error.message);
                let _ = pending.reject(UplinkError::Protocol(error));
            }
            InboundMessage::Event { method, params } => {
                let handlers = self
                    .listeners
                    .get(&method)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();
                if handlers.is_empty() {
                    debug!("No listener for event {}", method);
                }
                for handler in handlers {
                    handler(&params);
                }
            }
        }

        Ok(())
    }

    fn take_pending(&self, id: u64) -> Result<PendingCommand> {
        self.pending
            .remove(&id)
            .map(|(_, pending)| pending)
            .ok_or_else(|| {
                UplinkError::InvariantViolation(format!(
                    "Received response for unknown command id {}",
                    id
                ))
            })
    }

    fn reject_session(&self, params: &Value) {
        let event: SessionErrorParams = match serde_json::from_value(params.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!("Malformed session error event: {}", e);
                return;
            }
        };

        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().data().session_id.as_deref() == Some(&event.session_id))
            .map(|entry| *entry.key())
            .collect();

        warn!(
            session_id = %event.session_id,
            code = event.code,
            rejected = ids.len(),
            "Session error: {}",
            event.message
        );

        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reject(UplinkError::SessionError {
                    session_id: event.session_id.clone(),
                    code: event.code,
                    message: event.message.clone(),
                });
            }
        }
    }

    fn shutdown(&self, reason: UplinkError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.cancel();

        let _ = self.authenticated.reject(reason.clone());

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            info!("Rejecting {} pending commands: {}", ids.len(), reason);
        }
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reject(reason.clone());
            }
        }
    }
}

async fn write_loop<S, E>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inner: Arc<ClientInner>,
) where
    S: Sink<String, Error = E> + Unpin,
    E: Display,
{
    loop {
        let line = tokio::select! {
            _ = inner.stop.cancelled() => break,
            line = outbound.recv() => line,
        };
        let Some(line) = line else { break };

        if let Err(e) = sink.send(line).await {
            inner.shutdown(UplinkError::ConnectionClosed(format!("Write failed: {}", e)));
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop<S, E>(mut stream: S, inner: Arc<ClientInner>)
where
    S: Stream<Item = std::result::Result<String, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = inner.stop.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = inner.dispatch(&line) {
                    error!("Closing connection: {}", e);
                    inner.shutdown(e);
                    return;
                }
            }
            Some(Err(e)) => {
                inner.shutdown(UplinkError::ConnectionClosed(format!("Read failed: {}", e)));
                return;
            }
            None => {
                inner.shutdown(UplinkError::ConnectionClosed(
                    "Connection closed by server".to_string(),
                ));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::AUTHENTICATION_REQUIRED;
    use crate::runtime::deferred::DeferredStatus;
    use tokio::io::DuplexStream;
    use tokio_util::codec::{Framed, LinesCodec};

    type ServerSide = Framed<DuplexStream, LinesCodec>;

    fn pair(token: Option<&str>) -> (ProtocolClient, ServerSide) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = ProtocolClient::from_transport(
            Framed::new(a, LinesCodec::new()),
            token.map(str::to_string),
        );
        (client, Framed::new(b, LinesCodec::new()))
    }

    async fn next_command(server: &mut ServerSide) -> Value {
        let line = server.next().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn reply(server: &mut ServerSide, message: Value) {
        server.send(message.to_string()).await.unwrap();
    }

    async fn authenticate(server: &mut ServerSide) {
        let hello = next_command(server).await;
        assert_eq!(hello["method"], methods::SET_ACCESS_TOKEN);
        reply(server, json!({"id": hello["id"], "result": {}})).await;
    }

    #[tokio::test]
    async fn handshake_gates_authentication() {
        let (client, mut server) = pair(Some("tok"));

        let hello = next_command(&mut server).await;
        assert_eq!(hello["params"]["accessToken"], "tok");
        assert_eq!(hello["id"], 1);

        reply(&mut server, json!({"id": 1, "result": {}})).await;
        client.wait_until_authenticated().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_token_is_auth_required() {
        let (client, mut server) = pair(Some("expired"));

        let hello = next_command(&mut server).await;
        reply(
            &mut server,
            json!({"id": hello["id"], "error": {"code": AUTHENTICATION_REQUIRED, "message": "nope"}}),
        )
        .await;

        let err = client.wait_until_authenticated().await.unwrap_err();
        assert!(err.is_authentication_required());
    }

    #[tokio::test]
    async fn missing_token_fails_without_network() {
        let (client, _server) = pair(None);
        assert!(matches!(
            client.wait_until_authenticated().await,
            Err(UplinkError::AuthenticationRequired(_))
        ));
    }

    #[tokio::test]
    async fn responses_resolve_matching_command_only() {
        let (client, mut server) = pair(Some("tok"));
        authenticate(&mut server).await;

        let first = client.send_command("A.one", json!({}), None);
        let second = client.send_command("A.two", json!({}), None);
        let c1 = next_command(&mut server).await;
        let c2 = next_command(&mut server).await;
        assert!(c2["id"].as_u64().unwrap() > c1["id"].as_u64().unwrap());

        reply(&mut server, json!({"id": c2["id"], "result": {"n": 2}})).await;
        assert_eq!(second.wait().await.unwrap(), json!({"n": 2}));
        assert_eq!(first.status(), DeferredStatus::Pending);

        reply(&mut server, json!({"id": c1["id"], "error": {"code": 7, "message": "bad"}})).await;
        match first.wait().await {
            Err(UplinkError::Protocol(e)) => assert_eq!(e.code, 7),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn session_error_rejects_only_that_session() {
        let (client, mut server) = pair(Some("tok"));
        authenticate(&mut server).await;

        let a1 = client.send_command("Work.a", json!({}), Some("s-a"));
        let a2 = client.send_command("Work.a", json!({}), Some("s-a"));
        let b = client.send_command("Work.b", json!({}), Some("s-b"));
        for _ in 0..3 {
            next_command(&mut server).await;
        }

        reply(
            &mut server,
            json!({"method": SESSION_ERROR_EVENT, "params": {"sessionId": "s-a", "code": 3, "message": "died"}}),
        )
        .await;

        for pending in [a1, a2] {
            assert!(matches!(
                pending.wait().await,
                Err(UplinkError::SessionError { ref session_id, code: 3, .. }) if session_id == "s-a"
            ));
        }
        assert_eq!(b.status(), DeferredStatus::Pending);
        assert_eq!(client.pending_count(), 1);
    }

    #[tokio::test]
    async fn unmatched_id_closes_connection() {
        let (client, mut server) = pair(Some("tok"));
        authenticate(&mut server).await;

        let waiting = client.send_command("Work.x", json!({}), None);
        next_command(&mut server).await;
        reply(&mut server, json!({"id": 999, "result": {}})).await;

        assert!(matches!(
            waiting.wait().await,
            Err(UplinkError::InvariantViolation(_))
        ));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn server_hangup_rejects_pending_and_later_sends() {
        let (client, mut server) = pair(Some("tok"));
        next_command(&mut server).await;

        let pending = client.send_command("Work.x", json!({}), None);
        drop(server);

        assert!(matches!(
            pending.wait().await,
            Err(UplinkError::ConnectionClosed(_))
        ));
        assert!(client.wait_until_authenticated().await.is_err());

        let late = client.send_command("Work.y", json!({}), None);
        assert!(matches!(late.wait().await, Err(UplinkError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn events_reach_listeners() {
        let (client, mut server) = pair(Some("tok"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on("Recording.progress", move |params| {
            let _ = tx.send(params.clone());
        });

        reply(&mut server, json!({"method": "Recording.progress", "params": {"pct": 50}})).await;
        assert_eq!(rx.recv().await.unwrap(), json!({"pct": 50}));
    }
}
