//! Connection manager for the host's inspection endpoint.
//!
//! One [`ConnectionManager`] owns at most one live session. A session holds the
//! request id counter, the pending-request table and the execution-context
//! registry; it is discarded as a whole when the socket closes and rebuilt on
//! the next successful connect.

use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use agent_relay_core::{
    EventBus,
    config::{ConnectionConfig, DiscoveryConfig},
    event_bus::names,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    CdpError,
    discovery::{Target, select_target},
    probe::ContextEvaluator,
    protocol::{ContextEvent, Inbound, Notification, RUNTIME_EVALUATE, Request, parse_frame},
};

const NOTIFICATION_CAPACITY: usize = 256;

/// In-process ends of an opened duplex socket.
///
/// Dropping `outbound` asks the connector to close the socket; `inbound`
/// yielding `None` means the socket is gone.
pub struct FrameChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// How the manager finds and opens the host socket.
#[async_trait]
pub trait Connector: Send + Sync {
    /// List the targets the host currently exposes.
    async fn discover(&self) -> Result<Vec<Target>, CdpError>;

    /// Open a duplex frame channel to `target`.
    async fn open(&self, target: &Target) -> Result<FrameChannel, CdpError>;
}

/// A live script-evaluation scope inside the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub id: i64,
    pub origin: String,
    pub name: String,
    /// Creation sequence within the session; higher is newer.
    pub created_order: u64,
}

type Reply = oneshot::Sender<Result<Value, CdpError>>;

struct Session {
    generation: u64,
    target: Target,
    next_id: u64,
    pending: HashMap<u64, Reply>,
    contexts: HashMap<i64, ExecutionContext>,
    context_seq: u64,
    outbound: mpsc::UnboundedSender<String>,
    // Dropping the session wakes its read loop.
    _closed: oneshot::Sender<()>,
}

impl Session {
    fn new(
        generation: u64,
        target: Target,
        outbound: mpsc::UnboundedSender<String>,
        closed: oneshot::Sender<()>,
    ) -> Self {
        Self {
            generation,
            target,
            next_id: 1,
            pending: HashMap::new(),
            contexts: HashMap::new(),
            context_seq: 0,
            outbound,
            _closed: closed,
        }
    }

    fn dispatch(
        &mut self,
        method: &str,
        params: &Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, CdpError>>), CdpError> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = serde_json::to_string(&Request { id, method, params })?;
        self.outbound
            .send(frame)
            .map_err(|_| CdpError::ConnectionClosed)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        Ok((id, rx))
    }

    fn apply(&mut self, event: ContextEvent) {
        match event {
            ContextEvent::Created(desc) => {
                self.context_seq += 1;
                tracing::debug!(
                    context_id = desc.id,
                    origin = %desc.origin,
                    "Execution context created"
                );
                self.contexts.insert(
                    desc.id,
                    ExecutionContext {
                        id: desc.id,
                        origin: desc.origin,
                        name: desc.name,
                        created_order: self.context_seq,
                    },
                );
            }
            ContextEvent::Destroyed(id) => {
                tracing::debug!(context_id = id, "Execution context destroyed");
                self.contexts.remove(&id);
            }
            ContextEvent::Cleared => {
                tracing::debug!(count = self.contexts.len(), "Execution contexts cleared");
                self.contexts.clear();
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    generation: u64,
    connecting: bool,
    reconnect_pending: bool,
    stopped: bool,
}

/// Owns the duplex connection to the host.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    discovery: DiscoveryConfig,
    settings: ConnectionConfig,
    bus: Arc<EventBus>,
    inner: Mutex<Inner>,
    notifications: broadcast::Sender<Notification>,
}

impl ConnectionManager {
    /// Create a new, disconnected manager.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        discovery: DiscoveryConfig,
        settings: ConnectionConfig,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Arc::new(Self {
            connector,
            discovery,
            settings,
            bus,
            inner: Mutex::new(Inner::default()),
            notifications,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ensure a live session exists.
    ///
    /// Returns `true` if a session is live on return. Any failure schedules a
    /// single reconnect attempt and returns `false`.
    pub async fn connect(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.lock();
            if inner.stopped {
                return false;
            }
            if inner.session.is_some() {
                return true;
            }
            if inner.connecting {
                return false;
            }
            inner.connecting = true;
        }

        let result = self.open_session().await;
        self.lock().connecting = false;

        match result {
            Ok(target) => {
                tracing::info!(title = %target.title, url = %target.url, "Connected to host");
                true
            }
            Err(err) => {
                tracing::warn!(%err, "Connect attempt failed");
                self.schedule_reconnect();
                false
            }
        }
    }

    async fn open_session(self: &Arc<Self>) -> Result<Target, CdpError> {
        let targets = self.connector.discover().await?;
        let target = select_target(&targets, &self.discovery)
            .cloned()
            .ok_or_else(|| {
                CdpError::Discovery(format!("no matching target among {}", targets.len()))
            })?;
        let FrameChannel { outbound, inbound } = self.connector.open(&target).await?;
        let (closed_tx, closed_rx) = oneshot::channel();

        let (generation, enables) = {
            let mut inner = self.lock();
            if inner.stopped {
                return Err(CdpError::ConnectionClosed);
            }
            inner.generation += 1;
            let mut session = Session::new(inner.generation, target.clone(), outbound, closed_tx);

            // Enable requests go out first so context notifications start flowing.
            let mut enables = Vec::with_capacity(self.settings.enable_domains.len());
            for domain in &self.settings.enable_domains {
                let method = format!("{domain}.enable");
                let (_, reply) = session.dispatch(&method, &json!({}))?;
                enables.push((method, reply));
            }
            inner.session = Some(session);
            (inner.generation, enables)
        };

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.read_loop(generation, inbound, closed_rx).await });

        for (method, reply) in enables {
            tokio::spawn(async move {
                match reply.await {
                    Ok(Ok(_)) => tracing::debug!(method, "Domain enabled"),
                    Ok(Err(err)) => tracing::warn!(method, %err, "Domain enable failed"),
                    Err(_) => {}
                }
            });
        }

        self.bus.publish(
            names::CONNECTION_STATE,
            json!({ "connected": true, "target": target }),
        );
        Ok(target)
    }

    /// Arm the reconnect timer unless one is already pending.
    fn schedule_reconnect(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.stopped || inner.reconnect_pending {
                return;
            }
            inner.reconnect_pending = true;
        }

        let delay = self.settings.reconnect_delay();
        tracing::info!(delay_ms = self.settings.reconnect_delay_ms, "Reconnect scheduled");
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.lock().reconnect_pending = false;
            manager.connect().await;
        });
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut closed: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(generation, &frame),
                    None => break,
                },
                _ = &mut closed => break,
            }
        }
        self.close_session(generation);
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, "Ignoring inbound frame");
                return;
            }
        };

        match frame {
            Inbound::Response { id, outcome } => {
                let reply = self
                    .lock()
                    .session
                    .as_mut()
                    .filter(|s| s.generation == generation)
                    .and_then(|s| s.pending.remove(&id));
                match reply {
                    Some(reply) => {
                        let _ = reply.send(outcome.map_err(CdpError::from));
                    }
                    None => tracing::debug!(id, "Response for unknown or abandoned request"),
                }
            }
            Inbound::Notification(notification) => {
                {
                    let mut inner = self.lock();
                    let Some(session) = inner
                        .session
                        .as_mut()
                        .filter(|s| s.generation == generation)
                    else {
                        tracing::debug!(
                            method = %notification.method,
                            "Notification from a closed session"
                        );
                        return;
                    };
                    if let Some(event) = notification.context_event() {
                        session.apply(event);
                    }
                }
                let _ = self.notifications.send(notification);
            }
        }
    }

    /// Tear down the session of `generation` if it is still the live one.
    fn close_session(self: &Arc<Self>, generation: u64) {
        let session = {
            let mut inner = self.lock();
            match inner.session.as_ref() {
                Some(s) if s.generation == generation => inner.session.take(),
                _ => None,
            }
        };
        if let Some(session) = session {
            self.teardown(session);
            self.schedule_reconnect();
        }
    }

    fn teardown(&self, session: Session) {
        let rejected = session.pending.len();
        for (_, reply) in session.pending {
            let _ = reply.send(Err(CdpError::ConnectionClosed));
        }
        tracing::info!(url = %session.target.url, rejected, "Session closed");
        self.bus.publish(
            names::CONNECTION_STATE,
            json!({ "connected": false, "target": null }),
        );
    }

    fn dispatch(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<(u64, u64, oneshot::Receiver<Result<Value, CdpError>>), CdpError> {
        let mut inner = self.lock();
        let session = inner.session.as_mut().ok_or(CdpError::NotConnected)?;
        let (id, reply) = session.dispatch(method, params)?;
        Ok((session.generation, id, reply))
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    /// Returns `NotConnected` without a live session, `ConnectionClosed` if the
    /// session ends first, or `Protocol` if the host answers with an error.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        let (_, _, reply) = self.dispatch(method, &params)?;
        reply
            .await
            .unwrap_or_else(|_| Err(CdpError::ConnectionClosed))
    }

    /// Send a request, giving up on the response after `timeout`.
    ///
    /// The host may still act on an abandoned request; its late response is
    /// ignored.
    ///
    /// # Errors
    /// As [`ConnectionManager::send`], plus `Timeout` when the wait is abandoned.
    pub async fn send_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let (generation, id, reply) = self.dispatch(method, &params)?;
        if let Ok(outcome) = tokio::time::timeout(timeout, reply).await {
            return outcome.unwrap_or_else(|_| Err(CdpError::ConnectionClosed));
        }

        if let Some(session) = self
            .lock()
            .session
            .as_mut()
            .filter(|s| s.generation == generation)
        {
            session.pending.remove(&id);
        }
        tracing::debug!(method, id, "Request timed out");
        Err(CdpError::Timeout(method.to_string()))
    }

    /// Receiver for every inbound notification.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Target of the live session.
    #[must_use]
    pub fn current_target(&self) -> Option<Target> {
        self.lock().session.as_ref().map(|s| s.target.clone())
    }

    /// Close the live session and stop reconnecting.
    pub fn shutdown(&self) {
        let session = {
            let mut inner = self.lock();
            inner.stopped = true;
            inner.session.take()
        };
        if let Some(session) = session {
            self.teardown(session);
        }
        tracing::info!("Connection manager stopped");
    }
}

#[async_trait]
impl ContextEvaluator for ConnectionManager {
    fn contexts(&self) -> Vec<ExecutionContext> {
        let mut contexts: Vec<ExecutionContext> = self
            .lock()
            .session
            .as_ref()
            .map(|s| s.contexts.values().cloned().collect())
            .unwrap_or_default();
        contexts.sort_by_key(|c| Reverse(c.created_order));
        contexts
    }

    async fn evaluate(
        &self,
        context_id: i64,
        expression: &str,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let params = json!({
            "expression": expression,
            "contextId": context_id,
            "returnByValue": true,
            "awaitPromise": true,
        });
        let response = self.send_timeout(RUNTIME_EVALUATE, params, timeout).await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script raised an exception");
            return Err(CdpError::Evaluation(message.to_string()));
        }
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}
