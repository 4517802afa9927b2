//! Emulated push channel
//!
//! The coordination service offers no persistent duplex connection, so the
//! transport builds one from request/response calls: a handshake assigns a
//! client id, a receive loop polls for pending messages and feeds them to the
//! dispatch registry, and a heartbeat loop sends `ping` on a fixed cadence.
//!
//! Every loop belongs to one connection session. Tearing a connection down
//! bumps the session number, and loops from older sessions exit on their
//! next wake-up.

mod dispatch;

pub use dispatch::{DispatchRegistry, MessageHandler, handler_fn};

use chrono::{DateTime, Utc};
use lumen_client::ClientError;
use lumen_core::domain::message::{Message, kind, outbound};
use lumen_core::dto::messaging::HandshakeRequest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::repository::MessageRepository;

/// Client kind announced in the handshake and `register` message
pub const CLIENT_TYPE: &str = "editing_host_plugin";

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("message has no type")]
    MissingType,

    #[error("coordinator rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Cadences and identity used by the transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub client_name: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub receive_idle_delay: Duration,
    /// Pause between tearing down and re-opening on an explicit reconnect
    pub reconnect_pause: Duration,
    pub channels: Vec<String>,
}

impl From<&Config> for TransportSettings {
    fn from(config: &Config) -> Self {
        Self {
            client_name: config.client_name.clone(),
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            receive_idle_delay: config.receive_idle_delay,
            reconnect_pause: Duration::from_secs(1),
            channels: config.channels.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Connection {
    client_id: Option<String>,
    connected: bool,
    reconnect_attempts: u32,
    last_pong: Option<DateTime<Utc>>,
    session: u64,
}

impl Connection {
    /// Clears the connection and retires the current session's loops
    fn tear_down(&mut self) -> bool {
        let was_connected = self.connected;
        self.connected = false;
        self.client_id = None;
        self.session += 1;
        was_connected
    }
}

pub struct Transport {
    me: Weak<Transport>,
    repo: Arc<dyn MessageRepository>,
    registry: Arc<DispatchRegistry>,
    clock: Arc<dyn Clock>,
    settings: TransportSettings,
    state: Mutex<Connection>,
    connecting: AtomicBool,
}

impl Transport {
    /// Creates a transport and installs its built-in handlers on `registry`
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        registry: Arc<DispatchRegistry>,
        clock: Arc<dyn Clock>,
        settings: TransportSettings,
    ) -> Arc<Self> {
        let transport = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            repo,
            registry,
            clock,
            settings,
            state: Mutex::new(Connection::default()),
            connecting: AtomicBool::new(false),
        });
        transport.install_handlers();
        transport
    }

    fn install_handlers(&self) {
        let me = self.me.clone();
        self.registry.register_handler(
            kind::CONNECTION_ESTABLISHED,
            handler_fn(move |message| {
                let me = me.clone();
                async move {
                    if let Some(transport) = me.upgrade() {
                        transport.on_connection_established(&message).await;
                    }
                    Ok(())
                }
            }),
        );

        let me = self.me.clone();
        self.registry.register_handler(
            kind::PONG,
            handler_fn(move |_| {
                let me = me.clone();
                async move {
                    if let Some(transport) = me.upgrade() {
                        let now = transport.clock.now();
                        transport.lock().last_pong = Some(now);
                        debug!("pong received");
                    }
                    Ok(())
                }
            }),
        );

        self.registry.register_handler(
            kind::ERROR,
            handler_fn(|message| async move {
                error!(
                    "Coordinator reported an error: {}",
                    message.str_field("message").unwrap_or("no details")
                );
                Ok(())
            }),
        );
    }

    #[allow(dead_code)]
    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    #[allow(dead_code)]
    pub fn client_id(&self) -> Option<String> {
        self.lock().client_id.clone()
    }

    #[allow(dead_code)]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// Time of the last `pong`; recorded only, never used to force a reconnect
    #[allow(dead_code)]
    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        self.lock().last_pong
    }

    /// Starts a connection task unless one is already running
    ///
    /// The task resolves to whether a handshake succeeded. Returns `None` when
    /// another connection task is in progress.
    pub fn connect(&self) -> Option<JoinHandle<bool>> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("Connection attempt already in progress");
            return None;
        }

        let Some(transport) = self.me.upgrade() else {
            self.connecting.store(false, Ordering::SeqCst);
            return None;
        };

        Some(tokio::spawn(async move {
            let connected = transport.connect_loop().await;
            transport.connecting.store(false, Ordering::SeqCst);
            connected
        }))
    }

    async fn connect_loop(&self) -> bool {
        let max_attempts = self.settings.max_reconnect_attempts;

        loop {
            if self.reconnect_attempts() >= max_attempts {
                error!(
                    "Handshake attempts exhausted ({}), waiting for an explicit reconnect",
                    max_attempts
                );
                return false;
            }

            match self.handshake().await {
                Ok(client_id) => {
                    self.on_connected(client_id).await;
                    return true;
                }
                Err(e) => {
                    let attempts = {
                        let mut state = self.lock();
                        state.reconnect_attempts += 1;
                        state.reconnect_attempts
                    };
                    warn!("Handshake attempt {}/{} failed: {}", attempts, max_attempts, e);

                    if attempts >= max_attempts {
                        error!("Giving up on the push channel after {} attempts", attempts);
                        return false;
                    }
                    time::sleep(self.settings.reconnect_delay).await;
                }
            }
        }
    }

    async fn handshake(&self) -> Result<String, TransportError> {
        let request = HandshakeRequest {
            client_type: CLIENT_TYPE.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        };

        let response = self.repo.handshake(&request).await?;
        response
            .accepted_client_id()
            .map(str::to_string)
            .ok_or_else(|| TransportError::Rejected("handshake not accepted".to_string()))
    }

    async fn on_connected(&self, client_id: String) {
        let session = {
            let mut state = self.lock();
            state.client_id = Some(client_id.clone());
            state.connected = true;
            state.reconnect_attempts = 0;
            state.session += 1;
            state.session
        };
        info!("Connected to coordinator as {}", client_id);

        if let Some(transport) = self.me.upgrade() {
            tokio::spawn(transport.clone().heartbeat_loop(session));
            tokio::spawn(transport.receive_loop(session));
        }

        self.register_client().await;
    }

    /// Announces the client and its channel subscriptions
    async fn register_client(&self) {
        let register = outbound::register(
            CLIENT_TYPE,
            &self.settings.client_name,
            env!("CARGO_PKG_VERSION"),
        );
        if let Err(e) = self.send(register).await {
            warn!("Failed to register client: {}", e);
        }
        if let Err(e) = self.send(outbound::subscribe(&self.settings.channels)).await {
            warn!("Failed to subscribe: {}", e);
        }
    }

    async fn on_connection_established(&self, message: &Message) {
        {
            let mut state = self.lock();
            if let Some(client_id) = message.str_field("client_id") {
                state.client_id = Some(client_id.to_string());
            }
            state.connected = true;
            state.reconnect_attempts = 0;
        }
        info!("Connection established");
        self.register_client().await;
    }

    fn is_current(&self, session: u64) -> bool {
        let state = self.lock();
        state.connected && state.session == session
    }

    async fn heartbeat_loop(self: Arc<Self>, session: u64) {
        loop {
            time::sleep(self.settings.heartbeat_interval).await;
            if !self.is_current(session) {
                debug!("Heartbeat for session {} stopped", session);
                return;
            }
            if let Err(e) = self.send(outbound::ping()).await {
                warn!("Heartbeat failed: {}", e);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, session: u64) {
        loop {
            let client_id = {
                let state = self.lock();
                match (&state.client_id, state.connected && state.session == session) {
                    (Some(id), true) => id.clone(),
                    _ => return,
                }
            };

            match self.repo.poll_messages(&client_id).await {
                Ok(batch) => {
                    if !self.is_current(session) {
                        return;
                    }
                    if batch.is_empty() {
                        time::sleep(self.settings.receive_idle_delay).await;
                        continue;
                    }
                    debug!("Received {} message(s)", batch.messages.len());
                    for (index, decoded) in batch.into_messages().enumerate() {
                        match decoded {
                            Ok(message) => self.registry.dispatch(message).await,
                            Err(e) => warn!("Dropping malformed message #{} in batch: {}", index, e),
                        }
                    }
                }
                Err(e) => {
                    if !self.is_current(session) {
                        return;
                    }
                    error!("Receive poll failed: {}", e);
                    self.lock().tear_down();
                    self.registry
                        .notify_listeners(kind::DISCONNECTED, &outbound::disconnected(&e.to_string()))
                        .await;

                    time::sleep(self.settings.reconnect_delay).await;
                    self.connect();
                    return;
                }
            }
        }
    }

    /// Sends one message over the channel
    ///
    /// Stamps the current time if the message has none. Never retries.
    pub async fn send(&self, mut message: Message) -> Result<(), TransportError> {
        let Some(kind) = message.kind().map(str::to_string) else {
            warn!("Refusing to send a message without a type");
            return Err(TransportError::MissingType);
        };

        let client_id = {
            let state = self.lock();
            match (&state.client_id, state.connected) {
                (Some(id), true) => id.clone(),
                _ => {
                    warn!("Not connected, dropping '{}' message", kind);
                    return Err(TransportError::NotConnected);
                }
            }
        };

        message.stamp_if_missing(self.clock.now().timestamp());

        match self.repo.send_message(&client_id, &message).await {
            Ok(response) if response.success => {
                debug!("Sent '{}'", kind);
                Ok(())
            }
            Ok(_) => {
                warn!("Coordinator did not accept '{}'", kind);
                Err(TransportError::Rejected(kind))
            }
            Err(e) => {
                error!("Failed to send '{}': {}", kind, e);
                Err(e.into())
            }
        }
    }

    /// Closes the channel, telling the coordinator when possible
    ///
    /// The session is retired before the notice goes out, so a loop failing
    /// meanwhile cannot schedule a reconnect.
    pub async fn disconnect(&self) {
        let client_id = {
            let mut state = self.lock();
            let client_id = state.client_id.clone();
            if !state.tear_down() {
                return;
            }
            client_id
        };

        if let Some(client_id) = client_id {
            let mut notice = outbound::disconnect();
            notice.stamp_if_missing(self.clock.now().timestamp());
            if let Err(e) = self.repo.send_message(&client_id, &notice).await {
                debug!("Disconnect notice not delivered: {}", e);
            }
        }

        info!("Disconnected from coordinator");
        self.registry
            .notify_listeners(kind::DISCONNECTED, &outbound::disconnected("client disconnect"))
            .await;
    }

    /// Tears the channel down and opens it again with a fresh attempt budget
    #[allow(dead_code)]
    pub async fn reconnect(&self) -> Option<JoinHandle<bool>> {
        self.disconnect().await;
        self.lock().reconnect_attempts = 0;
        time::sleep(self.settings.reconnect_pause).await;
        self.connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMessages, FixedClock, accepted_handshake};
    use lumen_core::dto::messaging::PollResponse;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn settings() -> TransportSettings {
        TransportSettings {
            client_name: "test-agent".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            receive_idle_delay: Duration::from_secs(1),
            reconnect_pause: Duration::from_secs(1),
            channels: vec!["jobs".to_string()],
        }
    }

    fn transport(repo: &Arc<FakeMessages>) -> Arc<Transport> {
        Transport::new(
            repo.clone(),
            Arc::new(DispatchRegistry::new()),
            Arc::new(FixedClock::default()),
            settings(),
        )
    }

    fn counter(transport: &Transport, kind: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        transport.registry().add_event_listener(
            kind,
            handler_fn(move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        count
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.client_name = "studio-mac".to_string();
        config.channels = vec!["jobs".to_string(), "metrics".to_string()];

        let settings = TransportSettings::from(&config);
        assert_eq!(settings.client_name, "studio-mac");
        assert_eq!(settings.max_reconnect_attempts, 10);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.channels, config.channels);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_registers_and_subscribes() {
        let repo = Arc::new(FakeMessages::accepting());
        let transport = transport(&repo);

        assert!(transport.connect().unwrap().await.unwrap());

        assert!(transport.is_connected());
        assert_eq!(transport.client_id().as_deref(), Some("client-1"));
        assert_eq!(transport.reconnect_attempts(), 0);
        assert_eq!(repo.sent_kinds(), vec!["register", "subscribe"]);

        let sent = repo.sent.lock().unwrap();
        assert_eq!(sent[0].str_field("client_type"), Some(CLIENT_TYPE));
        assert_eq!(sent[1].field("channels"), Some(&serde_json::json!(["jobs"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_gives_up_after_max_attempts() {
        let repo = Arc::new(FakeMessages::refusing());
        let transport = transport(&repo);
        let start = Instant::now();

        assert!(!transport.connect().unwrap().await.unwrap());

        assert_eq!(repo.handshake_count(), 10);
        assert_eq!(start.elapsed(), Duration::from_secs(45));
        let times = repo.handshake_times.lock().unwrap().clone();
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
        assert!(!transport.is_connected());

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(repo.handshake_count(), 10);

        // A plain connect does not get a new budget
        assert!(!transport.connect().unwrap().await.unwrap());
        assert_eq!(repo.handshake_count(), 10);

        let retry = transport.reconnect().await.unwrap();
        assert!(!retry.await.unwrap());
        assert_eq!(repo.handshake_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_running() {
        let repo = Arc::new(FakeMessages::refusing());
        let transport = transport(&repo);

        let first = transport.connect().unwrap();
        assert!(transport.connect().is_none());
        first.await.unwrap();
        assert_eq!(repo.handshake_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_handshake_resets_attempts() {
        let repo = Arc::new(FakeMessages::accepting().with_handshakes(vec![
            Err(ClientError::api_error(503, "starting")),
            Ok(Default::default()),
            Ok(accepted_handshake("client-7")),
        ]));
        let transport = transport(&repo);

        assert!(transport.connect().unwrap().await.unwrap());
        assert_eq!(repo.handshake_count(), 3);
        assert_eq!(transport.reconnect_attempts(), 0);
        assert_eq!(transport.client_id().as_deref(), Some("client-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_notifies_and_reconnects() {
        let repo = Arc::new(FakeMessages::accepting().with_polls(vec![
            Ok(PollResponse::default()),
            Err(ClientError::api_error(502, "bad gateway")),
        ]));
        let transport = transport(&repo);
        let first = counter(&transport, kind::DISCONNECTED);
        let second = counter(&transport, kind::DISCONNECTED);

        transport.connect().unwrap().await.unwrap();
        time::sleep(Duration::from_secs(3)).await;

        // Failed at t=1, reconnect waits for the delay
        assert!(!transport.is_connected());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(repo.handshake_count(), 1);

        time::sleep(Duration::from_secs(10)).await;
        assert!(transport.is_connected());
        assert_eq!(repo.handshake_count(), 2);
        let times = repo.handshake_times.lock().unwrap().clone();
        assert_eq!(times[1] - times[0], Duration::from_secs(6));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_messages_are_dispatched_in_order() {
        let repo = Arc::new(FakeMessages::accepting().with_polls(vec![Ok(
            PollResponse::from_messages([
                Message::new(kind::JOB_CREATED).with("n", 1),
                Message::default().with("n", 2),
                Message::new(kind::JOB_CREATED).with("n", 3),
            ]),
        )]));
        let transport = transport(&repo);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        transport.registry().add_event_listener(
            kind::JOB_CREATED,
            handler_fn(move |message: Message| {
                let s = s.clone();
                async move {
                    s.lock().unwrap().push(message.field("n").cloned());
                    Ok(())
                }
            }),
        );

        transport.connect().unwrap().await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(serde_json::json!(1)), Some(serde_json::json!(3))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_connection_and_batch() {
        let repo = Arc::new(FakeMessages::accepting().with_polls(vec![Ok(PollResponse {
            messages: vec![
                serde_json::json!({"type": "pong", "timestamp": 1_700_000_000.25}),
                serde_json::json!({"type": ["not", "a", "string"]}),
                serde_json::json!({"type": "job_created", "job_id": "j1", "timestamp": "2026-10-19T10:00:00Z"}),
            ],
        })]));
        let transport = transport(&repo);
        let created = counter(&transport, kind::JOB_CREATED);
        let dropped = counter(&transport, kind::DISCONNECTED);

        transport.connect().unwrap().await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert!(transport.is_connected());
        assert_eq!(repo.handshake_count(), 1);
        assert!(transport.last_pong().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection_and_type() {
        let repo = Arc::new(FakeMessages::accepting());
        let transport = transport(&repo);

        assert!(matches!(
            transport.send(outbound::ping()).await,
            Err(TransportError::NotConnected)
        ));

        transport.connect().unwrap().await.unwrap();
        assert!(matches!(
            transport.send(Message::default()).await,
            Err(TransportError::MissingType)
        ));

        transport.send(outbound::ping()).await.unwrap();
        let mut stamped = Message::new("job_progress");
        stamped.timestamp = Some(serde_json::json!(42));
        transport.send(stamped).await.unwrap();

        let sent = repo.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2].timestamp, Some(serde_json::json!(1_700_000_000)));
        assert_eq!(sent[3].timestamp, Some(serde_json::json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_and_pong() {
        let repo = Arc::new(FakeMessages::accepting());
        let transport = transport(&repo);
        transport.connect().unwrap().await.unwrap();

        time::sleep(Duration::from_secs(61)).await;
        let pings = repo.sent_kinds().iter().filter(|k| *k == "ping").count();
        assert_eq!(pings, 2);

        assert!(transport.last_pong().is_none());
        transport.registry().dispatch(Message::new(kind::PONG)).await;
        assert_eq!(transport.last_pong(), Some(FixedClock::default().0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_established_message() {
        let repo = Arc::new(FakeMessages::accepting());
        let transport = transport(&repo);

        transport
            .registry()
            .dispatch(Message::new(kind::CONNECTION_ESTABLISHED).with("client_id", "srv-9"))
            .await;

        assert!(transport.is_connected());
        assert_eq!(transport.client_id().as_deref(), Some("srv-9"));
        assert_eq!(repo.sent_kinds(), vec!["register", "subscribe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_loops_and_notifies() {
        let repo = Arc::new(FakeMessages::accepting());
        let transport = transport(&repo);
        let disconnected = counter(&transport, kind::DISCONNECTED);
        transport.connect().unwrap().await.unwrap();

        transport.disconnect().await;

        assert!(!transport.is_connected());
        assert!(transport.client_id().is_none());
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(repo.sent_kinds().last().map(String::as_str), Some("disconnect"));

        time::sleep(Duration::from_secs(90)).await;
        assert!(!repo.sent_kinds().contains(&"ping".to_string()));

        transport.disconnect().await;
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_during_disconnect_does_not_reconnect() {
        let poll_gate = Arc::new(Notify::new());
        let send_gate = Arc::new(Notify::new());
        let repo = Arc::new(
            FakeMessages::accepting()
                .with_polls(vec![Err(ClientError::api_error(502, "bad gateway"))])
                .gated_polls(poll_gate.clone())
                .holding_send(kind::DISCONNECT, send_gate.clone()),
        );
        let transport = transport(&repo);
        let disconnected = counter(&transport, kind::DISCONNECTED);
        transport.connect().unwrap().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let closing = tokio::spawn({
            let transport = transport.clone();
            async move { transport.disconnect().await }
        });
        time::sleep(Duration::from_millis(10)).await;
        assert!(!transport.is_connected());

        poll_gate.notify_one();
        time::sleep(Duration::from_secs(10)).await;
        send_gate.notify_one();
        closing.await.unwrap();
        time::sleep(Duration::from_secs(60)).await;

        assert!(!transport.is_connected());
        assert_eq!(repo.handshake_count(), 1);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(repo.sent_kinds().last().map(String::as_str), Some("disconnect"));
    }
}
