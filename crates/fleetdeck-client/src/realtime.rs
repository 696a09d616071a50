//! RealtimeChannel: owns at most one push connection at a time,
//! reconnects with bounded exponential backoff, consumes heartbeat
//! sentinels, and fans typed events out to registered subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use fleetdeck_core::push::{decode_frame, should_reconnect, FrameOutcome, PushEvent};

use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::session::SessionContext;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle, published on a watch channel. Drives UI status
/// text only; the only logic gated on it is the connect() no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ChannelStatus {
    pub fn ui_text(&self) -> &'static str {
        match self {
            ChannelStatus::Idle => "Idle",
            ChannelStatus::Connecting => "Connecting...",
            ChannelStatus::Open => "Live",
            ChannelStatus::Closed => "Disconnected",
        }
    }
}

/// Bounded exponential backoff. The attempt counter is incremented
/// before each scheduled try and reset to zero on every successful
/// open.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        ReconnectPolicy {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the next try: base × 2^(attempt−1), or None once the
    /// cap is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay * 2u32.pow(self.attempt - 1))
    }
}

type Callback = Arc<dyn Fn(&PushEvent) + Send + Sync>;

struct SubscriberRegistry {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    fn new() -> Self {
        SubscriberRegistry {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((id, callback));
        id
    }

    /// Removing an id that is not registered is a no-op.
    fn remove(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Deliver one event to every subscriber in registration order. A
    /// panicking subscriber is isolated so the rest still receive the
    /// event.
    fn dispatch(&self, event: &PushEvent) {
        let snapshot: Vec<(u64, Callback)> = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .clone();
        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(subscriber = id, "subscriber panicked while handling push event");
            }
        }
    }
}

/// Handle returned by [`RealtimeChannel::subscribe`]. Dropping it (or
/// calling `unsubscribe`) removes exactly the registered callback.
pub struct Subscription {
    id: u64,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

enum SocketExit {
    /// Explicit disconnect; no reconnect.
    Shutdown,
    /// Server closed with a do-not-reconnect code.
    Terminal,
    /// Credential replaced; reopen immediately under the new token.
    CredentialChanged,
    /// Abnormal close or transport error; schedule a backoff retry.
    Reconnect,
}

struct RunnerState {
    runner: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

pub struct RealtimeChannel {
    session: Arc<SessionContext>,
    config: ClientConfig,
    registry: Arc<SubscriberRegistry>,
    status_tx: watch::Sender<ChannelStatus>,
    state: Mutex<RunnerState>,
}

impl RealtimeChannel {
    pub fn new(session: Arc<SessionContext>, config: ClientConfig) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Arc::new(RealtimeChannel {
            session,
            config,
            registry: Arc::new(SubscriberRegistry::new()),
            status_tx,
            state: Mutex::new(RunnerState {
                runner: None,
                shutdown: None,
            }),
        })
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> ChannelStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&PushEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.add(Arc::new(callback));
        Subscription {
            id,
            registry: self.registry.clone(),
        }
    }

    /// Open the push connection. No-op while already Connecting or
    /// Open; fails fast without a connection attempt when no credential
    /// is present.
    pub fn connect(self: &Arc<Self>) -> Result<(), ChannelError> {
        let mut state = self.state.lock().expect("channel lock poisoned");
        if matches!(
            self.current_status(),
            ChannelStatus::Connecting | ChannelStatus::Open
        ) {
            return Ok(());
        }
        if self.session.credential().is_none() {
            return Err(ChannelError::Unauthenticated);
        }

        // A finished or signalled previous runner may still be winding
        // down; abort it so two sockets can never be open at once.
        if let Some(old) = state.runner.take() {
            old.abort();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.status_tx.send_replace(ChannelStatus::Connecting);
        let channel = self.clone();
        state.shutdown = Some(shutdown_tx);
        state.runner = Some(tokio::spawn(async move {
            channel.run(shutdown_rx).await;
        }));
        Ok(())
    }

    /// Close the connection with the normal-closure code and cancel any
    /// pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.state.lock().expect("channel lock poisoned");
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if self.current_status() != ChannelStatus::Idle {
            self.status_tx.send_replace(ChannelStatus::Closed);
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status_tx.send_replace(status);
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut policy = ReconnectPolicy::new(
            self.config.max_reconnect_attempts,
            self.config.reconnect_base_delay,
        );
        let mut credential_changes = self.session.subscribe_changes();
        credential_changes.mark_unchanged();

        loop {
            if *shutdown.borrow() {
                return;
            }
            // Reconnection is abandoned outright when the credential is
            // gone at fire time.
            let Some(credential) = self.session.credential() else {
                warn!("no credential available; realtime channel stays closed");
                self.set_status(ChannelStatus::Closed);
                return;
            };
            self.set_status(ChannelStatus::Connecting);
            let url = self.config.stream_url(&credential.token);

            let exit = tokio::select! {
                connected = connect_async(url.as_str()) => match connected {
                    Ok((socket, _)) => {
                        policy.reset();
                        self.set_status(ChannelStatus::Open);
                        info!("realtime channel connected");
                        let exit = self
                            .drive_socket(socket, &mut shutdown, &mut credential_changes)
                            .await;
                        self.set_status(ChannelStatus::Closed);
                        exit
                    }
                    Err(err) => {
                        warn!(error = %err, "realtime connect failed");
                        self.set_status(ChannelStatus::Closed);
                        SocketExit::Reconnect
                    }
                },
                _ = shutdown.changed() => {
                    self.set_status(ChannelStatus::Closed);
                    return;
                }
            };

            match exit {
                SocketExit::Shutdown => return,
                SocketExit::Terminal => {
                    info!("realtime channel closed; reconnect suppressed");
                    return;
                }
                SocketExit::CredentialChanged => {
                    policy.reset();
                    continue;
                }
                SocketExit::Reconnect => match policy.next_delay() {
                    Some(delay) => {
                        info!(
                            attempt = policy.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            "scheduling realtime reconnect"
                        );
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = shutdown.changed() => return,
                        }
                    }
                    None => {
                        warn!(
                            max_attempts = self.config.max_reconnect_attempts,
                            "realtime reconnect attempts exhausted"
                        );
                        return;
                    }
                },
            }
        }
    }

    async fn drive_socket(
        &self,
        socket: WsStream,
        shutdown: &mut watch::Receiver<bool>,
        credential_changes: &mut watch::Receiver<u64>,
    ) -> SocketExit {
        let (mut sink, mut stream) = socket.split();
        let mut heartbeat = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(close))) => {
                        // 1006 (abnormal) when the peer sent no code.
                        let code = close.as_ref().map(|f| u16::from(f.code)).unwrap_or(1006);
                        info!(code, "realtime channel closed by server");
                        return if should_reconnect(code) {
                            SocketExit::Reconnect
                        } else {
                            SocketExit::Terminal
                        };
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "realtime read error");
                        return SocketExit::Reconnect;
                    }
                    None => {
                        warn!("realtime stream ended");
                        return SocketExit::Reconnect;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(err) = sink.send(Message::Text("ping".to_string())).await {
                        warn!(error = %err, "heartbeat send failed");
                        return SocketExit::Reconnect;
                    }
                }
                _ = credential_changes.changed() => {
                    info!("credential replaced; reopening realtime channel");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "credential changed".into(),
                        })))
                        .await;
                    return SocketExit::CredentialChanged;
                }
                _ = shutdown.changed() => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        })))
                        .await;
                    return SocketExit::Shutdown;
                }
            }
        }
    }

    /// Inbound frames are processed strictly in arrival order; all
    /// subscribers are notified before the next frame is read.
    fn handle_text(&self, text: &str) {
        match decode_frame(text) {
            FrameOutcome::Heartbeat => {}
            FrameOutcome::Event(PushEvent::Unknown { event_type }) => {
                debug!(event_type = %event_type, "dropping unknown push event");
            }
            FrameOutcome::Event(event) => self.registry.dispatch(&event),
            FrameOutcome::Malformed(err) => {
                warn!(error = %err, "dropping malformed push frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{ApiRequest, ApiResponse, ApiTransport};
    use crate::error::TransportError;
    use crate::session::IdentitySelector;
    use async_trait::async_trait;
    use serde_json::json;

    struct LoginOnlyTransport;

    #[async_trait]
    impl ApiTransport for LoginOnlyTransport {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            assert_eq!(request.path, "/auth/login");
            Ok(ApiResponse {
                status: 200,
                body: json!({
                    "access_token": "tok-1",
                    "username": "demo_admin",
                    "role": "admin"
                }),
            })
        }
    }

    fn test_channel() -> Arc<RealtimeChannel> {
        let session = Arc::new(SessionContext::new(Arc::new(LoginOnlyTransport)));
        RealtimeChannel::new(session, ClientConfig::default())
    }

    async fn authenticated_channel() -> Arc<RealtimeChannel> {
        let session = Arc::new(SessionContext::new(Arc::new(LoginOnlyTransport)));
        session
            .authenticate(IdentitySelector {
                username: "demo_admin".to_string(),
                password: "admin123".to_string(),
            })
            .await
            .unwrap();
        RealtimeChannel::new(session, ClientConfig::default())
    }

    #[test]
    fn backoff_schedule_doubles_per_attempt_and_stops_at_cap() {
        let mut policy = ReconnectPolicy::new(5, Duration::from_millis(2000));
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000]);
        assert!(policy.next_delay().is_none());

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn subscribers_receive_events_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=3u32 {
            let order = order.clone();
            registry.add(Arc::new(move |_event: &PushEvent| {
                order.lock().unwrap().push(tag);
            }));
        }

        registry.dispatch(&PushEvent::Error {
            message: "x".to_string(),
        });
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        registry.add(Arc::new(move |_: &PushEvent| {
            first.lock().unwrap().push("first");
        }));
        registry.add(Arc::new(|_: &PushEvent| panic!("subscriber bug")));
        let third = seen.clone();
        registry.add(Arc::new(move |_: &PushEvent| {
            third.lock().unwrap().push("third");
        }));

        registry.dispatch(&PushEvent::StatsUpdate(Default::default()));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn unsubscribe_removes_exactly_that_callback_and_is_idempotent() {
        let registry = Arc::new(SubscriberRegistry::new());
        let count = Arc::new(Mutex::new(0u32));

        let keeper = count.clone();
        registry.add(Arc::new(move |_: &PushEvent| {
            *keeper.lock().unwrap() += 1;
        }));
        let removed = registry.add(Arc::new(|_: &PushEvent| {
            panic!("should never run");
        }));

        registry.remove(removed);
        registry.remove(removed); // second removal is a no-op

        registry.dispatch(&PushEvent::Error {
            message: "x".to_string(),
        });
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn connect_without_credential_fails_fast() {
        let channel = test_channel();
        assert!(matches!(
            channel.connect(),
            Err(ChannelError::Unauthenticated)
        ));
        assert_eq!(channel.current_status(), ChannelStatus::Idle);
        assert!(channel.state.lock().unwrap().runner.is_none());
    }

    #[tokio::test]
    async fn connect_is_a_no_op_while_connecting_or_open() {
        let channel = authenticated_channel().await;

        channel.status_tx.send_replace(ChannelStatus::Connecting);
        channel.connect().unwrap();
        assert!(channel.state.lock().unwrap().runner.is_none());

        channel.status_tx.send_replace(ChannelStatus::Open);
        channel.connect().unwrap();
        assert!(channel.state.lock().unwrap().runner.is_none());
    }

    #[tokio::test]
    async fn disconnect_then_connect_never_leaves_two_runners() {
        let channel = authenticated_channel().await;

        channel.connect().unwrap();
        assert_eq!(channel.current_status(), ChannelStatus::Connecting);
        channel.disconnect();
        assert_eq!(channel.current_status(), ChannelStatus::Closed);

        channel.connect().unwrap();
        assert_eq!(channel.current_status(), ChannelStatus::Connecting);
        {
            let state = channel.state.lock().unwrap();
            assert!(state.runner.is_some());
            assert!(state.shutdown.is_some());
        }

        channel.disconnect();
        channel.disconnect(); // idempotent
        assert_eq!(channel.current_status(), ChannelStatus::Closed);
    }

    #[tokio::test]
    async fn heartbeats_and_unknown_events_never_reach_subscribers() {
        let channel = authenticated_channel().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = channel.subscribe(move |event: &PushEvent| {
            sink.lock().unwrap().push(event.clone());
        });

        channel.handle_text("ping");
        channel.handle_text("pong");
        channel.handle_text(r#"{"type":"route_update","data":{}}"#);
        channel.handle_text("{{{ not json");
        channel.handle_text(r#"{"type":"stats_update","data":{"active_vehicles":9}}"#);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            PushEvent::StatsUpdate(stats) => assert_eq!(stats.active_vehicles, 9),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_the_subscription_unregisters() {
        let channel = authenticated_channel().await;
        let seen = Arc::new(Mutex::new(0u32));
        let sink = seen.clone();
        let subscription = channel.subscribe(move |_: &PushEvent| {
            *sink.lock().unwrap() += 1;
        });

        channel.handle_text(r#"{"type":"stats_update","data":{}}"#);
        subscription.unsubscribe();
        channel.handle_text(r#"{"type":"stats_update","data":{}}"#);

        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
