//! # Consumer
//!
//! The client role: watches a remote service's availability, subscribes to
//! its event groups, calls its methods and routes what comes back.
//!
//! ## Architecture
//!
//! One pump task per consumer reads the transport and handles everything in
//! delivery order: availability signals drive the `AvailabilityMonitor`,
//! responses go through the `Correlator`, notifications go to the handler
//! registered for their event. The same pump sweeps expired requests.
//!
//! Subscriptions and initial requests are declared up front and carried out
//! by a built-in availability action each time the service becomes
//! available. Going unavailable marks subscriptions stale and fails the
//! requests in flight to that service.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use somepack::Payload;
use somerpc::CorrelationToken;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::Message;
use somerpc::MessageKind;
use somerpc::MethodId;
use somerpc::ServiceAddress;

use crate::availability::AvailabilityAction;
use crate::availability::AvailabilityMonitor;
use crate::availability::AvailabilityState;
use crate::availability::Transition;
use crate::config;
use crate::config::Config;
use crate::correlator::CorrelationMode;
use crate::correlator::Correlator;
use crate::correlator::Delivery;
use crate::correlator::Error;
use crate::correlator::Result;
use crate::transport::Inbound;
use crate::transport::Transport;

/// Receives notifications for one event.
pub trait EventHandler: Send + Sync + 'static {
    fn on_event(&self, notification: &Message);
}

impl<F> EventHandler for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn on_event(&self, notification: &Message) {
        self(notification)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Declared, not yet sent.
    Pending,
    /// Sent while the service was available.
    Active,
    /// The service went away since the subscription was sent.
    Stale,
}

#[derive(Clone, Debug)]
struct InitialRequest {
    address: ServiceAddress,
    method: MethodId,
    payload: Option<Payload>,
}

/// Requests and subscriptions bound to one transport.
struct Session {
    name: String,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    subscriptions: DashMap<(ServiceAddress, EventGroupId), SubscriptionState>,
    initial_requests: Mutex<Vec<InitialRequest>>,
}

impl Session {
    async fn send(
        &self,
        address: ServiceAddress,
        method: MethodId,
        payload: Option<Payload>,
        awaited: bool,
    ) -> Result<(CorrelationToken, Option<oneshot::Receiver<Result<Message>>>)> {
        let (token, rx) = self.correlator.issue(address, method, awaited);
        let request = Message::request(address, method, payload).with_token(token);

        if let Err(e) = self.transport.send(request).await {
            self.correlator.cancel(token);
            return Err(e.into());
        }
        tracing::debug!(consumer = %self.name, %address, %method, %token, "request sent");
        Ok((token, rx))
    }
}

#[async_trait::async_trait]
impl AvailabilityAction for Session {
    async fn on_available(&self, address: ServiceAddress) {
        let groups: Vec<EventGroupId> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.key().0 == address)
            .map(|entry| entry.key().1)
            .collect();

        for group in groups {
            match self.transport.subscribe(address, group).await {
                Ok(()) => {
                    self.subscriptions.insert((address, group), SubscriptionState::Active);
                    tracing::info!(consumer = %self.name, %address, %group, "subscribed");
                }
                Err(e) => {
                    tracing::warn!(consumer = %self.name, %address, %group, error = %e, "subscribe failed");
                }
            }
        }

        let requests: Vec<InitialRequest> = {
            let initial = self.initial_requests.lock().unwrap_or_else(|e| e.into_inner());
            initial.iter().filter(|r| r.address == address).cloned().collect()
        };
        for request in requests {
            if let Err(e) = self.send(request.address, request.method, request.payload, false).await {
                tracing::warn!(consumer = %self.name, %address, method = %request.method, error = %e, "initial request failed");
            }
        }
    }

    async fn on_unavailable(&self, address: ServiceAddress) {
        for mut entry in self.subscriptions.iter_mut() {
            if entry.key().0 == address {
                *entry.value_mut() = SubscriptionState::Stale;
            }
        }

        let failed = self.correlator.fail_address(address);
        if failed > 0 {
            tracing::info!(consumer = %self.name, %address, failed, "requests failed by unavailable service");
        }
    }
}

struct Inner {
    session: Arc<Session>,
    monitor: tokio::sync::Mutex<AvailabilityMonitor>,
    events: DashMap<(ServiceAddress, EventId), Arc<dyn EventHandler>>,
    request_timeout: Duration,
}

/// A client endpoint. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        mode: CorrelationMode,
        request_timeout: Duration,
    ) -> config::Result<Self> {
        if request_timeout.is_zero() {
            return Err(config::Error::Invalid("request timeout must be positive".to_string()));
        }
        let session = Arc::new(Session {
            name: name.into(),
            transport,
            correlator: Arc::new(Correlator::new(mode)),
            subscriptions: DashMap::new(),
            initial_requests: Mutex::new(Vec::new()),
        });

        let mut monitor = AvailabilityMonitor::new();
        monitor.register(session.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                session,
                monitor: tokio::sync::Mutex::new(monitor),
                events: DashMap::new(),
                request_timeout,
            }),
        })
    }

    pub fn from_config(
        name: impl Into<String>,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> config::Result<Self> {
        config.validate()?;
        Self::new(name, transport, config.client.correlation, config.client.request_timeout())
    }

    pub fn name(&self) -> &str {
        &self.inner.session.name
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.session.correlator
    }

    /// Asks discovery to report `address`.
    pub async fn request_service(&self, address: ServiceAddress) -> Result<()> {
        self.inner.session.transport.request_service(address).await?;
        tracing::info!(consumer = %self.name(), %address, "service requested");
        Ok(())
    }

    /// Subscribes to `group` every time `address` becomes available.
    pub fn subscribe_on_available(&self, address: ServiceAddress, group: EventGroupId) {
        self.inner
            .session
            .subscriptions
            .entry((address, group))
            .or_insert(SubscriptionState::Pending);
    }

    /// Sends `method` every time `address` becomes available. Its response is logged.
    pub fn request_on_available(&self, address: ServiceAddress, method: MethodId, payload: Option<Payload>) {
        self.inner
            .session
            .initial_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(InitialRequest { address, method, payload });
    }

    /// Stops following `address`.
    ///
    /// Unsubscribes its groups, releases the service and forgets every
    /// subscription, initial request and event handler declared for it.
    /// The service then counts as unavailable, so requests in flight to it fail.
    pub async fn release(&self, address: ServiceAddress) -> Result<()> {
        let session = &self.inner.session;
        let groups: Vec<EventGroupId> = session
            .subscriptions
            .iter()
            .filter(|entry| entry.key().0 == address)
            .map(|entry| entry.key().1)
            .collect();

        for group in groups {
            session.transport.unsubscribe(address, group).await?;
        }
        session.transport.release_service(address).await?;

        session.subscriptions.retain(|(addr, _), _| *addr != address);
        session
            .initial_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|request| request.address != address);
        self.inner.events.retain(|(addr, _), _| *addr != address);

        self.on_availability_changed(address, false).await;
        tracing::info!(consumer = %self.name(), %address, "service released");
        Ok(())
    }

    /// Runs `action` after the built-in subscribe and initial-request action.
    pub async fn add_availability_action(&self, action: Arc<dyn AvailabilityAction>) {
        self.inner.monitor.lock().await.register(action);
    }

    /// Routes notifications of `event` on `address` to `handler`, replacing any previous one.
    pub fn on_event<F>(&self, address: ServiceAddress, event: EventId, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.events.insert((address, event), Arc::new(handler));
    }

    pub async fn availability(&self, address: ServiceAddress) -> AvailabilityState {
        self.inner.monitor.lock().await.state(address)
    }

    pub fn subscription_state(&self, address: ServiceAddress, group: EventGroupId) -> Option<SubscriptionState> {
        self.inner.session.subscriptions.get(&(address, group)).map(|entry| *entry.value())
    }

    /// Sends a request and returns a handle to await its response.
    pub async fn send_request(
        &self,
        address: ServiceAddress,
        method: MethodId,
        payload: Option<Payload>,
    ) -> Result<PendingCall> {
        let (token, rx) = self.inner.session.send(address, method, payload, true).await?;
        let rx = rx.ok_or(Error::ChannelClosed)?;
        Ok(PendingCall {
            token,
            rx,
            correlator: self.inner.session.correlator.clone(),
            timeout: self.inner.request_timeout,
        })
    }

    /// Sends a request and waits for its response.
    pub async fn call(&self, address: ServiceAddress, method: MethodId, payload: Option<Payload>) -> Result<Message> {
        self.send_request(address, method, payload).await?.wait().await
    }

    pub async fn on_availability_changed(&self, address: ServiceAddress, available: bool) -> Option<Transition> {
        self.inner.monitor.lock().await.on_availability_changed(address, available).await
    }

    pub fn on_response_received(&self, response: Message) {
        let name = self.name();
        let (address, method, token) = (response.address, response.method, response.token);
        let text = response.payload_or_empty().to_text_lossy().into_owned();

        match self.inner.session.correlator.deliver(response) {
            Delivery::Delivered => {
                tracing::debug!(consumer = %name, %address, %method, %token, "response delivered");
            }
            Delivery::Unawaited(_) => {
                tracing::info!(consumer = %name, %address, %method, response = %text, "response received");
            }
            Delivery::Unmatched => {
                tracing::warn!(consumer = %name, %address, %method, %token, response = %text, "dropping unmatched response");
            }
        }
    }

    pub fn on_notification(&self, notification: Message) {
        let (address, event) = (notification.address, notification.event());
        let handler = self.inner.events.get(&(address, event)).map(|entry| entry.value().clone());

        if let Some(handler) = handler {
            handler.on_event(&notification);
            return;
        }
        match &notification.payload {
            Some(payload) if !payload.is_empty() => {
                tracing::info!(consumer = %self.name(), %address, %event, text = %payload.to_text_lossy(), "event received");
            }
            _ => {
                tracing::info!(consumer = %self.name(), %address, %event, "event received with empty payload");
            }
        }
    }

    /// Handles one inbound signal.
    pub async fn on_inbound(&self, inbound: Inbound) {
        match inbound {
            Inbound::Availability { address, available } => {
                self.on_availability_changed(address, available).await;
            }
            Inbound::Message(message) => match message.kind {
                MessageKind::Response => self.on_response_received(message),
                MessageKind::Notification => self.on_notification(message),
                MessageKind::Request => {
                    tracing::warn!(consumer = %self.name(), method = %message.method, "consumer received a request");
                }
            },
        }
    }

    /// Pumps the transport until `cancel` fires or the transport closes.
    ///
    /// Requests still pending on exit fail with `ChannelClosed`.
    pub async fn run(&self, cancel: CancellationToken) {
        let session = &self.inner.session;
        let mut sweep = tokio::time::interval(self.inner.request_timeout);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    let expired = session.correlator.expire(self.inner.request_timeout);
                    if expired > 0 {
                        tracing::warn!(consumer = %self.name(), expired, "requests timed out");
                    }
                }
                inbound = session.transport.recv() => match inbound {
                    Ok(Some(inbound)) => self.on_inbound(inbound).await,
                    Ok(None) => {
                        tracing::info!(consumer = %self.name(), "transport closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(consumer = %self.name(), error = %e, "transport failed");
                        break;
                    }
                },
            }
        }

        let failed = session.correlator.fail_all(Error::ChannelClosed);
        tracing::info!(consumer = %self.name(), failed, "consumer stopped");
    }

    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let consumer = self.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name())
            .field("mode", &self.inner.session.correlator.mode())
            .field("pending", &self.inner.session.correlator.len())
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

/// A request in flight.
#[derive(Debug)]
pub struct PendingCall {
    token: CorrelationToken,
    rx: oneshot::Receiver<Result<Message>>,
    correlator: Arc<Correlator>,
    timeout: Duration,
}

impl PendingCall {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Waits for the response, at most the request timeout.
    pub async fn wait(self) -> Result<Message> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.correlator.cancel(self.token);
                Err(Error::Timeout)
            }
        }
    }
}
