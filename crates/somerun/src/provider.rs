//! # Provider
//!
//! The server role: offers a service and its events, and answers every
//! inbound request through a `MethodTable`.
//!
//! ## Invariants
//!
//! - Every request gets exactly one response, carrying the handler's payload
//!   verbatim. Unknown methods and failed handlers are answered too.
//! - A missing request payload is logged, not rejected.
//! - Inbound requests are handled one at a time, in delivery order.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use somepack::Payload;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::Message;
use somerpc::MessageKind;
use somerpc::MethodTable;
use somerpc::Outcome;
use somerpc::ServiceAddress;

use crate::config;
use crate::config::Config;
use crate::transport;
use crate::transport::Inbound;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Dispatch(somerpc::Error),
    Transport(transport::Error),
    Config(config::Error),
    /// Something other than a request reached the request path.
    NotARequest(MessageKind),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatch(e) => write!(f, "Dispatch setup error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Config(e) => write!(f, "Config error: {}", e),
            Self::NotARequest(kind) => write!(f, "Expected a request, got {:?}", kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<somerpc::Error> for Error {
    fn from(e: somerpc::Error) -> Self {
        Self::Dispatch(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An event the provider declares when it offers its service.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventOffer {
    pub event: EventId,
    pub group: EventGroupId,
}

pub struct Provider {
    name: String,
    address: ServiceAddress,
    transport: Arc<dyn Transport>,
    methods: MethodTable,
    events: Vec<EventOffer>,
    responses_sent: AtomicU64,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        address: ServiceAddress,
        transport: Arc<dyn Transport>,
        methods: MethodTable,
        events: Vec<EventOffer>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            transport,
            methods,
            events,
            responses_sent: AtomicU64::new(0),
        }
    }

    /// A provider for the configured address offering the configured events.
    pub fn from_config(
        name: impl Into<String>,
        config: &Config,
        transport: Arc<dyn Transport>,
        methods: MethodTable,
    ) -> Result<Self> {
        config.validate()?;
        let events = config
            .publisher
            .events
            .iter()
            .map(|event| EventOffer {
                event: event.event(),
                group: event.group(),
            })
            .collect();
        Ok(Self::new(name, config.service.address(), transport, methods, events))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> ServiceAddress {
        self.address
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn responses_sent(&self) -> u64 {
        self.responses_sent.load(Ordering::Relaxed)
    }

    /// Declares every event, then offers the service.
    pub async fn offer(&self) -> Result<()> {
        for offer in &self.events {
            self.transport.offer_event(self.address, offer.event, offer.group).await?;
        }
        self.transport.offer_service(self.address).await?;
        tracing::info!(provider = %self.name, address = %self.address, events = self.events.len(), "service offered");
        Ok(())
    }

    pub async fn withdraw(&self) -> Result<()> {
        self.transport.stop_offer_service(self.address).await?;
        tracing::info!(provider = %self.name, address = %self.address, "service withdrawn");
        Ok(())
    }

    /// Dispatches one request and sends its response.
    ///
    /// Returns the response that was sent.
    pub async fn on_request_received(&self, request: Message) -> Result<Message> {
        if request.kind != MessageKind::Request {
            return Err(Error::NotARequest(request.kind));
        }

        let empty = Payload::default();
        let payload = match &request.payload {
            Some(payload) => {
                tracing::info!(
                    provider = %self.name,
                    method = %request.method,
                    client = %request.client,
                    payload = %payload.to_text_lossy(),
                    "request received"
                );
                payload
            }
            None => {
                tracing::info!(provider = %self.name, method = %request.method, client = %request.client, "request carries no payload");
                &empty
            }
        };

        let dispatched = self.methods.dispatch(request.method, payload);
        match dispatched.outcome {
            Outcome::Handled => {}
            Outcome::UnknownMethod => {
                tracing::warn!(provider = %self.name, method = %request.method, "unknown method");
            }
            Outcome::Failed => {
                tracing::warn!(provider = %self.name, method = %request.method, payload = %dispatched.payload.to_text_lossy(), "handler failed");
            }
        }

        let response = request.response(dispatched.return_code(), dispatched.payload);
        self.transport.send(response.clone()).await?;
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(provider = %self.name, method = %response.method, token = %response.token, "response sent");
        Ok(response)
    }

    /// Serves requests until `cancel` fires or the transport closes, then
    /// withdraws the offer.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                inbound = self.transport.recv() => inbound,
            };

            match inbound {
                Ok(Some(Inbound::Message(message))) if message.kind == MessageKind::Request => {
                    if let Err(e) = self.on_request_received(message).await {
                        tracing::warn!(provider = %self.name, error = %e, "could not answer request");
                    }
                }
                Ok(Some(Inbound::Message(message))) => {
                    tracing::debug!(provider = %self.name, kind = ?message.kind, "ignoring non-request message");
                }
                Ok(Some(Inbound::Availability { address, available })) => {
                    tracing::debug!(provider = %self.name, %address, available, "ignoring availability signal");
                }
                Ok(None) => {
                    tracing::info!(provider = %self.name, "transport closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(provider = %self.name, error = %e, "transport failed");
                    break;
                }
            }
        }

        if let Err(e) = self.withdraw().await {
            tracing::warn!(provider = %self.name, error = %e, "could not withdraw offer");
        }
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move { provider.run(cancel).await })
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("methods", &self.methods)
            .field("events", &self.events)
            .field("responses_sent", &self.responses_sent())
            .finish()
    }
}
