//! # Transport Abstraction
//!
//! The interface the runtime needs from whatever bus performs discovery,
//! framing and delivery.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The transport moves whole `Message`s and knows
//!   nothing about handlers, sampling or correlation.
//! - **Serialized Inbound**: Availability signals and messages arrive through
//!   one `recv` stream, so each endpoint sees them in delivery order.
//! - **Setup Is Explicit**: Offering, requesting and subscribing are separate
//!   calls, made once per lifecycle phase.

use somepack::Payload;
use somerpc::ClientId;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::Message;
use somerpc::ServiceAddress;

/// Errors that occur at the bus layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer endpoint is gone or the bus was dropped.
    ConnectionLost(String),
    /// No endpoint currently offers this service.
    ServiceNotOffered(ServiceAddress),
    /// Another endpoint already offers this service.
    AlreadyOffered(ServiceAddress),
    /// The event was never offered on this service.
    EventNotOffered { address: ServiceAddress, event: EventId },
    /// The event is already a member of a different group.
    EventGroupConflict { event: EventId, existing: EventGroupId, requested: EventGroupId },
    /// A response names a client the bus does not know.
    UnknownClient(ClientId),
    /// Generic I/O or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::ServiceNotOffered(address) => write!(f, "Service {} is not offered", address),
            Self::AlreadyOffered(address) => write!(f, "Service {} is already offered", address),
            Self::EventNotOffered { address, event } => {
                write!(f, "{} is not offered on service {}", event, address)
            }
            Self::EventGroupConflict { event, existing, requested } => write!(
                f,
                "{} already belongs to {}, cannot join {}",
                event, existing, requested
            ),
            Self::UnknownClient(client) => write!(f, "Unknown {}", client),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Something the bus delivers to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Discovery saw a service appear or disappear.
    Availability { address: ServiceAddress, available: bool },
    /// A request, response or notification addressed to this endpoint.
    Message(Message),
}

/// An endpoint on a service bus.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a request or response.
    ///
    /// The bus stamps this endpoint's client id on requests and routes
    /// responses back to the client id they carry.
    async fn send(&self, message: Message) -> Result<()>;

    /// Publishes `payload` for `event` to every subscriber of its group.
    async fn notify(&self, address: ServiceAddress, event: EventId, payload: Payload) -> Result<()>;

    async fn offer_service(&self, address: ServiceAddress) -> Result<()>;

    async fn stop_offer_service(&self, address: ServiceAddress) -> Result<()>;

    /// Declares `event` as a member of `group` on an offered service.
    async fn offer_event(&self, address: ServiceAddress, event: EventId, group: EventGroupId) -> Result<()>;

    /// Asks discovery to report availability of `address` to this endpoint.
    async fn request_service(&self, address: ServiceAddress) -> Result<()>;

    async fn release_service(&self, address: ServiceAddress) -> Result<()>;

    async fn subscribe(&self, address: ServiceAddress, group: EventGroupId) -> Result<()>;

    async fn unsubscribe(&self, address: ServiceAddress, group: EventGroupId) -> Result<()>;

    /// Waits for the next inbound signal.
    ///
    /// # invariants
    /// - Returns `Ok(None)` once the bus side is closed.
    /// - Must be cancel-safe: dropping the future loses nothing.
    async fn recv(&self) -> Result<Option<Inbound>>;
}
