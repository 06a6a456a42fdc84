//! # Message Envelope
//!
//! The header and payload of everything that crosses the bus.
//!
//! ## Invariants
//! - A response copies address, method, client and token from its request.
//! - Notifications carry no client and no token.
//! - The payload is optional: a request without one is valid.

use somepack::Payload;

use crate::ids::ClientId;
use crate::ids::CorrelationToken;
use crate::ids::EventId;
use crate::ids::MethodId;
use crate::ids::ServiceAddress;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

/// Outcome reported by the provider alongside a response payload.
///
/// A response is always sent; the code only tells the caller how the
/// payload was produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Ok,
    /// No handler is bound to the method; payload is the canonical text.
    UnknownMethod,
    /// The handler failed; payload describes the failure.
    NotOk,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub address: ServiceAddress,
    /// Method id for requests and responses, event id for notifications.
    pub method: MethodId,
    pub client: ClientId,
    pub token: CorrelationToken,
    pub return_code: ReturnCode,
    pub payload: Option<Payload>,
}

impl Message {
    /// A request with no client or token yet; the sender stamps those.
    pub fn request(address: ServiceAddress, method: MethodId, payload: Option<Payload>) -> Self {
        Self {
            kind: MessageKind::Request,
            address,
            method,
            client: ClientId(0),
            token: CorrelationToken::NONE,
            return_code: ReturnCode::Ok,
            payload,
        }
    }

    /// Builds the response to this request, carrying `payload` verbatim.
    pub fn response(&self, return_code: ReturnCode, payload: Payload) -> Self {
        Self {
            kind: MessageKind::Response,
            address: self.address,
            method: self.method,
            client: self.client,
            token: self.token,
            return_code,
            payload: Some(payload),
        }
    }

    pub fn notification(address: ServiceAddress, event: EventId, payload: Payload) -> Self {
        Self {
            kind: MessageKind::Notification,
            address,
            method: MethodId(event.0),
            client: ClientId(0),
            token: CorrelationToken::NONE,
            return_code: ReturnCode::Ok,
            payload: Some(payload),
        }
    }

    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = client;
        self
    }

    pub fn with_token(mut self, token: CorrelationToken) -> Self {
        self.token = token;
        self
    }

    /// The event id of a notification. Shares the method id header field.
    pub fn event(&self) -> EventId {
        EventId(self.method.0)
    }

    /// The payload, or an empty one if none was attached.
    pub fn payload_or_empty(&self) -> Payload {
        self.payload.clone().unwrap_or_default()
    }
}
