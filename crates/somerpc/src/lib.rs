//! # Somerpc
//!
//! The protocol model shared by service providers and consumers.
//!
//! ## Architecture
//!
//! - **Identifiers**: strong types for service, instance, method, event,
//!   event group, client and correlation token.
//! - **Message**: one envelope for requests, responses and notifications.
//! - **Dispatch**: an explicit `method id -> handler` table that always answers.
//!
//! Framing, discovery and delivery belong to the transport, not here.

pub mod dispatch;
pub mod error;
pub mod ids;
pub mod message;

pub use dispatch::Dispatched;
pub use dispatch::HandlerError;
pub use dispatch::MethodHandler;
pub use dispatch::MethodTable;
pub use dispatch::Outcome;
pub use error::Error;
pub use error::Result;
pub use ids::ClientId;
pub use ids::CorrelationToken;
pub use ids::EventGroupId;
pub use ids::EventId;
pub use ids::InstanceId;
pub use ids::MethodId;
pub use ids::ServiceAddress;
pub use ids::ServiceId;
pub use message::Message;
pub use message::MessageKind;
pub use message::ReturnCode;
