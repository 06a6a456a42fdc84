//! # Somerun
//!
//! The runtime around the protocol model: a provider that answers requests
//! and publishes telemetry events, and consumers that track availability,
//! subscribe and correlate responses.
//!
//! ## Architecture
//!
//! - **Transport**: the bus behind an object-safe trait; `LocalBus` runs it in-process.
//! - **Availability**: edge-triggered actions per remote service.
//! - **Correlator**: requests in flight, matched by token or by method.
//! - **Telemetry**: CPU and memory sampling with owned per-producer state.
//! - **Publisher**: a cancellable interval task emitting telemetry events.

pub mod availability;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod correlator;
pub mod logging;
pub mod methods;
pub mod provider;
pub mod publisher;
pub mod telemetry;
pub mod transport;

pub use availability::AvailabilityAction;
pub use availability::AvailabilityMonitor;
pub use availability::AvailabilityState;
pub use availability::Transition;
pub use bus::LocalBus;
pub use bus::LocalEndpoint;
pub use config::Config;
pub use consumer::Consumer;
pub use consumer::EventHandler;
pub use consumer::PendingCall;
pub use consumer::SubscriptionState;
pub use correlator::CorrelationMode;
pub use correlator::Correlator;
pub use provider::EventOffer;
pub use provider::Provider;
pub use publisher::PublishedMetric;
pub use publisher::Publisher;
pub use publisher::PublisherReport;
pub use telemetry::Metric;
pub use telemetry::Reading;
pub use telemetry::TelemetrySampler;
pub use telemetry::TelemetrySource;
pub use transport::Inbound;
pub use transport::Transport;

#[cfg(test)]
mod tests;
