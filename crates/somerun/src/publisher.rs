//! # Event Publisher
//!
//! A background task that samples telemetry on a fixed interval and notifies
//! each metric's event.
//!
//! ## Invariants
//!
//! - Metrics are emitted in configuration order within a tick, and ticks are
//!   strictly sequential.
//! - A failed sample or notify affects only that metric on that tick.
//! - The task ends only when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use somepack::Payload;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::ServiceAddress;

use crate::config;
use crate::config::Config;
use crate::telemetry::Metric;
use crate::telemetry::TelemetrySampler;
use crate::telemetry::TelemetrySource;
use crate::transport::Transport;

/// A metric bound to the event that carries it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublishedMetric {
    pub metric: Metric,
    pub event: EventId,
    pub group: EventGroupId,
}

/// Counters returned when the publisher stops.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PublisherReport {
    pub ticks: u64,
    pub sent: u64,
    pub failed: u64,
}

pub struct Publisher {
    address: ServiceAddress,
    transport: Arc<dyn Transport>,
    sampler: TelemetrySampler,
    metrics: Vec<PublishedMetric>,
    interval: Duration,
    initial_delay: Duration,
    report: PublisherReport,
}

impl Publisher {
    /// Fails if `interval` is zero.
    pub fn new(
        address: ServiceAddress,
        transport: Arc<dyn Transport>,
        source: Arc<dyn TelemetrySource>,
        metrics: Vec<PublishedMetric>,
        interval: Duration,
    ) -> config::Result<Self> {
        if interval.is_zero() {
            return Err(config::Error::Invalid("publisher interval must be positive".to_string()));
        }
        Ok(Self {
            address,
            transport,
            sampler: TelemetrySampler::new(source),
            metrics,
            interval,
            initial_delay: Duration::ZERO,
            report: PublisherReport::default(),
        })
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        source: Arc<dyn TelemetrySource>,
    ) -> config::Result<Self> {
        config.validate()?;
        let metrics = config
            .publisher
            .events
            .iter()
            .map(|event| PublishedMetric {
                metric: event.metric,
                event: event.event(),
                group: event.group(),
            })
            .collect();

        let publisher = Self::new(config.service.address(), transport, source, metrics, config.publisher.interval())?;
        Ok(publisher.with_initial_delay(config.publisher.initial_delay()))
    }

    /// Waits this long before the first tick.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn metrics(&self) -> &[PublishedMetric] {
        &self.metrics
    }

    pub fn report(&self) -> PublisherReport {
        self.report
    }

    /// Samples and notifies every metric once. Returns how many were sent.
    pub async fn tick(&mut self) -> usize {
        self.report.ticks += 1;
        let mut sent = 0;

        for published in &self.metrics {
            let text = self.sampler.sample(published.metric);
            tracing::debug!(metric = %published.metric, event = %published.event, %text, "publishing");

            match self.transport.notify(self.address, published.event, Payload::from(text)).await {
                Ok(()) => {
                    self.report.sent += 1;
                    sent += 1;
                }
                Err(e) => {
                    self.report.failed += 1;
                    tracing::warn!(metric = %published.metric, event = %published.event, error = %e, "notify failed");
                }
            }
        }
        sent
    }

    /// Ticks until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> PublisherReport {
        tracing::info!(address = %self.address, interval = ?self.interval, metrics = self.metrics.len(), "publisher started");

        if !self.initial_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return self.report,
                _ = tokio::time::sleep(self.initial_delay) => {}
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!(address = %self.address, report = ?self.report, "publisher stopped");
        self.report
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PublisherReport> {
        tokio::spawn(self.run(cancel))
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("address", &self.address)
            .field("metrics", &self.metrics)
            .field("interval", &self.interval)
            .field("initial_delay", &self.initial_delay)
            .field("report", &self.report)
            .finish()
    }
}
