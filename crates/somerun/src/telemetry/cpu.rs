//! CPU usage from successive `/proc/stat` counter samples.
//!
//! Usage is `100 * (Δtotal - Δidle) / Δtotal`, where idle includes iowait and
//! total sums all eight fields. Counters that go backwards (a reset, or a
//! hotplugged CPU) count as zero progress.

use std::time::Instant;

use super::Error;
use super::Result;
use super::TelemetrySource;

/// user, nice, system, idle, iowait, irq, softirq, steal.
pub const CPU_FIELDS: usize = 8;

pub type CpuCounters = [u64; CPU_FIELDS];

const IDLE: usize = 3;
const IOWAIT: usize = 4;

/// Parses the first eight counters of a `cpu` line.
pub fn parse_cpu_line(line: &str) -> Result<CpuCounters> {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some(label) if label.starts_with("cpu") => {}
        _ => return Err(Error::Parse(format!("not a cpu line: {:?}", line))),
    }

    let mut counters = [0; CPU_FIELDS];
    for (i, slot) in counters.iter_mut().enumerate() {
        let field = fields
            .next()
            .ok_or_else(|| Error::Parse(format!("cpu line has {} fields, need {}", i, CPU_FIELDS)))?;
        *slot = field
            .parse()
            .map_err(|_| Error::Parse(format!("bad cpu counter {:?}", field)))?;
    }
    Ok(counters)
}

/// One reading of the counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CounterSample {
    pub values: CpuCounters,
    pub taken_at: Instant,
}

impl CounterSample {
    pub fn new(values: CpuCounters) -> Self {
        Self {
            values,
            taken_at: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.values.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn idle(&self) -> u64 {
        self.values[IDLE].saturating_add(self.values[IOWAIT])
    }
}

/// Usage percentage between two samples. `0.0` when no time passed.
pub fn cpu_usage(prev: &CounterSample, curr: &CounterSample) -> f64 {
    let total = curr.total().saturating_sub(prev.total());
    if total == 0 {
        return 0.0;
    }
    let idle = curr.idle().saturating_sub(prev.idle()).min(total);
    100.0 * (total - idle) as f64 / total as f64
}

/// The CPU history of one producer.
#[derive(Debug, Default)]
pub struct CpuSampler {
    previous: Option<CounterSample>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the previous sample and keeps `values` in its place.
    ///
    /// Returns `0.0` for the first observation.
    pub fn observe(&mut self, values: CpuCounters) -> f64 {
        let current = CounterSample::new(values);
        let usage = match &self.previous {
            Some(previous) => cpu_usage(previous, &current),
            None => 0.0,
        };
        self.previous = Some(current);
        usage
    }

    /// Reads and observes. A failed read yields `0.0` and keeps the old sample.
    pub fn sample(&mut self, source: &dyn TelemetrySource) -> f64 {
        match source.read_cpu() {
            Ok(values) => self.observe(values),
            Err(e) => {
                tracing::warn!(error = %e, "cpu sample degraded");
                0.0
            }
        }
    }

    pub fn previous(&self) -> Option<&CounterSample> {
        self.previous.as_ref()
    }
}
