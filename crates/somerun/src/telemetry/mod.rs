//! # Telemetry
//!
//! Reads CPU and memory counters from a `TelemetrySource` and turns them into
//! the text published as events and returned by telemetry methods.
//!
//! ## Philosophy
//!
//! - **Owned State**: the previous CPU sample lives in a `CpuSampler` owned by
//!   exactly one producer. Two producers means two samplers.
//! - **Degrade, Don't Fail**: a failed read costs one sample. CPU falls back to
//!   `0.0`, memory to an explicit `Error: ...` sentinel.
//! - **Synchronous Reads**: sources are plain blocking reads of small files.

pub mod cpu;
pub mod memory;
pub mod source;

use std::sync::Arc;

use serde::Deserialize;

use somepack::Payload;
use somepack::text;

pub use cpu::CPU_FIELDS;
pub use cpu::CounterSample;
pub use cpu::CpuCounters;
pub use cpu::CpuSampler;
pub use cpu::cpu_usage;
pub use cpu::parse_cpu_line;
pub use memory::MemUsage;
pub use memory::mem_usage_text;
pub use memory::parse_meminfo;
pub use source::ProcFs;
pub use source::ScriptedSource;
pub use source::TelemetrySource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The source file could not be read.
    Io { path: String, message: String },
    /// The content did not have the expected shape.
    Parse(String),
    /// A required key was absent from a key/value source.
    MissingKey(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Could not read {}: {}", path, message),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
            Self::MissingKey(key) => write!(f, "Missing key: {}", key),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A published telemetry quantity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// A telemetry event decoded on the receiving side.
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    Cpu(f64),
    Memory { used_kb: u64, total_kb: u64 },
    /// A sentinel, or text that does not parse as the expected metric.
    Unreadable(String),
}

impl Reading {
    /// Decodes the payload of `metric`'s event.
    pub fn decode(metric: Metric, payload: &Payload) -> Self {
        let text = payload.to_text_lossy();
        let parsed = match metric {
            Metric::Cpu => text::parse_cpu_usage(&text).map(Self::Cpu),
            Metric::Memory => {
                text::parse_mem_usage(&text).map(|(used_kb, total_kb)| Self::Memory { used_kb, total_kb })
            }
        };
        parsed.unwrap_or_else(|| Self::Unreadable(text.into_owned()))
    }
}

/// A source plus the CPU history of one producer.
pub struct TelemetrySampler {
    source: Arc<dyn TelemetrySource>,
    cpu: CpuSampler,
}

impl TelemetrySampler {
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self {
            source,
            cpu: CpuSampler::new(),
        }
    }

    /// Samples `metric` and formats it as event text.
    pub fn sample(&mut self, metric: Metric) -> String {
        match metric {
            Metric::Cpu => text::cpu_usage(self.cpu.sample(self.source.as_ref())),
            Metric::Memory => text::memory_event(&mem_usage_text(self.source.as_ref())),
        }
    }

    pub fn source(&self) -> &Arc<dyn TelemetrySource> {
        &self.source
    }
}

impl std::fmt::Debug for TelemetrySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySampler")
            .field("source", &self.source.meminfo_name())
            .field("cpu", &self.cpu)
            .finish()
    }
}
