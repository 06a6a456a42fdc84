//! # Telemetry text
//!
//! The human-readable strings published as event payloads and returned by
//! telemetry methods. Formatting lives here so both sides of the wire agree.

use crate::Payload;

/// Response payload for a method nobody registered.
pub const UNKNOWN_METHOD: &str = "Unknown method";

/// Prefix shared by every degraded or failed value.
pub const ERROR_PREFIX: &str = "Error: ";

const CPU_PREFIX: &str = "CPU Usage: ";
const MEMORY_PREFIX: &str = "Memory Usage: ";

/// `CPU Usage: 12.500000%`
pub fn cpu_usage(percent: f64) -> String {
    format!("{}{:.6}%", CPU_PREFIX, percent)
}

/// `Mem Used: 4000000 kB / Total: 16000000 kB`
pub fn mem_usage(used_kb: u64, total_kb: u64) -> String {
    format!("Mem Used: {} kB / Total: {} kB", used_kb, total_kb)
}

/// Wraps a memory reading (or its sentinel) for publication as an event.
pub fn memory_event(reading: &str) -> String {
    format!("{}{}", MEMORY_PREFIX, reading)
}

/// Sentinel for a telemetry source that could not be read.
pub fn unreadable(source: &str) -> String {
    format!("{}Could not read {}", ERROR_PREFIX, source)
}

/// Error text for a handler that failed internally.
pub fn failure(message: &str) -> String {
    format!("{}{}", ERROR_PREFIX, message)
}

/// True if the text is a sentinel rather than a measurement.
pub fn is_error(text: &str) -> bool {
    text.strip_prefix(MEMORY_PREFIX).unwrap_or(text).starts_with(ERROR_PREFIX)
}

/// Recovers the percentage from a `cpu_usage` string.
pub fn parse_cpu_usage(text: &str) -> Option<f64> {
    text.strip_prefix(CPU_PREFIX)?
        .strip_suffix('%')?
        .parse()
        .ok()
}

/// Recovers `(used_kb, total_kb)` from a `mem_usage` or `memory_event` string.
pub fn parse_mem_usage(text: &str) -> Option<(u64, u64)> {
    let text = text.strip_prefix(MEMORY_PREFIX).unwrap_or(text);
    let rest = text.strip_prefix("Mem Used: ")?;
    let (used, rest) = rest.split_once(" kB / Total: ")?;
    let total = rest.strip_suffix(" kB")?;
    Some((used.parse().ok()?, total.parse().ok()?))
}

/// Encodes a CPU reading straight into a payload.
pub fn cpu_payload(percent: f64) -> Payload {
    Payload::from(cpu_usage(percent))
}
