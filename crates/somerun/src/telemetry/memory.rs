//! Memory usage from meminfo text.

use somepack::text;

use super::Error;
use super::Result;
use super::TelemetrySource;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemUsage {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemUsage {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    /// `Mem Used: <used> kB / Total: <total> kB`
    pub fn to_text(&self) -> String {
        text::mem_usage(self.used_kb(), self.total_kb)
    }
}

/// Extracts `MemTotal` and `MemAvailable` from `Key: value kB` lines.
pub fn parse_meminfo(meminfo: &str) -> Result<MemUsage> {
    let mut total = None;
    let mut available = None;

    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        let slot = match fields.next() {
            Some("MemTotal:") => &mut total,
            Some("MemAvailable:") => &mut available,
            _ => continue,
        };
        let value = fields
            .next()
            .ok_or_else(|| Error::Parse(format!("no value in {:?}", line)))?;
        *slot = Some(
            value
                .parse::<u64>()
                .map_err(|_| Error::Parse(format!("bad value in {:?}", line)))?,
        );
    }

    Ok(MemUsage {
        total_kb: total.ok_or(Error::MissingKey("MemTotal"))?,
        available_kb: available.ok_or(Error::MissingKey("MemAvailable"))?,
    })
}

/// Reads and formats memory usage, or the unreadable sentinel for this source.
pub fn mem_usage_text(source: &dyn TelemetrySource) -> String {
    match source.read_meminfo().and_then(|meminfo| parse_meminfo(&meminfo)) {
        Ok(usage) => usage.to_text(),
        Err(e) => {
            tracing::warn!(error = %e, source = %source.meminfo_name(), "memory sample degraded");
            text::unreadable(&source.meminfo_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ScriptedSource;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:   12000000 kB\n\
                           Buffers:          100000 kB\n";

    #[test]
    fn test_used_is_total_minus_available() {
        let usage = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(usage.total_kb, 16000000);
        assert_eq!(usage.used_kb(), 4000000);

        let text = usage.to_text();
        assert!(text.contains("4000000"));
        assert!(text.contains("16000000"));
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(
            parse_meminfo("MemTotal: 10 kB\n"),
            Err(Error::MissingKey("MemAvailable"))
        );
        assert_eq!(parse_meminfo(""), Err(Error::MissingKey("MemTotal")));
    }

    #[test]
    fn test_bad_value() {
        assert!(matches!(
            parse_meminfo("MemTotal: lots kB\nMemAvailable: 1 kB\n"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_sentinel_is_distinct_from_zero() {
        let source = ScriptedSource::new();
        assert_eq!(mem_usage_text(&source), "Error: Could not read scripted/meminfo");

        source.set_meminfo(Some("MemTotal: 0 kB\nMemAvailable: 0 kB\n"));
        assert_eq!(mem_usage_text(&source), "Mem Used: 0 kB / Total: 0 kB");
    }

    #[test]
    fn test_missing_key_reads_as_unreadable() {
        let source = ScriptedSource::new();
        source.set_meminfo(Some("MemFree: 10 kB\n"));
        assert!(text::is_error(&mem_usage_text(&source)));
    }
}
