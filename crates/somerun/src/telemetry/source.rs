//! Where raw counters come from.

use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use super::CpuCounters;
use super::Error;
use super::Result;
use super::parse_cpu_line;

/// Synchronous, fallible access to CPU counters and meminfo text.
pub trait TelemetrySource: Send + Sync + 'static {
    /// The aggregate `cpu` counters.
    fn read_cpu(&self) -> Result<CpuCounters>;

    /// The raw meminfo text.
    fn read_meminfo(&self) -> Result<String>;

    /// Names the meminfo source in sentinel strings.
    fn meminfo_name(&self) -> String;
}

/// Reads `stat` and `meminfo` under a procfs mount.
///
/// Containers often mount the host's procfs somewhere other than `/proc`.
#[derive(Clone, Debug)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl TelemetrySource for ProcFs {
    fn read_cpu(&self) -> Result<CpuCounters> {
        let stat = self.read("stat")?;
        let line = stat
            .lines()
            .find(|line| line.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| Error::Parse("no aggregate cpu line in stat".to_string()))?;
        parse_cpu_line(line)
    }

    fn read_meminfo(&self) -> Result<String> {
        self.read("meminfo")
    }

    fn meminfo_name(&self) -> String {
        self.root.join("meminfo").display().to_string()
    }
}

/// Replays queued readings. Used by tests and demos.
///
/// The last queued CPU reading repeats once the queue is down to one entry.
/// `None` entries read as I/O failures.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    cpu: Mutex<VecDeque<Option<CpuCounters>>>,
    meminfo: Mutex<Option<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_cpu(&self, counters: CpuCounters) {
        self.cpu.lock().unwrap_or_else(|e| e.into_inner()).push_back(Some(counters));
    }

    pub fn push_cpu_failure(&self) {
        self.cpu.lock().unwrap_or_else(|e| e.into_inner()).push_back(None);
    }

    /// Sets the meminfo text. `None` makes reads fail.
    pub fn set_meminfo(&self, text: Option<&str>) {
        *self.meminfo.lock().unwrap_or_else(|e| e.into_inner()) = text.map(str::to_string);
    }

    fn unreadable(name: &str) -> Error {
        Error::Io {
            path: format!("scripted/{}", name),
            message: "no reading queued".to_string(),
        }
    }
}

impl TelemetrySource for ScriptedSource {
    fn read_cpu(&self) -> Result<CpuCounters> {
        let mut queue = self.cpu.lock().unwrap_or_else(|e| e.into_inner());
        let next = if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().copied().flatten()
        };
        next.ok_or_else(|| Self::unreadable("stat"))
    }

    fn read_meminfo(&self) -> Result<String> {
        self.meminfo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Self::unreadable("meminfo"))
    }

    fn meminfo_name(&self) -> String {
        "scripted/meminfo".to_string()
    }
}
