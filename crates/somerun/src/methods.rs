//! The methods and events a telemetry service offers.

use std::sync::Arc;
use std::sync::Mutex;

use somepack::Payload;
use somepack::text;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::HandlerError;
use somerpc::MethodId;
use somerpc::MethodTable;

use crate::telemetry::CpuSampler;
use crate::telemetry::TelemetrySource;
use crate::telemetry::mem_usage_text;

pub const METHOD_HELLO: MethodId = MethodId(0x42);
pub const METHOD_CPU: MethodId = MethodId(0x44);
pub const METHOD_MEMORY: MethodId = MethodId(0x45);

pub const EVENT_CPU: EventId = EventId(0x43);
pub const EVENT_MEMORY: EventId = EventId(0x44);

pub const GROUP_CPU: EventGroupId = EventGroupId(1);
pub const GROUP_MEMORY: EventGroupId = EventGroupId(2);

pub const HELLO_REPLY: &str = "Hello from server!";

/// Hello, CPU and memory methods over `source`.
///
/// The CPU handler owns its own sampler, separate from any publisher, so
/// request traffic never disturbs the published deltas.
pub fn standard(source: Arc<dyn TelemetrySource>) -> somerpc::Result<MethodTable> {
    let mut table = MethodTable::new();

    table.register(METHOD_HELLO, |_: &Payload| Ok(Payload::from(HELLO_REPLY)))?;

    let cpu_source = source.clone();
    let sampler = Mutex::new(CpuSampler::new());
    table.register(METHOD_CPU, move |_: &Payload| {
        let mut sampler = sampler
            .lock()
            .map_err(|_| HandlerError::from("cpu sampler poisoned"))?;
        Ok(text::cpu_payload(sampler.sample(cpu_source.as_ref())))
    })?;

    table.register(METHOD_MEMORY, move |_: &Payload| {
        Ok(Payload::from(mem_usage_text(source.as_ref())))
    })?;

    Ok(table)
}
