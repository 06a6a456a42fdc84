//! # Identifiers
//!
//! Strong types for every number that travels in a message header.
//! Service, instance, method and event ids are 16 bits wide; event groups are 8.

/// Identifies a logical service, independent of where it runs.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceId(pub u16);

/// Distinguishes several instances of one service.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceId(pub u16);

/// A remotely invocable operation, scoped to a service.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodId(pub u16);

/// A one-way notification published by a service.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventId(pub u16);

/// The unit of subscription. Each event belongs to exactly one group.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventGroupId(pub u8);

/// Identifies the endpoint that sent a request, so the response can find it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientId(pub u16);

/// Matches a response to the request that caused it.
///
/// Issued from a process-wide increasing counter and never reused. Zero
/// means "no token" and is carried by notifications.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CorrelationToken(pub u64);

impl CorrelationToken {
    pub const NONE: Self = Self(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// The endpoint a message is addressed to: a `(service, instance)` pair.
///
/// Created from configuration and never mutated.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceAddress {
    pub service: ServiceId,
    pub instance: InstanceId,
}

impl ServiceAddress {
    pub const fn new(service: u16, instance: u16) -> Self {
        Self {
            service: ServiceId(service),
            instance: InstanceId(instance),
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "method-{:#06x}", self.0)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event-{:#06x}", self.0)
    }
}

impl std::fmt::Display for EventGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group-{:#04x}", self.0)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token-{}", self.0)
    }
}

impl std::fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.service, self.instance)
    }
}
