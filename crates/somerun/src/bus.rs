//! # In-Process Bus
//!
//! A complete `Transport` for endpoints living in one process, built on
//! tokio mpsc channels. Used by the test suite and the `somed` demo.
//!
//! ## Routing
//!
//! - Offering a service signals `available` to every endpoint that requested it,
//!   and to every later requester. Withdrawing signals `unavailable` and drops
//!   the service's subscriptions.
//! - Requests go to the offering endpoint, stamped with the sender's client id.
//!   Responses go back to the client id they carry.
//! - Notifications reach only subscribers of the event's group.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use somepack::Payload;
use somerpc::ClientId;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::Message;
use somerpc::MessageKind;
use somerpc::ServiceAddress;

use crate::transport::Error;
use crate::transport::Inbound;
use crate::transport::Result;
use crate::transport::Transport;

/// A bus connecting any number of local endpoints.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    endpoints: DashMap<ClientId, mpsc::UnboundedSender<Inbound>>,
    providers: DashMap<ServiceAddress, ClientId>,
    requesters: DashMap<ServiceAddress, BTreeSet<ClientId>>,
    events: DashMap<(ServiceAddress, EventId), EventGroupId>,
    subscribers: DashMap<(ServiceAddress, EventGroupId), BTreeSet<ClientId>>,
    next_client: AtomicU16,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint with a fresh client id.
    ///
    /// Ids start at 1 and are never reused; once `u16::MAX` has been handed
    /// out, further endpoints are refused.
    pub fn endpoint(&self, name: impl Into<String>) -> Result<LocalEndpoint> {
        let last = self
            .inner
            .next_client
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| last.checked_add(1))
            .map_err(|_| Error::Io("client ids exhausted".to_string()))?;
        let client = ClientId(last + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.endpoints.insert(client, tx);

        Ok(LocalEndpoint {
            name: name.into(),
            client,
            bus: self.inner.clone(),
            rx: Mutex::new(rx),
        })
    }

    /// The endpoint currently offering `address`, if any.
    pub fn provider_of(&self, address: ServiceAddress) -> Option<ClientId> {
        self.inner.providers.get(&address).map(|entry| *entry.value())
    }

    /// Number of endpoints subscribed to `group` on `address`.
    pub fn subscriber_count(&self, address: ServiceAddress, group: EventGroupId) -> usize {
        self.inner
            .subscribers
            .get(&(address, group))
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }
}

impl BusInner {
    /// Queues `inbound` for `client`. Returns false if the endpoint is gone.
    fn deliver(&self, client: ClientId, inbound: Inbound) -> bool {
        let Some(tx) = self.endpoints.get(&client).map(|entry| entry.value().clone()) else {
            return false;
        };
        tx.send(inbound).is_ok()
    }

    fn requesters_of(&self, address: ServiceAddress) -> Vec<ClientId> {
        self.requesters
            .get(&address)
            .map(|entry| entry.value().iter().copied().collect())
            .unwrap_or_default()
    }

    fn signal(&self, address: ServiceAddress, available: bool) {
        for client in self.requesters_of(address) {
            self.deliver(client, Inbound::Availability { address, available });
        }
    }

    /// Removes an offer and everything that hung off it.
    fn withdraw(&self, address: ServiceAddress) {
        self.providers.remove(&address);
        self.events.retain(|(addr, _), _| *addr != address);
        self.subscribers.retain(|(addr, _), _| *addr != address);
        self.signal(address, false);
    }

    fn detach(&self, client: ClientId) {
        self.endpoints.remove(&client);

        let offered: Vec<ServiceAddress> = self
            .providers
            .iter()
            .filter(|entry| *entry.value() == client)
            .map(|entry| *entry.key())
            .collect();
        for address in offered {
            self.withdraw(address);
        }

        for mut entry in self.requesters.iter_mut() {
            entry.value_mut().remove(&client);
        }
        for mut entry in self.subscribers.iter_mut() {
            entry.value_mut().remove(&client);
        }
    }
}

/// One endpoint on a `LocalBus`.
///
/// Dropping the endpoint withdraws its offers, which the bus reports to
/// requesters as the service becoming unavailable.
pub struct LocalEndpoint {
    name: String,
    client: ClientId,
    bus: Arc<BusInner>,
    rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl LocalEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_id(&self) -> ClientId {
        self.client
    }

    fn owns(&self, address: ServiceAddress) -> bool {
        self.bus
            .providers
            .get(&address)
            .is_some_and(|entry| *entry.value() == self.client)
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.bus.detach(self.client);
    }
}

#[async_trait::async_trait]
impl Transport for LocalEndpoint {
    async fn send(&self, message: Message) -> Result<()> {
        match message.kind {
            MessageKind::Request => {
                let provider = self
                    .bus
                    .providers
                    .get(&message.address)
                    .map(|entry| *entry.value())
                    .ok_or(Error::ServiceNotOffered(message.address))?;

                let request = message.with_client(self.client);
                if self.bus.deliver(provider, Inbound::Message(request)) {
                    Ok(())
                } else {
                    Err(Error::ConnectionLost(format!("provider {} is gone", provider)))
                }
            }
            MessageKind::Response => {
                let client = message.client;
                if self.bus.deliver(client, Inbound::Message(message)) {
                    Ok(())
                } else {
                    Err(Error::UnknownClient(client))
                }
            }
            MessageKind::Notification => {
                let payload = message.payload_or_empty();
                self.notify(message.address, message.event(), payload).await
            }
        }
    }

    async fn notify(&self, address: ServiceAddress, event: EventId, payload: Payload) -> Result<()> {
        if !self.owns(address) {
            return Err(Error::ServiceNotOffered(address));
        }
        let group = self
            .bus
            .events
            .get(&(address, event))
            .map(|entry| *entry.value())
            .ok_or(Error::EventNotOffered { address, event })?;

        let subscribers: Vec<ClientId> = self
            .bus
            .subscribers
            .get(&(address, group))
            .map(|entry| entry.value().iter().copied().collect())
            .unwrap_or_default();

        for client in subscribers {
            let note = Message::notification(address, event, payload.clone());
            self.bus.deliver(client, Inbound::Message(note));
        }
        Ok(())
    }

    async fn offer_service(&self, address: ServiceAddress) -> Result<()> {
        let newly_offered = match self.bus.providers.entry(address) {
            Entry::Occupied(entry) if *entry.get() == self.client => false,
            Entry::Occupied(_) => return Err(Error::AlreadyOffered(address)),
            Entry::Vacant(entry) => {
                entry.insert(self.client);
                true
            }
        };
        if newly_offered {
            self.bus.signal(address, true);
        }
        Ok(())
    }

    async fn stop_offer_service(&self, address: ServiceAddress) -> Result<()> {
        if !self.owns(address) {
            return Err(Error::ServiceNotOffered(address));
        }
        self.bus.withdraw(address);
        Ok(())
    }

    async fn offer_event(&self, address: ServiceAddress, event: EventId, group: EventGroupId) -> Result<()> {
        if let Some(existing) = self.bus.events.get(&(address, event)).map(|entry| *entry.value()) {
            if existing != group {
                return Err(Error::EventGroupConflict { event, existing, requested: group });
            }
        }
        self.bus.events.insert((address, event), group);
        Ok(())
    }

    async fn request_service(&self, address: ServiceAddress) -> Result<()> {
        self.bus.requesters.entry(address).or_default().insert(self.client);
        if self.bus.providers.contains_key(&address) {
            self.bus.deliver(self.client, Inbound::Availability { address, available: true });
        }
        Ok(())
    }

    async fn release_service(&self, address: ServiceAddress) -> Result<()> {
        if let Some(mut entry) = self.bus.requesters.get_mut(&address) {
            entry.value_mut().remove(&self.client);
        }
        for mut entry in self.bus.subscribers.iter_mut() {
            if entry.key().0 == address {
                entry.value_mut().remove(&self.client);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, address: ServiceAddress, group: EventGroupId) -> Result<()> {
        self.bus.subscribers.entry((address, group)).or_default().insert(self.client);
        Ok(())
    }

    async fn unsubscribe(&self, address: ServiceAddress, group: EventGroupId) -> Result<()> {
        if let Some(mut entry) = self.bus.subscribers.get_mut(&(address, group)) {
            entry.value_mut().remove(&self.client);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Inbound>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
