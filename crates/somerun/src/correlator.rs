//! # Request/Response Correlation
//!
//! Tracks requests in flight and routes each inbound response to the caller
//! that is waiting for it.
//!
//! ## Modes
//!
//! - **Token**: every request carries a fresh `CorrelationToken` and the
//!   provider echoes it, so concurrent calls on one method are told apart.
//! - **Method**: responses are matched by `(service, method)` to the most
//!   recently issued request for that method. An earlier request still in
//!   flight on the same method cannot be matched and times out.
//!
//! ## Invariants
//!
//! - Tokens come from one increasing counter and are never reused.
//! - A pending request is removed exactly once: by its response, by timeout,
//!   by cancellation, or when its service becomes unavailable.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use somerpc::CorrelationToken;
use somerpc::Message;
use somerpc::MethodId;
use somerpc::ServiceAddress;

use crate::transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Transport(transport::Error),
    /// No response arrived within the request timeout.
    Timeout,
    /// The service became unavailable while the request was in flight.
    ServiceUnavailable(ServiceAddress),
    /// The consumer stopped before the response arrived.
    ChannelClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Timeout => write!(f, "Request timed out"),
            Self::ServiceUnavailable(address) => write!(f, "Service {} became unavailable", address),
            Self::ChannelClosed => write!(f, "Response channel closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// How responses are matched to requests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    #[default]
    Token,
    Method,
}

/// A request waiting for its response.
pub struct PendingRequest {
    pub address: ServiceAddress,
    pub method: MethodId,
    pub token: CorrelationToken,
    pub issued_at: Instant,
    reply: Option<oneshot::Sender<Result<Message>>>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("address", &self.address)
            .field("method", &self.method)
            .field("token", &self.token)
            .field("issued_at", &self.issued_at)
            .field("awaited", &self.reply.is_some())
            .finish()
    }
}

impl PendingRequest {
    /// Completes the request. Returns false if nobody was waiting.
    fn complete(self, result: Result<Message>) -> bool {
        match self.reply {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// What happened to an inbound response.
#[derive(Debug)]
pub enum Delivery {
    /// Handed to the waiting caller.
    Delivered,
    /// Matched a request nobody is awaiting (fire-and-log requests).
    Unawaited(PendingRequest),
    /// Matched nothing: late, duplicate, or superseded.
    Unmatched,
}

/// The client-side ledger of requests in flight.
pub struct Correlator {
    mode: CorrelationMode,
    pending: DashMap<CorrelationToken, PendingRequest>,
    latest: DashMap<(ServiceAddress, MethodId), CorrelationToken>,
    next_token: AtomicU64,
}

impl Correlator {
    pub fn new(mode: CorrelationMode) -> Self {
        Self {
            mode,
            pending: DashMap::new(),
            latest: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Records a new request and returns its token.
    ///
    /// With `awaited`, also returns the receiver the response will arrive on.
    pub fn issue(
        &self,
        address: ServiceAddress,
        method: MethodId,
        awaited: bool,
    ) -> (CorrelationToken, Option<oneshot::Receiver<Result<Message>>>) {
        let token = CorrelationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = if awaited {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.pending.insert(token, PendingRequest {
            address,
            method,
            token,
            issued_at: Instant::now(),
            reply,
        });
        if self.mode == CorrelationMode::Method {
            self.latest.insert((address, method), token);
        }
        (token, rx)
    }

    /// Finds and removes the request a response belongs to.
    pub fn resolve(&self, response: &Message) -> Option<PendingRequest> {
        let token = match self.mode {
            CorrelationMode::Token => response.token,
            CorrelationMode::Method => {
                let (_, token) = self.latest.remove(&(response.address, response.method))?;
                token
            }
        };

        let (_, pending) = self
            .pending
            .remove_if(&token, |_, p| p.address == response.address && p.method == response.method)?;
        Some(pending)
    }

    /// Routes a response to its caller.
    pub fn deliver(&self, response: Message) -> Delivery {
        let Some(pending) = self.resolve(&response) else {
            return Delivery::Unmatched;
        };
        if pending.reply.is_none() {
            return Delivery::Unawaited(pending);
        }
        let token = pending.token;
        if !pending.complete(Ok(response)) {
            tracing::debug!(%token, "caller stopped waiting before the response arrived");
        }
        Delivery::Delivered
    }

    /// Forgets a request without completing it.
    pub fn cancel(&self, token: CorrelationToken) -> Option<PendingRequest> {
        let (_, pending) = self.pending.remove(&token)?;
        self.latest.remove_if(&(pending.address, pending.method), |_, t| *t == token);
        Some(pending)
    }

    /// Fails every request older than `timeout`. Returns how many expired.
    pub fn expire(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<CorrelationToken> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.value().issued_at) >= timeout)
            .map(|entry| *entry.key())
            .collect();
        self.fail(expired, Error::Timeout)
    }

    /// Fails every request addressed to `address`.
    pub fn fail_address(&self, address: ServiceAddress) -> usize {
        let stale: Vec<CorrelationToken> = self
            .pending
            .iter()
            .filter(|entry| entry.value().address == address)
            .map(|entry| *entry.key())
            .collect();
        self.fail(stale, Error::ServiceUnavailable(address))
    }

    /// Fails everything still pending.
    pub fn fail_all(&self, error: Error) -> usize {
        let keys: Vec<CorrelationToken> = self.pending.iter().map(|entry| *entry.key()).collect();
        self.fail(keys, error)
    }

    fn fail(&self, tokens: Vec<CorrelationToken>, error: Error) -> usize {
        let mut count = 0;
        for token in tokens {
            if let Some(pending) = self.cancel(token) {
                tracing::debug!(%token, address = %pending.address, method = %pending.method, %error, "pending request failed");
                pending.complete(Err(error.clone()));
                count += 1;
            }
        }
        count
    }

    pub fn is_pending(&self, token: CorrelationToken) -> bool {
        self.pending.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .field("next_token", &self.next_token.load(Ordering::Relaxed))
            .finish()
    }
}
