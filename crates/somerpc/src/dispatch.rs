//! # Method Dispatch
//!
//! Maps a method id to the handler that answers it.
//!
//! ## Invariants
//! - Each method id is bound at most once; rebinding is a setup error.
//! - `dispatch` never fails and never panics: unknown methods get the
//!   canonical text, and handler errors or panics become error text.
//! - Handlers never see their own method id. Several ids may share one.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use somepack::Payload;
use somepack::text;

use crate::error::Error;
use crate::error::Result;
use crate::ids::MethodId;
use crate::message::ReturnCode;

/// Failure reported by a handler. Becomes the response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Answers a request payload with a response payload.
pub trait MethodHandler: Send + Sync + 'static {
    fn handle(&self, request: &Payload) -> std::result::Result<Payload, HandlerError>;
}

impl<F> MethodHandler for F
where
    F: Fn(&Payload) -> std::result::Result<Payload, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: &Payload) -> std::result::Result<Payload, HandlerError> {
        self(request)
    }
}

/// How a dispatched request was answered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    UnknownMethod,
    Failed,
}

/// The response payload together with how it was produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub payload: Payload,
}

impl Dispatched {
    pub fn return_code(&self) -> ReturnCode {
        match self.outcome {
            Outcome::Handled => ReturnCode::Ok,
            Outcome::UnknownMethod => ReturnCode::UnknownMethod,
            Outcome::Failed => ReturnCode::NotOk,
        }
    }
}

/// Registry of method handlers, filled once during setup.
#[derive(Default, Clone)]
pub struct MethodTable {
    handlers: BTreeMap<MethodId, Arc<dyn MethodHandler>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `method` to a closure.
    ///
    /// Returns `DuplicateRegistration` if the method is already bound.
    pub fn register<F>(&mut self, method: MethodId, handler: F) -> Result<()>
    where
        F: Fn(&Payload) -> std::result::Result<Payload, HandlerError> + Send + Sync + 'static,
    {
        self.register_shared(&[method], Arc::new(handler))
    }

    /// Binds `method` to a handler object.
    pub fn register_handler(&mut self, method: MethodId, handler: impl MethodHandler) -> Result<()> {
        self.register_shared(&[method], Arc::new(handler))
    }

    /// Binds every id in `methods` to one shared handler.
    ///
    /// Either all ids are bound or, on a duplicate, none are.
    pub fn register_shared(&mut self, methods: &[MethodId], handler: Arc<dyn MethodHandler>) -> Result<()> {
        for (i, method) in methods.iter().enumerate() {
            if self.handlers.contains_key(method) || methods[..i].contains(method) {
                return Err(Error::DuplicateRegistration(*method));
            }
        }
        for method in methods {
            self.handlers.insert(*method, handler.clone());
        }
        Ok(())
    }

    pub fn contains(&self, method: MethodId) -> bool {
        self.handlers.contains_key(&method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Bound method ids in ascending order.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.handlers.keys().copied()
    }

    /// Runs the handler bound to `method` against `request`.
    pub fn dispatch(&self, method: MethodId, request: &Payload) -> Dispatched {
        let Some(handler) = self.handlers.get(&method) else {
            return Dispatched {
                outcome: Outcome::UnknownMethod,
                payload: Payload::from_text(text::UNKNOWN_METHOD),
            };
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(Ok(payload)) => Dispatched { outcome: Outcome::Handled, payload },
            Ok(Err(e)) => Dispatched {
                outcome: Outcome::Failed,
                payload: Payload::from(text::failure(&e.0)),
            },
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Dispatched {
                    outcome: Outcome::Failed,
                    payload: Payload::from(text::failure(&format!("handler panicked: {}", detail))),
                }
            }
        }
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
