//! # Error Definitions
//!
//! Setup-time failures of the protocol layer. Nothing here occurs at runtime:
//! runtime anomalies are answered in-band.

use crate::ids::MethodId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A handler is already bound to this method id.
    DuplicateRegistration(MethodId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRegistration(method) => {
                write!(f, "a handler is already registered for {}", method)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
