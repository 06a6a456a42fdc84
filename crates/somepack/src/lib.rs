//! # Somepack
//!
//! Owned byte payloads for service messages, and the text encodings of the
//! telemetry values they carry.
//!
//! ## Philosophy
//!
//! - **Opaque**: A `Payload` is just bytes. The transport never looks inside.
//! - **Owned**: Every message owns its payload. Sending copies, it never aliases.
//! - **Exact**: Text placed in a payload comes back byte-for-byte.

pub mod text;


/// Payload decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The payload bytes are not valid UTF-8.
    InvalidUtf8 { valid_up_to: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUtf8 { valid_up_to } => {
                write!(f, "payload is not valid UTF-8 after byte {}", valid_up_to)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for payload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An ordered, exclusively owned sequence of bytes carried by one message.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload {
    bytes: Vec<u8>,
}

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Copies `bytes` into a new payload.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }

    /// Encodes a string as its UTF-8 bytes.
    pub fn from_text(text: &str) -> Self {
        Self { bytes: text.as_bytes().to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the payload as UTF-8 text, failing on any invalid sequence.
    pub fn to_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|e| Error::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
    }

    /// Decodes the payload as text, replacing invalid sequences.
    ///
    /// Used for logging what a peer sent, where a best effort beats an error.
    pub fn to_text_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_text() {
            Ok(text) => write!(f, "Payload({:?})", text),
            Err(_) => write!(f, "Payload({} bytes)", self.bytes.len()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self { bytes: text.into_bytes() }
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
