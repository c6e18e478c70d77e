use std::borrow::Cow;
use std::sync::Arc;

/// Opaque content carried through the hub.
///
/// The relay never inspects it: upstream messages arrive as text, socket
/// clients may also send binary frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Raw bytes as received: text when they are valid UTF-8, binary
    /// otherwise. Nothing is lost either way.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Payload::Text(text),
            Err(e) => Payload::Binary(e.into_bytes()),
        }
    }

    /// The payload as text. Binary content is decoded lossily.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// A broadcast as seen by every client of a hub.
///
/// `id` is a delivery identifier for framing only. Ordering comes from the
/// hub's single broadcast path and each client's FIFO queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub event: Arc<str>,
    pub payload: Payload,
}

/// Delivery identifiers: wall-clock milliseconds, forced strictly increasing.
#[derive(Debug, Default)]
pub(crate) struct DeliveryClock {
    last: u64,
}

impl DeliveryClock {
    pub(crate) fn next(&mut self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.last = now.max(self.last + 1);
        self.last
    }
}
