//! Messages exchanged over either transport.
//!
//! A [`Message`] is the normalized form every transport carries: text or raw
//! bytes. A [`Payload`] is what callers may hand to `send`, including
//! [`Blob`]s whose contents are read asynchronously before forwarding.

use core::{fmt, pin::Pin};
use std::io;

use bytes::Bytes;
use futures::{io::AsyncReadExt, AsyncRead};

/// A single message, normalized to text or a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    /// UTF-8 text.
    Text(String),

    /// Raw bytes.
    Binary(Bytes),
}

impl Message {
    /// Returns the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Returns the byte content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Message::Text(_) => None,
            Message::Binary(bytes) => Some(bytes),
        }
    }

    /// Whether this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Message::Binary(bytes)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(bytes))
    }
}

/// A binary payload whose bytes come from an asynchronous source.
pub struct Blob {
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl Blob {
    /// Wrap an async reader. It is read to the end when the blob is sent.
    pub fn new<R: AsyncRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::pin(reader),
        }
    }

    /// Read the whole blob into memory.
    ///
    /// # Errors
    ///
    /// Returns any I/O error produced by the underlying reader.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").finish_non_exhaustive()
    }
}

/// Anything that can be sent through a [`Context`](crate::context::Context)
/// or a [`Client`](crate::client::Client).
#[derive(Debug)]
pub enum Payload {
    /// UTF-8 text, forwarded as-is.
    Text(String),

    /// A byte buffer, forwarded as-is.
    Binary(Bytes),

    /// An async byte source, awaited before forwarding.
    Blob(Blob),
}

impl Payload {
    /// Normalize into a [`Message`], reading blobs to the end.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a blob's reader fails.
    pub async fn normalize(self) -> io::Result<Message> {
        match self {
            Payload::Text(text) => Ok(Message::Text(text)),
            Payload::Binary(bytes) => Ok(Message::Binary(bytes)),
            Payload::Blob(blob) => Ok(Message::Binary(blob.into_bytes().await?)),
        }
    }
}

impl From<Message> for Payload {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Payload::Text(text),
            Message::Binary(bytes) => Payload::Binary(bytes),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl From<Blob> for Payload {
    fn from(blob: Blob) -> Self {
        Payload::Blob(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_and_bytes_pass_through() {
        let text = Payload::from("hello").normalize().await.expect("text");
        assert_eq!(text, Message::Text("hello".into()));

        let bin = Payload::from(&[1u8, 2, 3][..]).normalize().await.expect("bin");
        assert_eq!(bin, Message::Binary(Bytes::from_static(&[1, 2, 3])));
    }

    #[tokio::test]
    async fn blob_is_read_to_end() {
        let blob = Blob::new(futures::io::Cursor::new(vec![7u8; 4096]));
        let msg = Payload::from(blob).normalize().await.expect("blob");

        assert_eq!(msg.as_binary().map(Bytes::len), Some(4096));
        assert!(!msg.is_text());
    }
}
