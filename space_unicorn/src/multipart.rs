//! `multipart/form-data` codec for POLLING batches.
//!
//! A batch of messages is sent as one form, one part per message, named by
//! its position. Text messages become plain fields; binary messages become
//! file fields (`filename="blob"`), which is how the decoder tells them
//! apart:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="0"\r\n
//! Content-Type: text/plain; charset=utf-8\r\n
//! \r\n
//! hello\r\n
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="1"; filename="blob"\r\n
//! Content-Type: application/octet-stream\r\n
//! \r\n
//! <bytes>\r\n
//! --<boundary>--\r\n
//! ```

use core::convert::Infallible;

use bytes::Bytes;
use futures::{future, stream};
use multer::Multipart;

use crate::{error::MultipartError, message::Message};

const CRLF: &[u8] = b"\r\n";

/// An encoded batch: the `Content-Type` header value and the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    /// `multipart/form-data; boundary=...`
    pub content_type: String,

    /// The form body.
    pub body: Vec<u8>,
}

/// Encode a batch of messages as a form body with a fresh random boundary.
#[must_use]
pub fn encode(batch: &[Message]) -> EncodedBatch {
    let boundary = format!("----SpaceUnicornBoundary{:016x}", rand::random::<u64>());
    encode_with_boundary(batch, &boundary)
}

fn encode_with_boundary(batch: &[Message], boundary: &str) -> EncodedBatch {
    let mut body = Vec::with_capacity(batch.iter().map(|m| m.len() + 160).sum::<usize>() + 64);

    for (index, message) in batch.iter().enumerate() {
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(CRLF);

        match message {
            Message::Text(text) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{index}\"\r\n\
                         Content-Type: text/plain; charset=utf-8\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(text.as_bytes());
            }
            Message::Binary(bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{index}\"; filename=\"blob\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }

        body.extend_from_slice(CRLF);
    }

    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--");
    body.extend_from_slice(CRLF);

    EncodedBatch {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body,
    }
}

/// Decode a form body into messages, preserving part order.
///
/// Parts with a filename become [`Message::Binary`]; all others must be
/// UTF-8 and become [`Message::Text`].
///
/// # Errors
///
/// Returns a [`MultipartError`] if the content type carries no boundary or
/// the body is not a well-formed form.
pub async fn decode(content_type: &str, body: Bytes) -> Result<Vec<Message>, MultipartError> {
    let boundary = multer::parse_boundary(content_type).map_err(MultipartError::ContentType)?;
    let chunks = stream::once(future::ready(Ok::<_, Infallible>(body)));
    let mut form = Multipart::new(chunks, boundary);

    let mut messages = Vec::new();
    while let Some(field) = form.next_field().await? {
        let is_file = field.file_name().is_some();
        let content = field.bytes().await?;

        messages.push(if is_file {
            Message::Binary(content)
        } else {
            let text =
                String::from_utf8(content.to_vec()).map_err(|_| MultipartError::InvalidText)?;
            Message::Text(text)
        });
    }

    Ok(messages)
}
