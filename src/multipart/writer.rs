//! Outbound multipart body assembly

use bytes::{BufMut, Bytes, BytesMut};

/// Builds a `multipart/form-data` body in memory
///
/// ```text
/// --B\r\n
/// Content-Disposition: form-data; name="metadata"\r\n
/// Content-Type: application/json; charset=UTF-8\r\n
/// \r\n
/// {...}\r\n
/// --B--\r\n
/// ```
#[derive(Debug)]
pub struct MultipartWriter {
    boundary: String,
    buffer: BytesMut,
    parts: usize,
}

impl MultipartWriter {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buffer: BytesMut::new(),
            parts: 0,
        }
    }

    /// Value for the request's `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Append one named part
    pub fn part(mut self, name: &str, content_type: &str, data: &[u8]) -> Self {
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"\r\n");
        self.buffer.put_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
        );
        self.buffer
            .put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        self.buffer.put_slice(data);
        self.buffer.put_slice(b"\r\n");
        self.parts += 1;
        self
    }

    pub fn part_count(&self) -> usize {
        self.parts
    }

    /// Write the terminator and return the body
    pub fn finish(mut self) -> Bytes {
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"--\r\n");
        self.buffer.freeze()
    }
}
