//! A single multipart part and its incremental builder

use super::headers::{HeaderValue, Headers};
use super::parser::split_line_ending;
use super::MultipartError;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use std::borrow::Cow;

const DEFAULT_CHARSET: &str = "UTF-8";

/// Parsing progress of a part
///
/// Parts move strictly forward: headers, then body, then complete. Only
/// complete parts are ever handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    CollectingHeaders,
    CollectingBody,
    Complete,
}

/// A complete part of a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    headers: Headers,
    body: Bytes,
    charset: String,
    is_last: bool,
}

impl Part {
    /// Build a part directly from headers and body bytes
    pub fn new(headers: Headers, body: impl Into<Bytes>) -> Self {
        let charset = charset_of(&headers);
        Self {
            headers,
            body: body.into(),
            charset,
            is_last: false,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Raw body bytes, exactly as received
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Charset from `Content-Type`, `UTF-8` when absent
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// True when this part was closed by the terminator line
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn state(&self) -> PartState {
        PartState::Complete
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type").map(HeaderValue::value)
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|content_type| content_type.to_ascii_lowercase().ends_with("/json"))
            .unwrap_or(false)
    }

    /// Body decoded with the part's charset
    pub fn text(&self) -> Result<Cow<'_, str>, MultipartError> {
        match self.charset.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => std::str::from_utf8(&self.body)
                .map(Cow::Borrowed)
                .map_err(|_| MultipartError::Decode {
                    charset: self.charset.clone(),
                }),
            "us-ascii" | "ascii" => {
                if self.body.is_ascii() {
                    // ASCII is a strict subset of UTF-8
                    std::str::from_utf8(&self.body)
                        .map(Cow::Borrowed)
                        .map_err(|_| MultipartError::Decode {
                            charset: self.charset.clone(),
                        })
                } else {
                    Err(MultipartError::Decode {
                        charset: self.charset.clone(),
                    })
                }
            }
            "iso-8859-1" | "latin1" | "latin-1" => {
                Ok(Cow::Owned(self.body.iter().map(|&b| b as char).collect()))
            }
            _ => Err(MultipartError::UnsupportedCharset(self.charset.clone())),
        }
    }

    /// Body parsed as JSON
    pub fn json(&self) -> Result<Value, MultipartError> {
        let text = self.text()?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn charset_of(headers: &Headers) -> String {
    headers
        .get("Content-Type")
        .and_then(|content_type| content_type.option("charset"))
        .unwrap_or(DEFAULT_CHARSET)
        .to_string()
}

/// Accumulates the lines of one part until its closing delimiter
#[derive(Debug)]
pub(crate) struct PartBuilder {
    state: PartState,
    raw_headers: Vec<(String, String)>,
    headers: Headers,
    body: BytesMut,
    held_newline: &'static [u8],
}

impl PartBuilder {
    pub(crate) fn new() -> Self {
        Self {
            state: PartState::CollectingHeaders,
            raw_headers: Vec::new(),
            headers: Headers::new(),
            body: BytesMut::new(),
            held_newline: b"",
        }
    }

    pub(crate) fn state(&self) -> PartState {
        self.state
    }

    /// Feed one line, including its line ending if it has one
    pub(crate) fn feed_line(&mut self, line: &[u8]) -> Result<(), MultipartError> {
        let (content, newline) = split_line_ending(line);
        match self.state {
            PartState::CollectingHeaders => self.write_header(content, newline),
            PartState::CollectingBody => {
                self.write_body(content, newline);
                Ok(())
            }
            PartState::Complete => Ok(()),
        }
    }

    fn write_header(&mut self, content: &[u8], newline: &[u8]) -> Result<(), MultipartError> {
        if newline.is_empty() {
            return Err(MultipartError::UnterminatedHeader);
        }

        let line = std::str::from_utf8(content).map_err(|_| MultipartError::InvalidHeaderEncoding)?;

        if line.trim().is_empty() {
            // Blank lines ahead of the first header are noise
            if !self.raw_headers.is_empty() {
                self.finish_headers();
            }
            return Ok(());
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = self.raw_headers.last_mut() {
                value.push_str(line.trim());
                return Ok(());
            }
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartError::HeaderWithoutColon {
                line: line.to_string(),
            })?;
        self.raw_headers
            .push((name.trim().to_string(), value.trim().to_string()));
        Ok(())
    }

    fn finish_headers(&mut self) {
        for (name, raw) in self.raw_headers.drain(..) {
            self.headers.insert(name, HeaderValue::parse(&raw));
        }
        self.state = PartState::CollectingBody;
    }

    /// The line ending ahead of a delimiter belongs to the delimiter, so each
    /// newline is held back until another body line follows it.
    fn write_body(&mut self, content: &[u8], newline: &'static [u8]) {
        if content.is_empty() && newline.is_empty() {
            return;
        }
        self.body.extend_from_slice(self.held_newline);
        self.body.extend_from_slice(content);
        self.held_newline = newline;
    }

    /// Close the part at a separator or terminator
    ///
    /// Returns `None` for an empty part (no headers, no body).
    pub(crate) fn complete(mut self, is_last: bool) -> Option<Part> {
        if self.state == PartState::CollectingHeaders {
            if self.raw_headers.is_empty() {
                return None;
            }
            self.finish_headers();
        }
        self.state = PartState::Complete;

        let charset = charset_of(&self.headers);
        Some(Part {
            headers: self.headers,
            body: self.body.freeze(),
            charset,
            is_last,
        })
    }

    /// Close the part because the input ended without a delimiter
    pub(crate) fn complete_at_eof(self) -> Result<Option<Part>, MultipartError> {
        if self.state == PartState::CollectingHeaders && !self.raw_headers.is_empty() {
            return Err(MultipartError::UnterminatedHeader);
        }
        Ok(self.complete(false))
    }
}
