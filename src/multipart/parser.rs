//! Incremental multipart parser
//!
//! Bytes are pushed in as they arrive; complete parts are pulled out with
//! [`MultipartParser::next_part`]. A line is only interpreted once its
//! newline has been seen (or the input has been declared finished), so the
//! sequence of parts does not depend on how the input was chunked.

use super::part::{Part, PartBuilder, PartState};
use super::MultipartError;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Split a line into its content and its line ending (`\r\n`, `\n` or none)
pub(crate) fn split_line_ending(line: &[u8]) -> (&[u8], &'static [u8]) {
    if let Some(content) = line.strip_suffix(b"\r\n") {
        (content, b"\r\n")
    } else if let Some(content) = line.strip_suffix(b"\n") {
        (content, b"\n")
    } else {
        (line, b"")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Separator,
    Terminator,
    Blank,
    Content,
}

#[derive(Debug)]
enum ParserState {
    /// Nothing but blank lines seen so far
    Preamble,
    InPart(PartBuilder),
    /// Discarding lines until the next separator (after a fault or a terminator)
    Skipping,
}

/// Incremental, resumable parser for one boundary
#[derive(Debug)]
pub struct MultipartParser {
    boundary: String,
    separator: Vec<u8>,
    terminator: Vec<u8>,
    buffer: BytesMut,
    scanned: usize,
    state: ParserState,
    ready: VecDeque<Result<Part, MultipartError>>,
    finished: bool,
    eof_handled: bool,
}

impl MultipartParser {
    pub fn new(boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        let separator = format!("--{boundary}").into_bytes();
        let terminator = format!("--{boundary}--").into_bytes();

        Self {
            boundary,
            separator,
            terminator,
            buffer: BytesMut::new(),
            scanned: 0,
            state: ParserState::Preamble,
            ready: VecDeque::new(),
            finished: false,
            eof_handled: false,
        }
    }

    /// Parse a complete body in one go
    pub fn parse_all(boundary: impl Into<String>, body: &[u8]) -> Vec<Result<Part, MultipartError>> {
        let mut parser = Self::new(boundary);
        parser.push(body);
        parser.finish();
        parser.parts().collect()
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Append newly arrived bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Declare the input exhausted
    ///
    /// A trailing line without a newline is then interpreted as final, and a
    /// part still in progress is closed.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Bytes received but not yet consumed as complete lines
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// State of the part currently being collected, if any
    pub fn current_state(&self) -> Option<PartState> {
        match &self.state {
            ParserState::InPart(builder) => Some(builder.state()),
            _ => None,
        }
    }

    /// Next complete part, or the next parse fault
    ///
    /// Returns `None` when more input is needed. Calling again after pushing
    /// more bytes resumes where parsing left off.
    pub fn next_part(&mut self) -> Option<Result<Part, MultipartError>> {
        loop {
            if let Some(result) = self.ready.pop_front() {
                return Some(result);
            }

            match self.next_line() {
                Some(line) => self.process_line(&line),
                None if self.finished && !self.eof_handled => {
                    self.eof_handled = true;
                    self.process_eof();
                }
                None => return None,
            }
        }
    }

    /// Iterate over the parts available so far
    pub fn parts(&mut self) -> Parts<'_> {
        Parts { parser: self }
    }

    fn next_line(&mut self) -> Option<Bytes> {
        if let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset + 1;
            self.scanned = 0;
            return Some(self.buffer.split_to(end).freeze());
        }

        if self.finished && !self.buffer.is_empty() {
            self.scanned = 0;
            return Some(self.buffer.split().freeze());
        }

        // Remember how far we looked so the next scan starts at new bytes
        self.scanned = self.buffer.len();
        None
    }

    fn classify(&self, line: &[u8]) -> LineKind {
        let (content, _) = split_line_ending(line);
        let trimmed = trim_trailing_padding(content);

        if trimmed == self.terminator.as_slice() {
            LineKind::Terminator
        } else if trimmed == self.separator.as_slice() {
            LineKind::Separator
        } else if content.is_empty() {
            LineKind::Blank
        } else {
            LineKind::Content
        }
    }

    fn process_line(&mut self, line: &[u8]) {
        let kind = self.classify(line);
        let state = std::mem::replace(&mut self.state, ParserState::Skipping);

        self.state = match (state, kind) {
            (ParserState::Preamble, LineKind::Blank) => ParserState::Preamble,
            (ParserState::Preamble | ParserState::Skipping, LineKind::Separator) => {
                ParserState::InPart(PartBuilder::new())
            }
            (ParserState::Preamble, LineKind::Terminator | LineKind::Content) => {
                let line = String::from_utf8_lossy(split_line_ending(line).0).into_owned();
                warn!(boundary = %self.boundary, "Multipart stream does not start with boundary");
                self.ready
                    .push_back(Err(MultipartError::MissingBoundary { line }));
                ParserState::Skipping
            }
            (ParserState::Skipping, _) => ParserState::Skipping,
            (ParserState::InPart(builder), LineKind::Separator) => {
                self.emit(builder, false);
                ParserState::InPart(PartBuilder::new())
            }
            (ParserState::InPart(builder), LineKind::Terminator) => {
                self.emit(builder, true);
                ParserState::Skipping
            }
            (ParserState::InPart(mut builder), LineKind::Blank | LineKind::Content) => {
                match builder.feed_line(line) {
                    Ok(()) => ParserState::InPart(builder),
                    Err(e) => {
                        self.ready.push_back(Err(e));
                        ParserState::Skipping
                    }
                }
            }
        };
    }

    fn process_eof(&mut self) {
        if let ParserState::InPart(builder) = std::mem::replace(&mut self.state, ParserState::Skipping) {
            match builder.complete_at_eof() {
                Ok(Some(part)) => {
                    debug!(bytes = part.body().len(), "Multipart input ended inside a part");
                    self.ready.push_back(Ok(part));
                }
                Ok(None) => {}
                Err(e) => self.ready.push_back(Err(e)),
            }
        }
    }

    fn emit(&mut self, builder: PartBuilder, is_last: bool) {
        if let Some(part) = builder.complete(is_last) {
            debug!(
                content_type = part.content_type().unwrap_or("-"),
                bytes = part.body().len(),
                is_last,
                "Multipart part complete"
            );
            self.ready.push_back(Ok(part));
        }
    }
}

fn trim_trailing_padding(mut content: &[u8]) -> &[u8] {
    while let [rest @ .., b' ' | b'\t'] = content {
        content = rest;
    }
    content
}

/// Iterator over the parts a [`MultipartParser`] can produce right now
pub struct Parts<'a> {
    parser: &'a mut MultipartParser,
}

impl Iterator for Parts<'_> {
    type Item = Result<Part, MultipartError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_part()
    }
}
