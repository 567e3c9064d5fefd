//! Incremental request tokenizer.
//!
//! The adapter only depends on the [`Tokenizer`] trait: bytes go in through
//! `feed`, structured events come out through a [`ParserHandler`].
//! [`HttparseTokenizer`] is the default implementation, built on `httparse`
//! for the head and the chunk-size lines.
//!
//! # Data Flow
//! ```text
//! feed(bytes)
//!     → buffer
//!     → Head:  httparse::Request → on_headers_complete(head)
//!     → Body:  Content-Length or chunked → on_body(chunk)*
//!     → on_message_complete(keep_alive) → Continue | Pause
//! ```

use bytes::{Buf, Bytes, BytesMut};
use std::cmp;
use thiserror::Error;

use crate::http::request::{Headers, RequestHead, Version};

// some reasonable number
pub const HEADERS_MAX: usize = 64;

pub const DEFAULT_MAX_HEAD_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("unsupported transfer encoding")]
    UnsupportedTransferEncoding,

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("invalid chunk suffix")]
    InvalidChunkSuffix,
}

/// What the tokenizer should do after a message completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Stop interpreting input; later bytes stay buffered.
    Pause,
}

/// Receives tokenizer events.
pub trait ParserHandler {
    fn on_headers_complete(&mut self, head: RequestHead);

    fn on_body(&mut self, chunk: &[u8]);

    fn on_message_complete(&mut self, keep_alive: bool) -> Control;
}

pub trait Tokenizer: Send {
    /// Consume `data`, firing events on `handler` for everything that can be
    /// parsed so far.
    fn feed(&mut self, data: &[u8], handler: &mut dyn ParserHandler)
        -> Result<(), TokenizerError>;

    /// Version of the most recent request head.
    fn http_version(&self) -> Version;

    /// Keep-alive disposition of the most recent request.
    fn keep_alive(&self) -> bool;

    /// Bytes fed but not yet interpreted.
    fn take_buffered(&mut self) -> Bytes;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Known(usize),
    Chunked(ChunkPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Body(BodyFraming),
    Paused,
}

pub struct HttparseTokenizer {
    buf: BytesMut,
    phase: Phase,
    version: Version,
    keep_alive: bool,
    max_head_size: usize,
}

impl HttparseTokenizer {
    pub fn new(max_head_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            phase: Phase::Head,
            version: Version::HTTP_11,
            keep_alive: false,
            max_head_size,
        }
    }

    fn process(&mut self, handler: &mut dyn ParserHandler) -> Result<(), TokenizerError> {
        loop {
            let progressed = match self.phase {
                Phase::Paused => return Ok(()),
                Phase::Head => self.parse_head(handler)?,
                Phase::Body(BodyFraming::Known(left)) => self.parse_known(left, handler),
                Phase::Body(BodyFraming::Chunked(phase)) => self.parse_chunked(phase, handler)?,
            };

            if !progressed {
                return Ok(());
            }
        }
    }

    fn parse_head(&mut self, handler: &mut dyn ParserHandler) -> Result<bool, TokenizerError> {
        if self.buf.is_empty() {
            return Ok(false);
        }

        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];
            let mut req = httparse::Request::new(&mut headers);

            match req.parse(&self.buf[..])? {
                httparse::Status::Complete(size) => Some((size, process_request(&req)?)),
                httparse::Status::Partial => None,
            }
        };

        let (size, (head, framing, keep_alive)) = match parsed {
            Some(parsed) => parsed,
            None => {
                if self.buf.len() > self.max_head_size {
                    return Err(TokenizerError::HeadTooLarge(self.max_head_size));
                }
                return Ok(false);
            }
        };

        self.buf.advance(size);
        self.version = head.version;
        self.keep_alive = keep_alive;

        handler.on_headers_complete(head);

        match framing {
            Some(framing) => self.phase = Phase::Body(framing),
            None => self.complete(handler),
        }

        Ok(true)
    }

    fn parse_known(&mut self, left: usize, handler: &mut dyn ParserHandler) -> bool {
        if self.buf.is_empty() {
            return false;
        }

        let size = cmp::min(left, self.buf.len());
        let chunk = self.buf.split_to(size);
        handler.on_body(&chunk);

        let left = left - size;
        if left == 0 {
            self.complete(handler);
        } else {
            self.phase = Phase::Body(BodyFraming::Known(left));
        }

        true
    }

    fn parse_chunked(
        &mut self,
        phase: ChunkPhase,
        handler: &mut dyn ParserHandler,
    ) -> Result<bool, TokenizerError> {
        match phase {
            ChunkPhase::Size => {
                let (pos, size) = match httparse::parse_chunk_size(&self.buf[..]) {
                    Ok(httparse::Status::Complete(ret)) => ret,
                    Ok(httparse::Status::Partial) => return Ok(false),
                    Err(_) => return Err(TokenizerError::InvalidChunkSize),
                };

                let size = usize::try_from(size).map_err(|_| TokenizerError::InvalidChunkSize)?;

                self.buf.advance(pos);

                let next = if size == 0 {
                    ChunkPhase::Trailers
                } else {
                    ChunkPhase::Data(size)
                };
                self.phase = Phase::Body(BodyFraming::Chunked(next));

                Ok(true)
            }
            ChunkPhase::Data(left) => {
                if self.buf.is_empty() {
                    return Ok(false);
                }

                let size = cmp::min(left, self.buf.len());
                let chunk = self.buf.split_to(size);
                handler.on_body(&chunk);

                let left = left - size;
                let next = if left == 0 {
                    ChunkPhase::DataEnd
                } else {
                    ChunkPhase::Data(left)
                };
                self.phase = Phase::Body(BodyFraming::Chunked(next));

                Ok(true)
            }
            ChunkPhase::DataEnd => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }

                if &self.buf[..2] != b"\r\n" {
                    return Err(TokenizerError::InvalidChunkSuffix);
                }

                self.buf.advance(2);
                self.phase = Phase::Body(BodyFraming::Chunked(ChunkPhase::Size));

                Ok(true)
            }
            ChunkPhase::Trailers => {
                let pos = {
                    let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];

                    match httparse::parse_headers(&self.buf[..], &mut headers)? {
                        httparse::Status::Complete((pos, _)) => pos,
                        httparse::Status::Partial => return Ok(false),
                    }
                };

                self.buf.advance(pos);
                self.complete(handler);

                Ok(true)
            }
        }
    }

    fn complete(&mut self, handler: &mut dyn ParserHandler) {
        self.phase = match handler.on_message_complete(self.keep_alive) {
            Control::Continue => Phase::Head,
            Control::Pause => Phase::Paused,
        };
    }
}

impl Default for HttparseTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAD_SIZE)
    }
}

impl Tokenizer for HttparseTokenizer {
    fn feed(
        &mut self,
        data: &[u8],
        handler: &mut dyn ParserHandler,
    ) -> Result<(), TokenizerError> {
        self.buf.extend_from_slice(data);
        self.process(handler)
    }

    fn http_version(&self) -> Version {
        self.version
    }

    fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    fn take_buffered(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

fn header_contains_param(value: &str, param: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(param))
}

// returns the head, body framing and keep-alive disposition
fn process_request(
    req: &httparse::Request,
) -> Result<(RequestHead, Option<BodyFraming>, bool), TokenizerError> {
    let version = Version {
        major: 1,
        minor: req.version.unwrap_or(1),
    };

    let mut headers = Headers::new();
    let mut content_len = None;
    let mut chunked = false;
    let mut keep_alive = false;
    let mut close = false;
    let mut expect_100 = false;

    for h in req.headers.iter() {
        let value = String::from_utf8_lossy(h.value).into_owned();

        if h.name.eq_ignore_ascii_case("Content-Length") {
            let len: usize = value
                .trim()
                .parse()
                .map_err(|_| TokenizerError::InvalidContentLength)?;

            if content_len.is_some_and(|existing| existing != len) {
                return Err(TokenizerError::InvalidContentLength);
            }

            content_len = Some(len);
        } else if h.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if value.trim().eq_ignore_ascii_case("chunked") {
                chunked = true;
            } else {
                return Err(TokenizerError::UnsupportedTransferEncoding);
            }
        } else if h.name.eq_ignore_ascii_case("Connection") {
            keep_alive |= header_contains_param(&value, "keep-alive");
            close |= header_contains_param(&value, "close");
        } else if h.name.eq_ignore_ascii_case("Expect") {
            expect_100 |= version.minor >= 1 && header_contains_param(&value, "100-continue");
        }

        headers.append(h.name, &value);
    }

    let framing = if chunked {
        Some(BodyFraming::Chunked(ChunkPhase::Size))
    } else {
        match content_len {
            Some(len) if len > 0 => Some(BodyFraming::Known(len)),
            _ => None,
        }
    };

    let persistent = if version.minor >= 1 {
        !close
    } else {
        keep_alive && !close
    };

    let mut head = RequestHead::new(
        req.method.unwrap_or_default(),
        req.path.unwrap_or_default(),
        version,
        headers,
    );
    head.expect_continue = expect_100 && framing.is_some();

    Ok((head, framing, persistent))
}
