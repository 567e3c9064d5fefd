//! HTTP/1.x protocol adapter.
//!
//! # Responsibilities
//! - Drive the connection read loop and feed the tokenizer
//! - Queue parsed requests and dispatch them in arrival order
//! - Let the application pull body chunks while its request is active
//! - Frame responses (fixed length, chunked, or until close)
//! - Hand the connection over to an upgrade target
//!
//! # Data Flow
//! ```text
//! socket ──read──▶ Tokenizer ──events──▶ ParseState (pipeline, active request)
//!                                              │
//!                  ┌───────────────────────────┘
//!                  ▼
//!        head has resolvable Upgrade? ──yes──▶ UpgradeTarget (owns socket)
//!                  │ no
//!                  ▼
//!        Application::call(&mut adapter)
//!            ├─ get_body_chunk() ──read──▶ Tokenizer (same task)
//!            └─ respond() / send_headers() + send_chunk()* + finish() ──write──▶ socket
//!                  │
//!                  ▼
//!        keep-alive? ──no──▶ close
//! ```
//!
//! # Design Decisions
//! - One task owns all per-connection state; the body pull runs the same
//!   tokenizer from inside the application callback
//! - A response is only written once its request has been fully read
//! - Transport errors and malformed input end the loop quietly
//! - The socket is closed exactly once, unless ownership passed to an
//!   upgrade target

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;
use crate::http::pipeline::Pipeline;
use crate::http::request::{Headers, Request, RequestHead, Version};
use crate::http::response::{self, BodyMode};
use crate::http::tokenizer::{
    Control, HttparseTokenizer, ParserHandler, Tokenizer, DEFAULT_MAX_HEAD_SIZE,
};
use crate::net::connection::ConnectionId;
use crate::net::io::{Io, RawConnection};
use crate::observability::metrics;
use crate::upgrade::{self, UpgradeRegistry, UpgradeTarget};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Size of a single socket read.
    pub read_buffer_size: usize,
    /// Largest request head accepted by the default tokenizer.
    pub max_head_size: usize,
    /// Close the connection when no request arrives within this window.
    pub idle_timeout: Option<Duration>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            idle_timeout: None,
        }
    }
}

/// Application callback, invoked once per dispatched request.
///
/// The request is available through [`Http1Adapter::request`]. The
/// callback should finish the response before returning, otherwise the
/// connection is not reused.
pub trait Application: Send + Sync {
    fn call<'a>(&'a self, conn: &'a mut Http1Adapter) -> BoxFuture<'a, Result<(), Error>>;
}

/// Adapts a closure returning a boxed future into an [`Application`].
pub struct AppFn<F>(F);

pub fn app_fn<F>(f: F) -> AppFn<F>
where
    F: for<'a> Fn(&'a mut Http1Adapter) -> BoxFuture<'a, Result<(), Error>> + Send + Sync,
{
    AppFn(f)
}

impl<F> Application for AppFn<F>
where
    F: for<'a> Fn(&'a mut Http1Adapter) -> BoxFuture<'a, Result<(), Error>> + Send + Sync,
{
    fn call<'a>(&'a self, conn: &'a mut Http1Adapter) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(conn)
    }
}

/// Options for [`Http1Adapter::send_headers`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// No body follows; the status defaults to 204.
    pub empty_response: bool,
}

/// How the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The connection was closed by this adapter.
    Closed,
    /// The connection was handed to an upgrade target.
    Upgraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    NotStarted,
    Streaming(BodyMode),
    Finished { reusable: bool },
}

enum Fill {
    Data,
    Closed,
}

/// State mutated by tokenizer events.
struct ParseState {
    pipeline: Pipeline,
    active: Option<Request>,
    // only valid while get_body_chunk is running
    awaiting_chunk: bool,
    pending_chunk: Option<BytesMut>,
    // set once the active request is being drained; its body is dropped
    discard_body: bool,
    upgrades: Arc<UpgradeRegistry>,
}

impl ParseState {
    /// The request the tokenizer is currently filling: the newest one.
    fn parsing_mut(&mut self) -> Option<&mut Request> {
        match self.pipeline.tail_mut() {
            Some(request) => Some(request),
            None => self.active.as_mut(),
        }
    }

    fn clear(&mut self) {
        self.pipeline.clear();
        self.active = None;
        self.awaiting_chunk = false;
        self.pending_chunk = None;
        self.discard_body = false;
    }
}

impl ParserHandler for ParseState {
    fn on_headers_complete(&mut self, head: RequestHead) {
        self.pipeline.enqueue(Request::new(head));
    }

    fn on_body(&mut self, chunk: &[u8]) {
        // with an empty pipeline the chunk belongs to the active request
        if self.pipeline.is_empty() {
            if self.awaiting_chunk {
                self.pending_chunk
                    .get_or_insert_with(BytesMut::new)
                    .extend_from_slice(chunk);
                return;
            }

            if self.discard_body {
                return;
            }
        }

        if let Some(request) = self.parsing_mut() {
            request.append_body(chunk);
        }
    }

    fn on_message_complete(&mut self, keep_alive: bool) -> Control {
        let token = match self.parsing_mut() {
            Some(request) => {
                request.mark_complete(keep_alive);
                request.upgrade_token()
            }
            None => return Control::Continue,
        };

        // stop parsing at a request we will upgrade on, so whatever follows
        // it reaches the upgrade target untouched
        match token {
            Some(token) if self.upgrades.resolve(&token).is_some() => Control::Pause,
            _ => Control::Continue,
        }
    }
}

pub struct Http1Adapter {
    id: ConnectionId,
    io: Option<Box<dyn Io>>,
    tokenizer: Option<Box<dyn Tokenizer>>,
    state: ParseState,
    response: ResponseState,
    continue_sent: bool,
    read_buf: Vec<u8>,
    read_closed: bool,
    upgraded: bool,
    options: AdapterOptions,
}

impl Http1Adapter {
    /// Create an adapter using the default tokenizer.
    pub fn new<T: Io>(io: T, options: AdapterOptions, upgrades: Arc<UpgradeRegistry>) -> Self {
        let tokenizer = HttparseTokenizer::new(options.max_head_size);
        Self::with_tokenizer(io, Box::new(tokenizer), options, upgrades)
    }

    pub fn with_tokenizer<T: Io>(
        io: T,
        tokenizer: Box<dyn Tokenizer>,
        options: AdapterOptions,
        upgrades: Arc<UpgradeRegistry>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            io: Some(Box::new(io)),
            tokenizer: Some(tokenizer),
            state: ParseState {
                pipeline: Pipeline::new(),
                active: None,
                awaiting_chunk: false,
                pending_chunk: None,
                discard_body: false,
                upgrades,
            },
            response: ResponseState::NotStarted,
            continue_sent: false,
            read_buf: vec![0; options.read_buffer_size.max(1)],
            read_closed: false,
            upgraded: false,
            options,
        }
    }

    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The request currently being dispatched.
    pub fn request(&self) -> Option<&Request> {
        self.state.active.as_ref()
    }

    /// Protocol version responses are framed for.
    pub fn version(&self) -> Version {
        match (&self.state.active, &self.tokenizer) {
            (Some(request), _) => request.version(),
            (None, Some(tokenizer)) => tokenizer.http_version(),
            (None, None) => Version::default(),
        }
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// Run the read/dispatch loop until the connection ends or is upgraded.
    ///
    /// Transport errors end the loop with `Ok(Outcome::Closed)`. Errors
    /// returned by the application propagate after the connection has been
    /// closed.
    pub async fn run(&mut self, app: Arc<dyn Application>) -> Result<Outcome, Error> {
        let result = self.drive(&app).await;
        self.release().await;

        match &result {
            Ok(outcome) => tracing::trace!(connection_id = %self.id, ?outcome, "Read loop finished"),
            Err(e) => tracing::debug!(connection_id = %self.id, error = %e, "Read loop failed"),
        }

        result
    }

    /// Unwind after cancellation: drop queued requests and close the
    /// connection if this adapter still owns it.
    pub async fn interrupt(&mut self) {
        tracing::debug!(connection_id = %self.id, "Connection interrupted");
        self.release().await;
    }

    async fn drive(&mut self, app: &Arc<dyn Application>) -> Result<Outcome, Error> {
        loop {
            if let Fill::Closed = self.fill_idle().await {
                return Ok(Outcome::Closed);
            }

            while let Some(token) = self.state.pipeline.head().map(Request::upgrade_token) {
                let target = token.and_then(|token| self.state.upgrades.resolve(&token));

                if let Some(target) = target {
                    return self.upgrade(target, app).await;
                }

                if !self.dispatch(app.as_ref()).await? {
                    return Ok(Outcome::Closed);
                }
            }
        }
    }

    // returns whether the connection may carry another request
    async fn dispatch(&mut self, app: &dyn Application) -> Result<bool, Error> {
        let request = match self.state.pipeline.dequeue() {
            Some(request) => request,
            None => return Ok(true),
        };

        let started = Instant::now();
        let method = request.method().to_string();

        tracing::debug!(
            connection_id = %self.id,
            request_id = %request.id(),
            method = %method,
            path = %request.path(),
            version = %request.version(),
            "Dispatching request"
        );

        self.state.active = Some(request);
        self.state.discard_body = false;
        self.response = ResponseState::NotStarted;
        self.continue_sent = false;

        app.call(self).await?;

        let reusable = self.complete_exchange().await;
        metrics::record_request(&method, started);

        Ok(reusable)
    }

    async fn complete_exchange(&mut self) -> bool {
        let reusable = match self.response {
            ResponseState::Finished { reusable } => reusable,
            ResponseState::NotStarted | ResponseState::Streaming(_) => {
                tracing::warn!(
                    connection_id = %self.id,
                    request_id = ?self.state.active.as_ref().map(Request::id),
                    "Application returned without finishing the response"
                );
                false
            }
        };

        // the connection closes anyway, so an unread body is left unread
        if reusable && !self.active_complete() {
            self.drain_request().await;
        }

        let request = self.state.active.take();
        let keep_alive = request
            .as_ref()
            .and_then(Request::keep_alive)
            .unwrap_or(false);

        self.response = ResponseState::NotStarted;

        keep_alive && reusable
    }

    async fn upgrade(
        &mut self,
        target: UpgradeTarget,
        app: &Arc<dyn Application>,
    ) -> Result<Outcome, Error> {
        // read the upgrade request to its end so the tokenizer's leftover
        // bytes start exactly after it
        self.state.active = self.state.pipeline.dequeue();
        self.drain_request().await;

        let request = match self.state.active.take() {
            Some(request) if request.is_complete() => request,
            _ => {
                tracing::debug!(connection_id = %self.id, "Connection ended before upgrade");
                return Ok(Outcome::Closed);
            }
        };

        let io = match self.io.take() {
            Some(io) => io,
            None => return Ok(Outcome::Closed),
        };

        self.upgraded = true;
        let buffered = self
            .tokenizer
            .take()
            .map(|mut tokenizer| tokenizer.take_buffered())
            .unwrap_or_default();
        self.state.clear();

        let protocol = target.protocol().to_string();
        tracing::debug!(
            connection_id = %self.id,
            request_id = %request.id(),
            protocol = %protocol,
            buffered = buffered.len(),
            "Upgrading connection"
        );
        metrics::record_upgrade(&protocol);

        let conn = RawConnection::new(io, buffered);
        let headers = request.headers().clone();

        match target {
            UpgradeTarget::Handler { handler, .. } => handler.upgrade(conn, headers).await?,
            UpgradeTarget::H2c(adapter) => {
                let headers = upgrade::h2c_headers(&headers);
                adapter
                    .serve(conn, self.options.clone(), headers, Arc::clone(app))
                    .await?
            }
        }

        Ok(Outcome::Upgraded)
    }

    async fn fill_idle(&mut self) -> Fill {
        let idle = self
            .options
            .idle_timeout
            .filter(|_| self.state.pipeline.is_empty());

        match idle {
            Some(limit) => match tokio::time::timeout(limit, self.fill()).await {
                Ok(fill) => fill,
                Err(_) => {
                    tracing::debug!(connection_id = %self.id, ?limit, "Idle timeout");
                    self.read_closed = true;
                    Fill::Closed
                }
            },
            None => self.fill().await,
        }
    }

    // read once and feed the tokenizer
    async fn fill(&mut self) -> Fill {
        if self.read_closed {
            return Fill::Closed;
        }

        let (io, tokenizer) = match (self.io.as_mut(), self.tokenizer.as_mut()) {
            (Some(io), Some(tokenizer)) => (io, tokenizer),
            _ => {
                self.read_closed = true;
                return Fill::Closed;
            }
        };

        let size = match io.read(&mut self.read_buf).await {
            Ok(0) => {
                tracing::trace!(connection_id = %self.id, "Peer closed the connection");
                self.read_closed = true;
                return Fill::Closed;
            }
            Ok(size) => size,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Read failed");
                self.read_closed = true;
                return Fill::Closed;
            }
        };

        if let Err(e) = tokenizer.feed(&self.read_buf[..size], &mut self.state) {
            tracing::debug!(connection_id = %self.id, error = %e, "Malformed request");
            metrics::record_parse_error();
            self.read_closed = true;
            return Fill::Closed;
        }

        Fill::Data
    }

    fn active_complete(&self) -> bool {
        self.state.active.as_ref().is_some_and(Request::is_complete)
    }

    /// Pull the next piece of the active request's body.
    ///
    /// Bytes already buffered on the request are returned first. Returns
    /// `None` once the body is complete, or when the connection ends.
    pub async fn get_body_chunk(&mut self) -> Option<Bytes> {
        let buffered = self.state.active.as_mut().map(Request::take_body)?;
        if !buffered.is_empty() {
            return Some(buffered);
        }

        if self.active_complete() {
            return None;
        }

        self.send_continue().await;

        self.state.awaiting_chunk = true;
        self.state.pending_chunk = None;

        let chunk = loop {
            if let Some(chunk) = self.state.pending_chunk.take() {
                break Some(chunk.freeze());
            }

            if self.active_complete() {
                break None;
            }

            if let Fill::Closed = self.fill().await {
                break self.state.pending_chunk.take().map(BytesMut::freeze);
            }
        };

        self.state.awaiting_chunk = false;

        chunk
    }

    /// Read from the connection until the active request is complete.
    ///
    /// Body bytes read here are discarded. Bytes that were already buffered
    /// on the request stay there.
    pub async fn consume_request(&mut self) {
        if self.state.active.is_none() {
            return;
        }

        self.send_continue().await;
        self.drain_request().await;
    }

    // consume_request without the 100 Continue, for drains the client did
    // not ask for
    async fn drain_request(&mut self) {
        self.state.awaiting_chunk = false;
        self.state.pending_chunk = None;
        self.state.discard_body = true;

        while self.state.active.as_ref().is_some_and(|r| !r.is_complete()) {
            if let Fill::Closed = self.fill().await {
                break;
            }
        }
    }

    /// Write a complete response in one write.
    ///
    /// Without an explicit `:status`, the status is 200 for a non-empty
    /// body and 204 otherwise.
    pub async fn respond(&mut self, body: &[u8], headers: &Headers) -> Result<(), Error> {
        self.check_response_not_started()?;

        if !self.active_complete() {
            self.consume_request().await;
        }

        let out = response::encode_response(self.version(), headers, body);

        self.response = ResponseState::Finished { reusable: false };
        self.write(&out).await?;
        self.response = ResponseState::Finished { reusable: true };

        Ok(())
    }

    /// Write the status line and headers of a streamed response.
    pub async fn send_headers(&mut self, headers: &Headers, options: SendOptions) -> Result<(), Error> {
        self.check_response_not_started()?;

        if !self.active_complete() {
            self.consume_request().await;
        }

        let (out, mode) = response::encode_head(self.version(), headers, options.empty_response);

        self.response = ResponseState::Finished { reusable: false };
        self.write(&out).await?;
        self.response = match mode {
            BodyMode::Empty => ResponseState::Finished { reusable: true },
            mode => ResponseState::Streaming(mode),
        };

        Ok(())
    }

    /// Write one body segment of a streamed response, optionally ending it.
    pub async fn send_chunk(&mut self, data: &[u8], done: bool) -> Result<(), Error> {
        let mode = match self.response {
            ResponseState::Streaming(mode) => mode,
            ResponseState::NotStarted => {
                return Err(Error::ResponseState("headers have not been sent"))
            }
            ResponseState::Finished { .. } => {
                return Err(Error::ResponseState("response already finished"))
            }
        };

        let mut out = Vec::with_capacity(data.len() + 16);
        match mode {
            BodyMode::Chunked => response::write_chunk(&mut out, data, done),
            BodyMode::UntilClose => out.extend_from_slice(data),
            BodyMode::Empty => {}
        }

        if done {
            // a body delimited by close can only end by closing
            self.response = ResponseState::Finished {
                reusable: mode == BodyMode::Chunked,
            };
        }

        if out.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.write(&out).await {
            self.response = ResponseState::Finished { reusable: false };
            return Err(e);
        }

        Ok(())
    }

    /// End a streamed response with the terminating chunk.
    pub async fn finish(&mut self) -> Result<(), Error> {
        self.send_chunk(&[], true).await
    }

    fn check_response_not_started(&self) -> Result<(), Error> {
        if self.state.active.is_none() {
            return Err(Error::NoActiveRequest);
        }

        if self.response != ResponseState::NotStarted {
            return Err(Error::ResponseState("response already started"));
        }

        Ok(())
    }

    async fn send_continue(&mut self) {
        let wanted = !self.continue_sent
            && self.response == ResponseState::NotStarted
            && self
                .state
                .active
                .as_ref()
                .is_some_and(Request::expects_continue);

        if !wanted {
            return;
        }

        self.continue_sent = true;

        if let Err(e) = self.write(CONTINUE).await {
            tracing::debug!(connection_id = %self.id, error = %e, "Failed to send 100 Continue");
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let io = self
            .io
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        io.write_all(data).await?;
        io.flush().await?;

        Ok(())
    }

    async fn release(&mut self) {
        self.state.clear();
        self.tokenizer = None;
        self.read_closed = true;

        if let Some(mut io) = self.io.take() {
            if let Err(e) = io.shutdown().await {
                tracing::trace!(connection_id = %self.id, error = %e, "Shutdown failed");
            }
            tracing::trace!(connection_id = %self.id, "Connection closed");
        }
    }
}

impl std::fmt::Debug for Http1Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Adapter")
            .field("id", &self.id)
            .field("queued", &self.state.pipeline.len())
            .field("active", &self.state.active.as_ref().map(Request::id))
            .field("upgraded", &self.upgraded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::upgrade_fn;

    fn state(upgrades: UpgradeRegistry) -> ParseState {
        ParseState {
            pipeline: Pipeline::new(),
            active: None,
            awaiting_chunk: false,
            pending_chunk: None,
            discard_body: false,
            upgrades: Arc::new(upgrades),
        }
    }

    fn feed(state: &mut ParseState, tokenizer: &mut HttparseTokenizer, data: &[u8]) {
        tokenizer.feed(data, state).unwrap();
    }

    #[test]
    fn body_goes_to_newest_request() {
        let mut tokenizer = HttparseTokenizer::default();
        let mut st = state(UpgradeRegistry::new());

        feed(&mut st, &mut tokenizer, b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        st.active = st.pipeline.dequeue();

        feed(&mut st, &mut tokenizer, b"POST /b HTTP/1.1\r\nContent-Length: 2\r\n\r\nxy");

        assert_eq!(st.active.as_ref().unwrap().body(), b"abc");
        assert_eq!(st.pipeline.head().unwrap().body(), b"xy");
        assert!(st.pipeline.head().unwrap().is_complete());
    }

    #[test]
    fn awaited_chunk_bypasses_the_buffer() {
        let mut tokenizer = HttparseTokenizer::default();
        let mut st = state(UpgradeRegistry::new());

        feed(&mut st, &mut tokenizer, b"POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\n");
        st.active = st.pipeline.dequeue();
        st.awaiting_chunk = true;

        feed(&mut st, &mut tokenizer, b"abc");

        assert_eq!(st.pending_chunk.as_deref(), Some(&b"abc"[..]));
        assert!(st.active.as_ref().unwrap().body().is_empty());
    }

    #[test]
    fn drained_body_is_dropped() {
        let mut tokenizer = HttparseTokenizer::default();
        let mut st = state(UpgradeRegistry::new());

        feed(&mut st, &mut tokenizer, b"POST / HTTP/1.1\r\nContent-Length: 8\r\n\r\nabc");
        st.active = st.pipeline.dequeue();
        st.discard_body = true;

        feed(&mut st, &mut tokenizer, b"defgh");

        let active = st.active.as_ref().unwrap();
        assert_eq!(active.body(), b"abc");
        assert!(active.is_complete());
    }

    #[test]
    fn discard_leaves_pipelined_bodies_alone() {
        let mut tokenizer = HttparseTokenizer::default();
        let mut st = state(UpgradeRegistry::new());

        feed(&mut st, &mut tokenizer, b"POST /a HTTP/1.1\r\nContent-Length: 1\r\n\r\n");
        st.active = st.pipeline.dequeue();
        st.discard_body = true;

        feed(&mut st, &mut tokenizer, b"xPOST /b HTTP/1.1\r\nContent-Length: 2\r\n\r\nyz");

        assert!(st.active.as_ref().unwrap().body().is_empty());
        assert_eq!(st.pipeline.head().unwrap().body(), b"yz");
    }

    #[test]
    fn pauses_only_on_resolvable_upgrade() {
        let registry =
            UpgradeRegistry::new().register("websocket", upgrade_fn(|_c, _h| async { Ok::<_, Error>(()) }));

        let mut tokenizer = HttparseTokenizer::default();
        let mut st = state(registry);
        feed(
            &mut st,
            &mut tokenizer,
            b"GET / HTTP/1.1\r\nUpgrade: irc\r\n\r\nGET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\nGET /x HTTP/1.1\r\n\r\n",
        );

        assert_eq!(st.pipeline.len(), 2);
        assert_eq!(&tokenizer.take_buffered()[..], b"GET /x HTTP/1.1\r\n\r\n");
    }
}
