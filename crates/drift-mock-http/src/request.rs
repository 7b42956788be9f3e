// SPDX-License-Identifier: MIT OR Apache-2.0
//! The synthetic client request and its driver.
//!
//! Lifecycle, in the exact order downstream libraries depend on:
//!
//! 1. construction buffers options and headers;
//! 2. the socket "connects" on the next turn of the loop: `socket`, then
//!    the socket's `connect` (and `secureConnect` on https);
//! 3. `write` buffers chunks until `end` marks the request finished;
//! 4. once connected *and* finished, playback begins: `finish`, then
//!    either a synthetic background response, an `error` on the next turn
//!    (oracle miss or reified recorded failure), or `response` followed by
//!    body chunks and the end-of-stream push;
//! 5. `close` is always the final event.

use crate::response::{CHUNK_SIZE, MockResponse};
use crate::socket::{MockSocket, SocketEvent, SocketShared};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use drift_oracle::{MockOracle, MockQuery};
use drift_schema::{FieldAnnotation, SchemaMerges};
use drift_taxonomy::ReifiedError;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::yield_now;
use tracing::debug;

// ---------------------------------------------------------------------------
// Options and context
// ---------------------------------------------------------------------------

/// Wire protocol of the synthetic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// Node-style scheme string stored on the input value (`"https:"`).
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http:",
            Self::Https => "https:",
        }
    }

    /// Default port for the protocol.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Request options, mirroring the client library's own option bag.
#[derive(Debug, Clone)]
pub struct MockRequestOptions {
    /// HTTP method.
    pub method: String,
    /// Wire protocol.
    pub protocol: Protocol,
    /// Target host.
    pub hostname: String,
    /// Target port; protocol default when `None`.
    pub port: Option<u16>,
    /// Request path (with query).
    pub path: String,
    /// Request headers; keys any case, values possibly multi-valued.
    pub headers: BTreeMap<String, Vec<String>>,
    /// `"user:password"` shorthand; collapses to a basic-auth header when
    /// no authorization header is present.
    pub auth: Option<String>,
}

impl MockRequestOptions {
    /// Options for `method host path` with everything else defaulted.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        hostname: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            protocol: Protocol::Http,
            hostname: hostname.into(),
            port: None,
            path: path.into(),
            headers: BTreeMap::new(),
            auth: None,
        }
    }

    /// Switch to https.
    #[must_use]
    pub fn https(mut self) -> Self {
        self.protocol = Protocol::Https;
        self
    }

    /// Add a single-valued header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), vec![value.into()]);
        self
    }
}

/// Replay context tying the request to its span and oracle.
pub struct MockRequestContext {
    /// Fingerprint template; the driver fills `input_value` at playback.
    pub query: MockQuery,
    /// Annotation side channel from the adapter (ignored headers etc).
    pub merges: SchemaMerges,
    /// The oracle resolving the recording.
    pub oracle: Arc<dyn MockOracle>,
}

/// How playback concluded; delivered to the completion hook so the adapter
/// can end its span.
#[derive(Debug, Clone)]
pub enum PlaybackOutcome {
    /// A recorded success was replayed.
    Success {
        /// Status code of the replayed response.
        status_code: u16,
        /// The full recorded output value.
        output: Value,
    },
    /// Background request: synthetic empty 200, no oracle consulted.
    Background,
    /// No recording matched.
    OracleMiss,
    /// A recorded failure was reified.
    Failed(ReifiedError),
    /// The host aborted or destroyed the request.
    Aborted,
}

/// Hook invoked exactly once when playback concludes.
pub type CompletionHook = Box<dyn FnOnce(PlaybackOutcome) + Send>;

/// Events emitted by the mock request, in emission order.
#[derive(Debug)]
pub enum RequestEvent {
    /// The socket was assigned (retrieve it via
    /// [`MockClientRequest::take_socket`]).
    Socket,
    /// The server agreed to continue (only after `expect: 100-continue`).
    Continue,
    /// Buffered writes were flushed on connect.
    Drain,
    /// The request body was fully handed off.
    Finish,
    /// The response head arrived.
    Response(MockResponse),
    /// The request failed; shaped like the library's own errors.
    Error(ReifiedError),
    /// A configured timeout elapsed. Does not end the request.
    Timeout,
    /// The host aborted the request.
    Abort,
    /// Terminal event.
    Close,
}

/// Error returned for writes after end/destroy.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Mirrors `ERR_STREAM_WRITE_AFTER_END`.
    #[error("write after end (ERR_STREAM_WRITE_AFTER_END)")]
    WriteAfterEnd,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RequestState {
    buffered: Vec<u8>,
    finished: bool,
    destroyed: bool,
    completed: bool,
    connected: bool,
    buffered_before_connect: bool,
}

struct RequestShared {
    state: Mutex<RequestState>,
    headers: Mutex<BTreeMap<String, String>>,
    events: mpsc::UnboundedSender<RequestEvent>,
    end_notify: Notify,
    on_complete: Mutex<Option<CompletionHook>>,
}

impl RequestShared {
    fn complete(&self, outcome: PlaybackOutcome) {
        {
            let mut state = self.state.lock().expect("request state lock");
            if state.completed {
                return;
            }
            state.completed = true;
        }
        if let Some(hook) = self.on_complete.lock().expect("hook lock").take() {
            hook(outcome);
        }
    }
}

// ---------------------------------------------------------------------------
// MockClientRequest
// ---------------------------------------------------------------------------

/// The synthetic outbound request handed back to the host.
pub struct MockClientRequest {
    shared: Arc<RequestShared>,
    socket: Option<MockSocket>,
    socket_shared: Arc<SocketShared>,
}

impl MockClientRequest {
    /// Build the request and start its driver.
    ///
    /// `context: None` marks a background request (no inbound trace): it
    /// plays a synthetic empty `200 OK` without consulting any oracle.
    /// The returned receiver yields [`RequestEvent`]s in lifecycle order.
    #[must_use]
    pub fn new(
        options: MockRequestOptions,
        context: Option<MockRequestContext>,
        on_complete: Option<CompletionHook>,
    ) -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let headers = normalize_headers(&options);
        let port = options.port.unwrap_or_else(|| options.protocol.default_port());
        let socket = MockSocket::new(
            options.protocol == Protocol::Https,
            options.hostname.clone(),
            port,
        );
        let socket_shared = socket.shared();

        let shared = Arc::new(RequestShared {
            state: Mutex::new(RequestState::default()),
            headers: Mutex::new(headers),
            events: events_tx,
            end_notify: Notify::new(),
            on_complete: Mutex::new(on_complete),
        });

        tokio::spawn(drive(
            Arc::clone(&shared),
            Arc::clone(&socket_shared),
            options,
            context,
        ));

        (
            Self {
                shared,
                socket: Some(socket),
                socket_shared,
            },
            events_rx,
        )
    }

    /// Take the socket handle announced by [`RequestEvent::Socket`].
    pub fn take_socket(&mut self) -> Option<MockSocket> {
        self.socket.take()
    }

    /// Buffer a body chunk. Mirrors the library's backpressure-free path:
    /// always reports the buffer as writable.
    pub fn write(&self, chunk: &[u8]) -> Result<bool, WriteError> {
        let mut state = self.shared.state.lock().expect("request state lock");
        if state.destroyed || state.finished {
            return Err(WriteError::WriteAfterEnd);
        }
        state.buffered.extend_from_slice(chunk);
        if !state.connected {
            state.buffered_before_connect = true;
        }
        Ok(true)
    }

    /// Mark the body complete, optionally appending a final chunk.
    pub fn end(&self, chunk: Option<&[u8]>) {
        {
            let mut state = self.shared.state.lock().expect("request state lock");
            if state.destroyed || state.finished {
                return;
            }
            if let Some(chunk) = chunk {
                state.buffered.extend_from_slice(chunk);
            }
            state.finished = true;
        }
        self.shared.end_notify.notify_one();
    }

    /// Set a header. Ignored once the request has finished.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let state = self.shared.state.lock().expect("request state lock");
        if state.finished || state.destroyed {
            debug!("set_header after end; ignored");
            return;
        }
        drop(state);
        self.shared
            .headers
            .lock()
            .expect("headers lock")
            .insert(name.into().to_ascii_lowercase(), value.into());
    }

    /// Get a header (case-insensitive).
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.shared
            .headers
            .lock()
            .expect("headers lock")
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Register a timeout: after `duration`, a `timeout` event fires on
    /// the request and the socket. Timeouts never end the request.
    pub fn set_timeout(&self, duration: Duration) {
        let shared = Arc::clone(&self.shared);
        let socket_shared = Arc::clone(&self.socket_shared);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let state = shared.state.lock().expect("request state lock");
            if state.completed || state.destroyed {
                return;
            }
            drop(state);
            let _ = shared.events.send(RequestEvent::Timeout);
            let _ = socket_shared.events.send(SocketEvent::Timeout);
        });
    }

    /// Abort the request: `abort`, then `close`, then socket teardown.
    pub fn abort(&self) {
        self.tear_down(true);
    }

    /// Destroy the request: `close` and socket teardown, no `abort` event.
    pub fn destroy(&self) {
        self.tear_down(false);
    }

    /// Whether the request has been destroyed or aborted.
    #[must_use]
    pub fn destroyed(&self) -> bool {
        self.shared.state.lock().expect("request state lock").destroyed
    }

    fn tear_down(&self, emit_abort: bool) {
        {
            let mut state = self.shared.state.lock().expect("request state lock");
            if state.destroyed || state.completed {
                return;
            }
            state.destroyed = true;
        }
        if emit_abort {
            let _ = self.shared.events.send(RequestEvent::Abort);
        }
        let _ = self.shared.events.send(RequestEvent::Close);
        if !self
            .socket_shared
            .destroyed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            let _ = self.socket_shared.events.send(SocketEvent::Close);
        }
        self.shared.complete(PlaybackOutcome::Aborted);
        self.shared.end_notify.notify_one();
    }
}

fn normalize_headers(options: &MockRequestOptions) -> BTreeMap<String, String> {
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();
    for (name, values) in &options.headers {
        let key = name.to_ascii_lowercase();
        let joined = values.join(", ");
        normalized
            .entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&joined);
            })
            .or_insert(joined);
    }
    if let Some(auth) = &options.auth {
        normalized
            .entry("authorization".into())
            .or_insert_with(|| format!("Basic {}", BASE64.encode(auth.as_bytes())));
    }
    normalized
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive(
    shared: Arc<RequestShared>,
    socket: Arc<SocketShared>,
    options: MockRequestOptions,
    context: Option<MockRequestContext>,
) {
    // Connection is scheduled, never synchronous with construction.
    yield_now().await;

    let flush_buffered;
    {
        let mut state = shared.state.lock().expect("request state lock");
        if state.destroyed {
            return;
        }
        state.connected = true;
        flush_buffered = state.buffered_before_connect;
    }
    let _ = shared.events.send(RequestEvent::Socket);
    let _ = socket.events.send(SocketEvent::Connect);
    if options.protocol == Protocol::Https {
        let _ = socket.events.send(SocketEvent::SecureConnect);
    }
    let expects_continue = shared
        .headers
        .lock()
        .expect("headers lock")
        .get("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
    if expects_continue {
        let _ = shared.events.send(RequestEvent::Continue);
    }
    if flush_buffered {
        let _ = shared.events.send(RequestEvent::Drain);
    }

    // Wait for end(); notify_one keeps a permit, so an end that raced the
    // connect phase is not lost.
    loop {
        {
            let state = shared.state.lock().expect("request state lock");
            if state.destroyed {
                return;
            }
            if state.finished {
                break;
            }
        }
        shared.end_notify.notified().await;
    }

    let _ = shared.events.send(RequestEvent::Finish);
    yield_now().await;

    match context {
        None => play_background(&shared).await,
        Some(context) => play_recorded(&shared, &options, context).await,
    }

    // tear_down already closed everything when the host aborted mid-flight.
    if shared.state.lock().expect("request state lock").destroyed {
        return;
    }
    let _ = shared.events.send(RequestEvent::Close);
    let _ = socket.events.send(SocketEvent::Close);
}

async fn play_background(shared: &Arc<RequestShared>) {
    debug!("background http request; synthetic 200 with empty body");
    let (body_tx, body_rx) = mpsc::unbounded_channel();
    drop(body_tx);
    let response = MockResponse::new(200, "OK".into(), BTreeMap::new(), body_rx);
    let _ = shared.events.send(RequestEvent::Response(response));
    shared.complete(PlaybackOutcome::Background);
}

async fn play_recorded(
    shared: &Arc<RequestShared>,
    options: &MockRequestOptions,
    context: MockRequestContext,
) {
    let headers = shared.headers.lock().expect("headers lock").clone();
    let body = {
        let state = shared.state.lock().expect("request state lock");
        state.buffered.clone()
    };

    let mut input = json!({
        "method": options.method,
        "hostname": options.hostname,
        "path": options.path,
        "protocol": options.protocol.scheme(),
        "headers": headers,
        "bodySize": body.len(),
    });
    if let Some(port) = options.port {
        input["port"] = json!(port);
    }
    let mut merges = context.merges.clone();
    if !body.is_empty() {
        input["body"] = json!(BASE64.encode(&body));
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".into());
        merges = merges.with("body", FieldAnnotation::base64(content_type));
    }

    let mut query = context.query;
    query.input_value = input;

    let resolved = context.oracle.find_mock_response(&query, Some(&merges)).await;
    // An abort that raced the lookup wins: the result is discarded.
    if shared.state.lock().expect("request state lock").destroyed {
        return;
    }

    match resolved {
        None => {
            yield_now().await;
            let error = ReifiedError::capture(
                "Error",
                format!(
                    "no recorded response for {} {}{}",
                    options.method, options.hostname, options.path
                ),
            );
            let _ = shared.events.send(RequestEvent::Error(error));
            shared.complete(PlaybackOutcome::OracleMiss);
        }
        Some(hit) => match recorded_error(&hit.result) {
            Some(reified) => {
                yield_now().await;
                let _ = shared.events.send(RequestEvent::Error(reified.clone()));
                shared.complete(PlaybackOutcome::Failed(reified));
            }
            None => play_success(shared, hit.result).await,
        },
    }
}

async fn play_success(shared: &Arc<RequestShared>, output: Value) {
    let status_code = output
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(200);
    let status_message = output
        .get("statusMessage")
        .and_then(Value::as_str)
        .unwrap_or("OK")
        .to_string();

    let mut headers = BTreeMap::new();
    if let Some(Value::Object(recorded)) = output.get("headers") {
        for (name, value) in recorded {
            let key = name.to_ascii_lowercase();
            // The stored body is uncompressed; a surviving content-encoding
            // header would make clients try to decompress plain bytes.
            if key == "content-encoding" {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            headers.insert(key, rendered);
        }
    }

    let body = output
        .get("body")
        .and_then(Value::as_str)
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .unwrap_or_default();

    let (body_tx, body_rx) = mpsc::unbounded_channel();
    let response = MockResponse::new(status_code, status_message, headers, body_rx);
    let _ = shared.events.send(RequestEvent::Response(response));
    for chunk in body.chunks(CHUNK_SIZE) {
        let _ = body_tx.send(Bytes::copy_from_slice(chunk));
    }
    drop(body_tx);

    shared.complete(PlaybackOutcome::Success {
        status_code,
        output,
    });
}

/// Recognize a recorded failure in either stored shape: a reified error
/// record, or the wire form `{errorName, errorMessage}`.
fn recorded_error(output: &Value) -> Option<ReifiedError> {
    if let Some(reified) = ReifiedError::from_output_value(output) {
        return Some(reified);
    }
    let name = output.get("errorName")?.as_str()?;
    let message = output
        .get("errorMessage")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(ReifiedError::capture(name, message))
}
