//! Rate-limit aware request queue shared by every outbound API client.
//!
//! Requests are grouped into buckets by their endpoint *route* (the template
//! with placeholders unbound). Within a bucket at most one request is on the
//! wire at a time and requests leave in arrival order. A bucket whose
//! reported `remaining` count hits zero holds its queue until the reported
//! reset instant; a global limit reported by the server holds every bucket.
//!
//! A 429 never reaches the caller directly: the request goes back to the
//! front of its bucket and is retried after the advertised delay, up to
//! [`GovernorConfig::max_retries`] times.
//!
//! ```ignore
//! let gov = Governor::new(config, transport);
//! let sets: SetsResponse = gov
//!     .request_json(Request::get(Endpoint::new("sets").query("name", "khans")))
//!     .await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::ratelimit::RateLimitInfo;
use crate::transport::{Transport, TransportFailure, TransportRequest, TransportResponse};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const RATELIMIT_PRECISION: HeaderName = HeaderName::from_static("x-ratelimit-precision");

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Every endpoint is resolved against this.
    pub base_url: Url,
    pub user_agent: String,
    /// Sent as the `Authorization` header when set.
    pub authorization: Option<String>,
    /// 429 retries before the request fails with status 429.
    pub max_retries: u32,
    /// Wait used when a 429 carries no usable delay.
    pub default_backoff: Duration,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
}

impl GovernorConfig {
    pub fn new(base_url: Url, user_agent: impl Into<String>) -> Self {
        Self {
            base_url,
            user_agent: user_agent.into(),
            authorization: None,
            max_retries: DEFAULT_MAX_RETRIES,
            default_backoff: DEFAULT_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// An encoded request body and its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Body {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HttpError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| HttpError::Configuration(format!("unserializable body: {}", e)))?;
        Ok(Self {
            content_type: "application/json".to_string(),
            bytes,
        })
    }

    pub fn multipart(boundary: &str, bytes: Vec<u8>) -> Self {
        Self {
            content_type: format!("multipart/form-data; boundary={}", boundary),
            bytes,
        }
    }
}

/// A request as callers describe it, before defaults are applied.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub endpoint: Endpoint,
    pub body: Option<Body>,
    /// Overrides for the governor's default headers.
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, endpoint: Endpoint) -> Self {
        Self {
            method,
            endpoint,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(endpoint: Endpoint) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: Endpoint) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn patch(endpoint: Endpoint) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, HttpError> {
        Ok(self.body(Body::json(value)?))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct Response {
    pub route: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpError::decoding(&self.route, e, &self.body))
    }
}

// ---------------------------------------------------------------------------
// Response future
// ---------------------------------------------------------------------------

type Reply = Result<Response, HttpError>;

/// Resolves exactly once with the outcome of an enqueued request.
///
/// Dropping it does not cancel the request.
#[derive(Debug)]
pub struct ResponseFuture {
    state: FutureState,
}

#[derive(Debug)]
enum FutureState {
    Ready(Option<Reply>),
    Waiting(oneshot::Receiver<Reply>),
}

impl ResponseFuture {
    fn ready(reply: Reply) -> Self {
        Self {
            state: FutureState::Ready(Some(reply)),
        }
    }

    /// True when the outcome was decided at enqueue time.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, FutureState::Ready(Some(_)))
    }
}

impl Future for ResponseFuture {
    type Output = Reply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Ready(reply) => Poll::Ready(reply.take().unwrap_or_else(|| {
                Err(HttpError::Configuration(
                    "response future polled after completion".into(),
                ))
            })),
            FutureState::Waiting(rx) => Pin::new(rx).poll(cx).map(|reply| {
                reply.unwrap_or_else(|_| {
                    Err(HttpError::Configuration(
                        "governor shut down before the request retired".into(),
                    ))
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub queued: usize,
    pub in_flight: bool,
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub reset_at: Option<Instant>,
    /// Bucket id reported by the server, if any.
    pub bucket_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSnapshot {
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Queued {
    request: TransportRequest,
    reply: oneshot::Sender<Reply>,
    /// 429s received so far.
    attempts: u32,
}

#[derive(Default)]
struct Bucket {
    queue: VecDeque<Queued>,
    in_flight: bool,
    remaining: Option<u32>,
    limit: Option<u32>,
    reset_at: Option<Instant>,
    bucket_id: Option<String>,
    timer_armed: bool,
}

impl Bucket {
    /// `Some(instant)` while the bucket must wait. Refills once the reset
    /// instant has passed.
    fn blocked_until(&mut self, now: Instant) -> Option<Instant> {
        if self.remaining != Some(0) {
            return None;
        }
        match self.reset_at {
            Some(reset) if reset > now => Some(reset),
            _ => {
                self.remaining = self.limit.filter(|l| *l > 0);
                self.reset_at = None;
                None
            }
        }
    }

    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            queued: self.queue.len(),
            in_flight: self.in_flight,
            remaining: self.remaining,
            limit: self.limit,
            reset_at: self.reset_at,
            bucket_id: self.bucket_id.clone(),
        }
    }
}

#[derive(Default)]
struct GlobalLimit {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    timer_armed: bool,
}

impl GlobalLimit {
    fn blocked_until(&mut self, now: Instant) -> Option<Instant> {
        if self.remaining != Some(0) {
            return None;
        }
        match self.reset_at {
            Some(reset) if reset > now => Some(reset),
            _ => {
                self.remaining = None;
                self.reset_at = None;
                None
            }
        }
    }
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    global: GlobalLimit,
}

struct Inner {
    config: GovernorConfig,
    transport: Option<Arc<dyn Transport>>,
    state: Mutex<State>,
}

/// Which limiter a reset timer belongs to.
enum Wake {
    Global,
    Bucket(String),
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Per-route rate-limited request queue.
///
/// Cheap to clone (internals are behind `Arc`); every clone shares the same
/// buckets.
#[derive(Clone)]
pub struct Governor {
    inner: Arc<Inner>,
}

impl Governor {
    pub fn new(config: GovernorConfig, transport: Arc<dyn Transport>) -> Self {
        Self::build(config, Some(transport))
    }

    /// A governor that rejects every request with a configuration error.
    pub fn without_transport(config: GovernorConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: GovernorConfig, transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.inner.config
    }

    /// Queue `request` on its route's bucket.
    ///
    /// Must be called from within a tokio runtime unless the governor has no
    /// transport, in which case the returned future is already resolved with
    /// [`HttpError::Configuration`] and no bucket is created.
    pub fn enqueue(&self, request: Request) -> ResponseFuture {
        if self.inner.transport.is_none() {
            return ResponseFuture::ready(Err(HttpError::Configuration(
                "no transport configured".into(),
            )));
        }

        let route = request.endpoint.route().to_string();
        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(err) => return ResponseFuture::ready(Err(err)),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            let bucket = state.buckets.entry(route.clone()).or_default();
            bucket.queue.push_back(Queued {
                request: prepared,
                reply: tx,
                attempts: 0,
            });
            debug!(route = %route, queued = bucket.queue.len(), "request queued");
        }

        let governor = self.clone();
        tokio::spawn(async move { governor.pump() });

        ResponseFuture {
            state: FutureState::Waiting(rx),
        }
    }

    /// Enqueue and wait for the raw response.
    pub async fn request(&self, request: Request) -> Result<Response, HttpError> {
        self.enqueue(request).await
    }

    /// Enqueue, wait, and decode the body as JSON.
    pub async fn request_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, HttpError> {
        self.enqueue(request).await?.json()
    }

    pub fn bucket(&self, route: &str) -> Option<BucketSnapshot> {
        let state = self.inner.state.lock();
        state.buckets.get(route).map(Bucket::snapshot)
    }

    pub fn buckets(&self) -> HashMap<String, BucketSnapshot> {
        let state = self.inner.state.lock();
        state
            .buckets
            .iter()
            .map(|(route, bucket)| (route.clone(), bucket.snapshot()))
            .collect()
    }

    pub fn global(&self) -> GlobalSnapshot {
        let state = self.inner.state.lock();
        GlobalSnapshot {
            remaining: state.global.remaining,
            reset_at: state.global.reset_at,
        }
    }

    // ------------------------------------------------------------------
    // Request preparation
    // ------------------------------------------------------------------

    fn prepare(&self, request: Request) -> Result<TransportRequest, HttpError> {
        let config = &self.inner.config;
        let url = request.endpoint.url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(RATELIMIT_PRECISION, HeaderValue::from_static("millisecond"));
        if let Some(auth) = &config.authorization {
            let mut value = header_value(auth)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let body = match request.body {
            Some(body) => {
                headers.insert(CONTENT_TYPE, header_value(&body.content_type)?);
                Some(body.bytes)
            }
            None => None,
        };

        // Caller headers replace defaults of the same name.
        headers.extend(request.headers);

        Ok(TransportRequest {
            method: request.method,
            url,
            headers,
            body,
        })
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatch the head of every bucket that may send, and arm reset timers
    /// for the ones that may not.
    fn pump(&self) {
        let Some(transport) = self.inner.transport.clone() else {
            return;
        };

        let now = Instant::now();
        let mut dispatch = Vec::new();
        let mut wakes = Vec::new();

        {
            let mut guard = self.inner.state.lock();
            let State { buckets, global } = &mut *guard;

            for (route, bucket) in buckets.iter_mut() {
                if bucket.in_flight || bucket.queue.is_empty() {
                    continue;
                }

                if let Some(until) = global.blocked_until(now) {
                    if !global.timer_armed {
                        global.timer_armed = true;
                        wakes.push((Wake::Global, until));
                    }
                    break;
                }

                if let Some(until) = bucket.blocked_until(now) {
                    if !bucket.timer_armed {
                        bucket.timer_armed = true;
                        wakes.push((Wake::Bucket(route.clone()), until));
                    }
                    continue;
                }

                let Some(queued) = bucket.queue.pop_front() else {
                    continue;
                };
                bucket.in_flight = true;
                if let Some(n) = bucket.remaining.as_mut() {
                    *n = n.saturating_sub(1);
                }
                if let Some(n) = global.remaining.as_mut() {
                    *n = n.saturating_sub(1);
                }
                dispatch.push((route.clone(), queued));
            }
        }

        for (wake, until) in wakes {
            self.arm_timer(wake, until);
        }

        for (route, queued) in dispatch {
            debug!(
                route = %route,
                method = %queued.request.method,
                attempt = queued.attempts,
                "dispatching request"
            );
            let governor = self.clone();
            let transport = transport.clone();
            tokio::spawn(async move { governor.execute(route, queued, transport).await });
        }
    }

    fn arm_timer(&self, wake: Wake, until: Instant) {
        let governor = self.clone();
        debug!(
            delay_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            global = matches!(wake, Wake::Global),
            "rate-limit backoff"
        );
        tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            {
                let mut state = governor.inner.state.lock();
                match &wake {
                    Wake::Global => state.global.timer_armed = false,
                    Wake::Bucket(route) => {
                        if let Some(bucket) = state.buckets.get_mut(route) {
                            bucket.timer_armed = false;
                        }
                    }
                }
            }
            governor.pump();
        });
    }

    async fn execute(self, route: String, mut queued: Queued, transport: Arc<dyn Transport>) {
        // On its own task so a panicking transport still retires the request.
        let request = queued.request.clone();
        let result = match tokio::spawn(async move { transport.send(request).await }).await {
            Ok(result) => result,
            Err(join) => Err(TransportFailure::new(format!("transport task failed: {}", join))),
        };

        let retired = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let settled = panic::catch_unwind(AssertUnwindSafe(|| {
                self.settle(state, &route, &mut queued, result)
            }));
            match settled {
                Ok(Some(outcome)) => Some((queued.reply, outcome)),
                Ok(None) => {
                    let bucket = state.buckets.entry(route.clone()).or_default();
                    bucket.queue.push_front(queued);
                    None
                }
                Err(_) => {
                    error!(route = %route, "panic while settling response");
                    if let Some(bucket) = state.buckets.get_mut(&route) {
                        bucket.in_flight = false;
                    }
                    let err = HttpError::Transport {
                        route: route.clone(),
                        message: "internal error while settling the response".into(),
                    };
                    Some((queued.reply, Err(err)))
                }
            }
        };

        if let Some((reply, outcome)) = retired {
            if let Err(err) = &outcome {
                warn!(route = %route, error = %err, "request failed");
            }
            // The caller may have dropped the future.
            let _ = reply.send(outcome);
        }

        self.pump();
    }

    /// Fold a transport outcome into the bucket. Returns the outcome to hand
    /// back, or `None` when the request must go back on the queue.
    fn settle(
        &self,
        state: &mut State,
        route: &str,
        queued: &mut Queued,
        result: Result<TransportResponse, TransportFailure>,
    ) -> Option<Reply> {
        let config = &self.inner.config;
        let now = Instant::now();
        let State { buckets, global } = state;
        let bucket = buckets.entry(route.to_string()).or_default();
        bucket.in_flight = false;

        let resp = match result {
            Ok(resp) => resp,
            Err(failure) => {
                return Some(Err(HttpError::Transport {
                    route: route.to_string(),
                    message: failure.to_string(),
                }));
            }
        };

        let mut info = RateLimitInfo::from_headers(&resp.headers);
        if resp.status == StatusCode::TOO_MANY_REQUESTS {
            info.merge_body(&resp.body);
        }

        if info.limit.is_some() {
            bucket.limit = info.limit;
        }
        if info.remaining.is_some() {
            bucket.remaining = info.remaining;
        }
        if let Some(reset_after) = info.reset_after {
            bucket.reset_at = Some(now + reset_after.min(config.max_backoff));
        }
        if info.bucket.is_some() {
            bucket.bucket_id = info.bucket.clone();
        }
        if bucket.remaining == Some(0) && bucket.reset_at.map_or(true, |r| r <= now) {
            bucket.reset_at = Some(now + config.default_backoff);
        }

        if resp.status == StatusCode::TOO_MANY_REQUESTS {
            let delay = info
                .delay()
                .unwrap_or(config.default_backoff)
                .min(config.max_backoff);
            queued.attempts += 1;
            warn!(
                route,
                attempt = queued.attempts,
                delay_ms = delay.as_millis() as u64,
                global = info.global,
                "rate limited, backing off"
            );

            bucket.remaining = Some(0);
            bucket.reset_at = Some(now + delay);
            if info.global {
                global.remaining = Some(0);
                global.reset_at = Some(now + delay);
            }

            if queued.attempts > config.max_retries {
                return Some(Err(HttpError::http(route, resp.status, &resp.body)));
            }
            return None;
        }

        let outcome = if resp.status.is_success() {
            Ok(Response {
                route: route.to_string(),
                status: resp.status,
                headers: resp.headers,
                body: resp.body,
            })
        } else {
            Err(HttpError::http(route, resp.status, &resp.body))
        };
        Some(outcome)
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("has_transport", &self.inner.transport.is_some())
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, HttpError> {
    HeaderValue::from_str(value)
        .map_err(|e| HttpError::Configuration(format!("invalid header value: {}", e)))
}
