use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::header::{
    Entry, HeaderMap, HeaderValue, ACCEPT, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
    LOCATION, REFERER, TRANSFER_ENCODING, USER_AGENT,
};
use http::StatusCode;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, trace};
use pin_project_lite::pin_project;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::body::Body;
use super::request::{Request, RequestBuilder};
use super::response::Response;
use crate::config::{RequestConfig, RequestTimeout};
use crate::error;
use crate::into_url::try_uri;
use crate::redirect::{self, remove_sensitive_headers, Attempt, Decision, Dispatcher};
use crate::{IntoUrl, Method, Url};

type HyperClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

/// An asynchronous `Client` to make Requests with.
///
/// The Client has various configuration values to tweak, but the defaults
/// are set to what is usually the most commonly desired value. To configure a
/// `Client`, use `Client::builder()`.
///
/// The `Client` holds a connection pool internally, so it is advised that
/// you create one and **reuse** it.
///
/// You do **not** have to wrap the `Client` in an [`Rc`] or [`Arc`] to **reuse** it,
/// because it already uses an [`Arc`] internally.
///
/// Only `http` URLs are supported; the connector does not speak TLS.
///
/// [`Rc`]: std::rc::Rc
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

/// A `ClientBuilder` can be used to create a `Client` with custom configuration.
#[must_use]
pub struct ClientBuilder {
    config: Config,
}

struct Config {
    // NOTE: When adding a new field, update `fmt::Debug for ClientBuilder`
    error: Option<crate::Error>,
    headers: HeaderMap,
    redirect_policy: Option<redirect::Policy>,
    max_redirects: usize,
    referer: bool,
    sanitize_replacements: bool,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    nodelay: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Constructs a new `ClientBuilder`.
    ///
    /// This is the same as `Client::builder()`.
    pub fn new() -> ClientBuilder {
        let mut headers: HeaderMap<HeaderValue> = HeaderMap::with_capacity(2);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        ClientBuilder {
            config: Config {
                error: None,
                headers,
                redirect_policy: None,
                max_redirects: 10,
                referer: true,
                sanitize_replacements: false,
                timeout: None,
                connect_timeout: None,
                nodelay: true,
                pool_idle_timeout: Some(Duration::from_secs(90)),
                pool_max_idle_per_host: usize::MAX,
            },
        }
    }

    /// Returns a `Client` that uses this `ClientBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if an earlier builder call was given an invalid
    /// value, such as a user agent that is not a valid header value.
    pub fn build(self) -> crate::Result<Client> {
        let config = self.config;

        if let Some(err) = config.error {
            return Err(err);
        }

        let mut connector = HttpConnector::new();
        connector.set_nodelay(config.nodelay);
        connector.set_connect_timeout(config.connect_timeout);

        let hyper = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(connector);

        Ok(Client {
            inner: Arc::new(ClientRef {
                headers: config.headers,
                hyper,
                dispatcher: Dispatcher::new(config.redirect_policy),
                max_redirects: config.max_redirects,
                referer: config.referer,
                sanitize_replacements: config.sanitize_replacements,
                request_timeout: RequestConfig::new(config.timeout),
            }),
        })
    }

    // Higher-level options

    /// Sets the `User-Agent` header to be used by this client.
    ///
    /// # Example
    ///
    /// ```rust
    /// # async fn doc() -> Result<(), waypoint::Error> {
    /// // Name your user agent after your app?
    /// static APP_USER_AGENT: &str = concat!(
    ///     env!("CARGO_PKG_NAME"),
    ///     "/",
    ///     env!("CARGO_PKG_VERSION"),
    /// );
    ///
    /// let client = waypoint::Client::builder()
    ///     .user_agent(APP_USER_AGENT)
    ///     .build()?;
    /// let res = client.get("http://www.rust-lang.org").send().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn user_agent<V>(mut self, value: V) -> ClientBuilder
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        match value.try_into() {
            Ok(value) => {
                self.config.headers.insert(USER_AGENT, value);
            }
            Err(e) => {
                self.config.error = Some(error::builder(e.into()));
            }
        };
        self
    }

    /// Sets the default headers for every request.
    ///
    /// A header already set on a request, including one set by a redirect
    /// policy on a replacement request, is never overwritten.
    pub fn default_headers(mut self, headers: HeaderMap) -> ClientBuilder {
        for (key, value) in headers.iter() {
            self.config.headers.insert(key, value.clone());
        }
        self
    }

    // Redirect options

    /// Set a [`redirect::Policy`] for every request made by this client.
    ///
    /// A policy set with
    /// [`RequestBuilder::redirect`](crate::RequestBuilder::redirect) takes
    /// precedence. Without either, redirects the transport considers
    /// valid are followed.
    pub fn redirect(mut self, policy: redirect::Policy) -> ClientBuilder {
        self.config.redirect_policy = Some(policy);
        self
    }

    /// Set the maximum number of redirects followed in one request chain.
    ///
    /// Once that many redirects have been followed, the next redirect fails
    /// the request with an error for which
    /// [`Error::is_redirect`](crate::Error::is_redirect) is true, without
    /// calling a `modify` policy. With [`redirect::Policy::none`] the
    /// redirect response is still returned. Stopping the chain never counts
    /// against the limit.
    ///
    /// Default is 10.
    pub fn max_redirects(mut self, max: usize) -> ClientBuilder {
        self.config.max_redirects = max;
        self
    }

    /// Enable or disable automatic setting of the `Referer` header.
    ///
    /// Default is `true`.
    pub fn referer(mut self, enable: bool) -> ClientBuilder {
        self.config.referer = enable;
        self
    }

    /// Strip sensitive headers from requests returned by a redirect policy.
    ///
    /// Requests the client proposes always lose `Authorization`, `Cookie`
    /// and the other credential headers when the redirect changes host or
    /// port. A request returned by a `modify` policy is sent exactly as
    /// returned, unless this is enabled, in which case the same stripping
    /// is applied relative to the URL that answered with the redirect.
    ///
    /// Default is `false`.
    pub fn redirect_sanitize_replacements(mut self, enable: bool) -> ClientBuilder {
        self.config.sanitize_replacements = enable;
        self
    }

    // Timeout options

    /// Enables a timeout for each network hop of a request.
    ///
    /// The timeout is applied from when a hop starts connecting until its
    /// response headers have been received. Time spent in a redirect policy
    /// is not counted.
    ///
    /// Default is no timeout.
    pub fn timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set a timeout for only the connect phase of a `Client`.
    ///
    /// Default is `None`.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.config.connect_timeout = Some(timeout);
        self
    }

    // TCP options

    /// Set whether sockets have `TCP_NODELAY` enabled.
    ///
    /// Default is `true`.
    pub fn tcp_nodelay(mut self, enabled: bool) -> ClientBuilder {
        self.config.nodelay = enabled;
        self
    }

    // Pool options

    /// Set an optional timeout for idle sockets being kept-alive.
    ///
    /// Pass `None` to disable timeout.
    ///
    /// Default is 90 seconds.
    pub fn pool_idle_timeout<D>(mut self, val: D) -> ClientBuilder
    where
        D: Into<Option<Duration>>,
    {
        self.config.pool_idle_timeout = val.into();
        self
    }

    /// Sets the maximum idle connection per host allowed in the pool.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> ClientBuilder {
        self.config.pool_max_idle_per_host = max;
        self
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Constructs a new `Client`.
    ///
    /// # Panics
    ///
    /// This method panics if the client cannot be built. Use
    /// `Client::builder()` if you wish to handle the failure as an `Error`
    /// instead of panicking.
    pub fn new() -> Client {
        ClientBuilder::new().build().expect("Client::new()")
    }

    /// Creates a `ClientBuilder` to configure a `Client`.
    ///
    /// This is the same as `ClientBuilder::new()`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Convenience method to make a `GET` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Convenience method to make a `POST` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Convenience method to make a `PUT` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Convenience method to make a `PATCH` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn patch<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Convenience method to make a `DELETE` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Convenience method to make a `HEAD` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a `Request` with the `Method` and `Url`.
    ///
    /// Returns a `RequestBuilder`, which will allow setting headers and
    /// the request body before sending.
    ///
    /// # Errors
    ///
    /// This method fails whenever the supplied `Url` cannot be parsed.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        let req = url.into_url().map(move |url| Request::new(method, url));
        RequestBuilder::new(self.clone(), req)
    }

    /// Executes a `Request`.
    ///
    /// A `Request` can be built manually with `Request::new()` or obtained
    /// from a RequestBuilder with `RequestBuilder::build()`.
    ///
    /// You should prefer to use the `RequestBuilder` and
    /// `RequestBuilder::send()`.
    ///
    /// # Errors
    ///
    /// This method fails if there was an error while sending request,
    /// the redirect limit was exhausted, a redirect policy failed, or the
    /// request was canceled.
    pub fn execute(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Response, crate::Error>> {
        self.execute_request(request)
    }

    pub(super) fn execute_request(&self, req: Request) -> Pending {
        // plain TCP only, there is no TLS connector
        if req.url().scheme() != "http" {
            return Pending::new_err(error::url_bad_scheme(req.url().clone()));
        }

        if let Err(err) = try_uri(req.url()) {
            return Pending::new_err(err);
        }

        let client = self.inner.clone();
        Pending {
            inner: PendingInner::Request(Box::pin(client.chain(req))),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Client");
        self.inner.fmt_fields(&mut builder);
        builder.finish()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("ClientBuilder");
        self.config.fmt_fields(&mut builder);
        builder.finish()
    }
}

impl Config {
    fn fmt_fields(&self, f: &mut fmt::DebugStruct<'_, '_>) {
        // Instead of deriving Debug, only print fields when their output
        // would provide relevant or interesting data.

        f.field("default_headers", &self.headers);

        if let Some(ref policy) = self.redirect_policy {
            f.field("redirect_policy", policy);
        }

        f.field("max_redirects", &self.max_redirects);

        if !self.referer {
            f.field("referer", &false);
        }

        if self.sanitize_replacements {
            f.field("redirect_sanitize_replacements", &true);
        }

        if let Some(ref d) = self.timeout {
            f.field("timeout", d);
        }

        if let Some(ref d) = self.connect_timeout {
            f.field("connect_timeout", d);
        }

        if !self.nodelay {
            f.field("tcp_nodelay", &false);
        }

        f.field("pool_idle_timeout", &self.pool_idle_timeout);
        f.field("pool_max_idle_per_host", &self.pool_max_idle_per_host);

        if let Some(ref err) = self.error {
            f.field("error", err);
        }
    }
}

struct ClientRef {
    headers: HeaderMap,
    hyper: HyperClient,
    dispatcher: Dispatcher,
    max_redirects: usize,
    referer: bool,
    sanitize_replacements: bool,
    request_timeout: RequestConfig<RequestTimeout>,
}

impl ClientRef {
    fn fmt_fields(&self, f: &mut fmt::DebugStruct<'_, '_>) {
        // Instead of deriving Debug, only print fields when their output
        // would provide relevant or interesting data.

        f.field("default_headers", &self.headers);
        self.dispatcher.fmt_as_field(f);
        f.field("max_redirects", &self.max_redirects);

        if !self.referer {
            f.field("referer", &false);
        }

        self.request_timeout.fmt_as_field(f);
    }

    /// Runs a request through to its final response, one hop at a time.
    ///
    /// Each hop is sent, and if the response is a redirect the next
    /// request is proposed and handed to the governing policy. Nothing is
    /// sent for hop N+1 before hop N's decision has resolved.
    async fn chain(self: Arc<Self>, mut req: Request) -> crate::Result<Response> {
        let policy = {
            let resolved = self.dispatcher.resolve(req.extensions());
            trace!("redirect policy for {}: {:?}", req.url(), resolved);
            resolved.policy().cloned()
        };
        let timeout = self.request_timeout.fetch(req.extensions()).copied();
        let token = req.cancellation().cloned();
        let mut followed = 0;

        loop {
            let url = req.url().clone();
            let body_reusable = req.body().map_or(true, Body::is_reusable);
            let previous = req.try_clone().unwrap_or_else(|| req.clone_without_body());

            let res = cancelable(token.as_ref(), &url, self.send(req, timeout)).await?;

            let proposed = match self.propose(&previous, body_reusable, res.status(), res.headers())
            {
                Some(proposed) => proposed,
                None => return Ok(Response::new(res, url)),
            };

            // an exhausted limit is enforced before any policy runs
            if followed >= self.max_redirects {
                if policy.as_ref().map_or(false, redirect::Policy::is_none) {
                    return Ok(Response::new(res, url));
                }
                debug!("too many redirects at '{url}'");
                return Err(error::redirect(redirect::TooManyRedirects, url));
            }

            let mut next = match policy {
                None => {
                    trace!("following {} -> {}", url, proposed.url());
                    proposed
                }
                Some(ref policy) => {
                    let head = redirect::RedirectResponse::new(
                        url.clone(),
                        res.status(),
                        res.version(),
                        res.headers().clone(),
                    );
                    let attempt = Attempt::new(previous, head, proposed);
                    let decided = Dispatcher::decide(policy, attempt);
                    match cancelable(token.as_ref(), &url, decided).await? {
                        Decision::Follow(next) => next,
                        Decision::Stop => return Ok(Response::new(res, url)),
                    }
                }
            };

            followed += 1;

            if next.url().scheme() != "http" {
                let bad = next.url().clone();
                return Err(error::redirect(error::url_bad_scheme(bad.clone()), bad));
            }

            if self.sanitize_replacements {
                let next_url = next.url().clone();
                remove_sensitive_headers(next.headers_mut(), &next_url, &url);
            }

            debug!("redirecting '{}' to {} '{}'", url, next.method(), next.url());
            // the 3xx body is never read; dropping it lets the connection go
            drop(res);
            req = next;
        }
    }

    /// Sends one hop and waits for the response head.
    async fn send(
        &self,
        req: Request,
        timeout: Option<Duration>,
    ) -> crate::Result<http::Response<Incoming>> {
        let (method, url, mut headers, body, version, _) = req.pieces();
        let uri = try_uri(&url)?;

        for (key, value) in &self.headers {
            if let Entry::Vacant(entry) = headers.entry(key) {
                entry.insert(value.clone());
            }
        }

        let mut http_req = http::Request::builder()
            .method(method)
            .uri(uri)
            .version(version)
            .body(body.unwrap_or_default())
            .map_err(error::builder)?;
        *http_req.headers_mut() = headers;

        trace!("sending {} '{}'", http_req.method(), url);
        let in_flight = self.hyper.request(http_req);

        let res = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, in_flight).await {
                Ok(res) => res,
                Err(_) => return Err(error::request(error::TimedOut).with_url(url)),
            },
            None => in_flight.await,
        };

        res.map_err(|e| error::request(e).with_url(url))
    }

    /// Builds the request the transport would send after a redirect
    /// response, or `None` if the response is not one it follows.
    fn propose(
        &self,
        previous: &Request,
        body_reusable: bool,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<Request> {
        let mut next = previous
            .try_clone()
            .unwrap_or_else(|| previous.clone_without_body());

        match status {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                *next.body_mut() = None;
                for header in &[
                    TRANSFER_ENCODING,
                    CONTENT_ENCODING,
                    CONTENT_TYPE,
                    CONTENT_LENGTH,
                ] {
                    next.headers_mut().remove(header);
                }

                match *next.method() {
                    Method::GET | Method::HEAD => {}
                    _ => {
                        *next.method_mut() = Method::GET;
                    }
                }
            }
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                if !body_reusable {
                    debug!("not redirecting {status}, the request body cannot be replayed");
                    return None;
                }
            }
            _ => return None,
        }

        let loc = headers.get(LOCATION)?;
        let loc = match loc.to_str() {
            Ok(loc) => loc,
            Err(e) => {
                debug!("Location header had invalid bytes: {e:?}");
                return None;
            }
        };
        let loc = match previous.url().join(loc) {
            Ok(loc) => loc,
            Err(e) => {
                debug!("Location header had invalid URI: {e:?}");
                return None;
            }
        };
        if try_uri(&loc).is_err() {
            debug!("Location header is not a valid URI: '{loc}'");
            return None;
        }

        if self.referer {
            if let Some(referer) = make_referer(&loc, previous.url()) {
                next.headers_mut().insert(REFERER, referer);
            }
        }
        remove_sensitive_headers(next.headers_mut(), &loc, previous.url());
        *next.url_mut() = loc;

        Some(next)
    }
}

pin_project! {
    /// Races a hop or a pending redirect decision against the request's
    /// cancellation token.
    struct Cancelable<F> {
        #[pin]
        fut: F,
        #[pin]
        cancelled: Option<WaitForCancellationFutureOwned>,
        url: Url,
    }
}

fn cancelable<F>(token: Option<&CancellationToken>, url: &Url, fut: F) -> Cancelable<F> {
    Cancelable {
        fut,
        cancelled: token.map(|token| token.clone().cancelled_owned()),
        url: url.clone(),
    }
}

impl<F, T> Future for Cancelable<F>
where
    F: Future<Output = crate::Result<T>>,
{
    type Output = crate::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some(cancelled) = this.cancelled.as_pin_mut() {
            if cancelled.poll(cx).is_ready() {
                debug!("request to '{}' canceled", this.url);
                return Poll::Ready(Err(error::canceled(this.url.clone())));
            }
        }
        this.fut.poll(cx)
    }
}

/// A future of a `Response`, returned by `Client::execute` and
/// `RequestBuilder::send`.
pub struct Pending {
    inner: PendingInner,
}

enum PendingInner {
    Request(Pin<Box<dyn Future<Output = crate::Result<Response>> + Send>>),
    Error(Option<crate::Error>),
}

impl Pending {
    pub(super) fn new_err(err: crate::Error) -> Pending {
        Pending {
            inner: PendingInner::Error(Some(err)),
        }
    }
}

impl Future for Pending {
    type Output = Result<Response, crate::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.inner {
            PendingInner::Request(ref mut fut) => fut.as_mut().poll(cx),
            PendingInner::Error(ref mut err) => Poll::Ready(Err(err
                .take()
                .expect("Pending error polled more than once"))),
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner {
            PendingInner::Request(..) => f.pad("Pending"),
            PendingInner::Error(ref err) => f.debug_struct("Pending").field("error", err).finish(),
        }
    }
}

impl tower_service::Service<Request> for Client {
    type Response = Response;
    type Error = crate::Error;
    type Future = Pending;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        self.execute_request(req)
    }
}

impl tower_service::Service<Request> for &'_ Client {
    type Response = Response;
    type Error = crate::Error;
    type Future = Pending;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        self.execute_request(req)
    }
}

fn make_referer(next: &Url, previous: &Url) -> Option<HeaderValue> {
    if next.scheme() == "http" && previous.scheme() == "https" {
        return None;
    }

    let mut referer = previous.clone();
    let _ = referer.set_username("");
    let _ = referer.set_password(None);
    referer.set_fragment(None);
    referer.as_str().parse().ok()
}
