//! Redirect Handling
//!
//! By default, a `Client` follows redirects the way the transport proposes
//! them, up to a chain of 10 hops. A `redirect::Policy` decides per hop what
//! happens instead. It can be bound to a whole client with
//! [`ClientBuilder::redirect`](crate::ClientBuilder::redirect), or to a
//! single request with [`RequestBuilder::redirect`](crate::RequestBuilder::redirect).
//! A request's policy always wins over the client's.
//!
//! A policy sees three things for every redirect: the request that produced
//! the redirect, the head of the redirect response, and the request the
//! transport proposes to send next. It answers with the request to send, or
//! nothing to stop the chain and deliver the redirect response as the final
//! response.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future;

use crate::header::{HeaderMap, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE};
use crate::{Request, StatusCode, Url, Version};

mod dispatch;

pub(crate) use self::dispatch::Dispatcher;

/// The future returned by a [`Modify`] implementation.
///
/// It resolves to the request to send next, `None` to stop following, or an
/// error that ends the request chain.
pub type Decide =
    Pin<Box<dyn Future<Output = Result<Option<Request>, Box<dyn StdError + Send + Sync>>> + Send>>;

/// A type that controls the policy on how to handle the following of redirects.
///
/// - `follow` sends whatever request the transport proposes.
/// - `none` stops at the first redirect, handing the 3xx response back as
///   the successful result.
/// - `modify` hands the decision to a function.
///
/// Policies are cheap to clone and hold no per-request state, so one value
/// can be shared across any number of clients and requests.
#[derive(Clone)]
pub struct Policy {
    inner: PolicyKind,
}

#[derive(Clone)]
enum PolicyKind {
    Follow,
    None,
    Modify(Arc<dyn Modify>),
}

/// A redirect decision with its context passed explicitly.
///
/// Implement this on a struct when the decision needs configuration; the
/// fields are shared read-only by every evaluation, including concurrent
/// ones on different requests.
///
/// # Example
///
/// ```rust
/// use waypoint::redirect::{Attempt, Decide, Modify, Policy};
///
/// struct SameHost {
///     host: String,
/// }
///
/// impl Modify for SameHost {
///     fn modify(&self, attempt: Attempt) -> Decide {
///         let allowed = attempt.url().host_str() == Some(self.host.as_str());
///         Box::pin(async move {
///             Ok(if allowed { attempt.follow() } else { attempt.stop() })
///         })
///     }
/// }
///
/// let policy = Policy::modify_with(SameHost { host: "hyper.rs".into() });
/// ```
pub trait Modify: Send + Sync + 'static {
    /// Decide what to send after a redirect.
    fn modify(&self, attempt: Attempt) -> Decide;
}

struct ModifyFn<F>(F);

impl<F> Modify for ModifyFn<F>
where
    F: Fn(Attempt) -> Decide + Send + Sync + 'static,
{
    fn modify(&self, attempt: Attempt) -> Decide {
        (self.0)(attempt)
    }
}

impl Policy {
    /// Create a `Policy` that sends every proposed request unchanged.
    pub fn follow() -> Self {
        Self {
            inner: PolicyKind::Follow,
        }
    }

    /// Create a `Policy` that does not follow any redirect.
    ///
    /// The redirect response, with its status and `Location` header, is
    /// returned as the `Ok` result.
    pub fn none() -> Self {
        Self {
            inner: PolicyKind::None,
        }
    }

    /// Create a `Policy` from an async decision function.
    ///
    /// The function is called exactly once per redirect hop, and the chain
    /// waits for its future before doing anything else. It may return the
    /// proposed request, any other request, or `None`. An `Err` ends the
    /// chain; the request then fails with an error for which
    /// [`Error::is_decision`](crate::Error::is_decision) is true.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use waypoint::{Error, Method, redirect};
    /// #
    /// # fn run() -> Result<(), Error> {
    /// let policy = redirect::Policy::modify(|attempt| async move {
    ///     if attempt.url().path() == "/login" {
    ///         return Ok::<_, Error>(attempt.stop());
    ///     }
    ///     let mut next = attempt.follow();
    ///     if let Some(ref mut req) = next {
    ///         req.headers_mut().insert("x-redirected", "1".parse().unwrap());
    ///     }
    ///     Ok(next)
    /// });
    /// let client = waypoint::Client::builder()
    ///     .redirect(policy)
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn modify<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Attempt) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Request>, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::modify_with(ModifyFn(move |attempt: Attempt| -> Decide {
            let fut = f(attempt);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }))
    }

    /// Create a `Policy` from a [`Modify`] implementation.
    pub fn modify_with<M: Modify>(modify: M) -> Self {
        Self {
            inner: PolicyKind::Modify(Arc::new(modify)),
        }
    }

    /// Apply this policy to a given [`Attempt`].
    ///
    /// This can be used inside a `modify` function to defer to another
    /// policy.
    pub fn evaluate(&self, attempt: Attempt) -> Decide {
        match self.inner {
            PolicyKind::Follow => Box::pin(future::ready(Ok(attempt.follow()))),
            PolicyKind::None => Box::pin(future::ready(Ok(attempt.stop()))),
            PolicyKind::Modify(ref modify) => modify.modify(attempt),
        }
    }
}

impl Policy {
    /// Whether this policy stops at every redirect without evaluating.
    pub(crate) fn is_none(&self) -> bool {
        matches!(self.inner, PolicyKind::None)
    }
}

impl Default for Policy {
    fn default() -> Policy {
        Policy::follow()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Policy").field(&self.inner).finish()
    }
}

impl fmt::Debug for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PolicyKind::Follow => f.pad("Follow"),
            PolicyKind::None => f.pad("None"),
            PolicyKind::Modify(..) => f.pad("Modify"),
        }
    }
}

/// Everything a policy gets to look at for one redirect hop.
///
/// All three parts are owned copies: nothing a policy does to them reaches
/// the request the caller sent or the response that triggered the hop.
#[derive(Debug)]
pub struct Attempt {
    previous: Request,
    response: RedirectResponse,
    proposed: Request,
}

impl Attempt {
    pub(crate) fn new(previous: Request, response: RedirectResponse, proposed: Request) -> Attempt {
        Attempt {
            previous,
            response,
            proposed,
        }
    }

    /// The request that received the redirect.
    ///
    /// Its body is only present if it could be replayed.
    pub fn previous(&self) -> &Request {
        &self.previous
    }

    /// The head of the redirect response.
    pub fn response(&self) -> &RedirectResponse {
        &self.response
    }

    /// The request the transport would send next.
    pub fn proposed(&self) -> &Request {
        &self.proposed
    }

    /// Get the type of redirect.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Get the next URL to redirect to.
    pub fn url(&self) -> &Url {
        self.proposed.url()
    }

    /// Returns the proposed request, meaning it should be sent as is.
    pub fn follow(self) -> Option<Request> {
        Some(self.proposed)
    }

    /// Returns `None`, meaning the redirect should not be followed.
    ///
    /// The 3xx response will be returned as the `Ok` result.
    pub fn stop(self) -> Option<Request> {
        None
    }

    /// Take the previous request, the response head and the proposed request.
    pub fn into_parts(self) -> (Request, RedirectResponse, Request) {
        (self.previous, self.response, self.proposed)
    }
}

/// The head of a response that triggered a redirect.
///
/// The body is not available to policies; it stays with the response
/// that is returned if the chain stops.
#[derive(Debug, Clone)]
pub struct RedirectResponse {
    url: Url,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

impl RedirectResponse {
    pub(crate) fn new(
        url: Url,
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
    ) -> RedirectResponse {
        RedirectResponse {
            url,
            status,
            version,
            headers,
        }
    }

    /// The URL that answered with a redirect.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The redirect status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The HTTP version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The response headers, including `Location`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

// pub(crate)

/// The outcome of one redirect hop.
#[derive(Debug)]
pub(crate) enum Decision {
    Follow(Request),
    Stop,
}

pub(crate) fn remove_sensitive_headers(headers: &mut HeaderMap, next: &Url, previous: &Url) {
    let cross_host = next.host_str() != previous.host_str()
        || next.port_or_known_default() != previous.port_or_known_default();
    if cross_host {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
        headers.remove("cookie2");
        headers.remove(PROXY_AUTHORIZATION);
        headers.remove(WWW_AUTHENTICATE);
    }
}

#[derive(Debug)]
pub(crate) struct TooManyRedirects;

impl fmt::Display for TooManyRedirects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("too many redirects")
    }
}

impl StdError for TooManyRedirects {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn attempt(next: &str) -> Attempt {
        let prev_url = Url::parse("http://a.b/start").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(crate::header::LOCATION, next.parse().unwrap());
        Attempt::new(
            Request::new(Method::GET, prev_url.clone()),
            RedirectResponse::new(prev_url, StatusCode::FOUND, Version::HTTP_11, headers),
            Request::new(Method::GET, Url::parse(next).unwrap()),
        )
    }

    #[tokio::test]
    async fn follow_returns_proposal() {
        let next = Policy::follow()
            .evaluate(attempt("http://x.y/z"))
            .await
            .unwrap()
            .expect("followed");
        assert_eq!(next.url().as_str(), "http://x.y/z");
        assert_eq!(next.method(), Method::GET);
    }

    #[tokio::test]
    async fn none_stops() {
        let next = Policy::none()
            .evaluate(attempt("http://x.y/z"))
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn only_none_stops_without_evaluating() {
        assert!(Policy::none().is_none());
        assert!(!Policy::follow().is_none());
        assert!(!Policy::modify(|attempt: Attempt| async move {
            Ok::<_, std::convert::Infallible>(attempt.stop())
        })
        .is_none());
    }

    #[tokio::test]
    async fn modify_closure() {
        let policy = Policy::modify(|attempt: Attempt| async move {
            if attempt.url().host_str() == Some("foo") {
                Ok::<_, std::convert::Infallible>(attempt.stop())
            } else {
                Ok(attempt.follow())
            }
        });

        let next = policy.evaluate(attempt("http://bar/baz")).await.unwrap();
        assert!(next.is_some());

        let next = policy.evaluate(attempt("http://foo/baz")).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn modify_replaces_request() {
        let policy = Policy::modify(|_attempt| async {
            let url = Url::parse("http://c.d/patched").unwrap();
            Ok::<_, &str>(Some(Request::new(Method::PATCH, url)))
        });

        let next = policy
            .evaluate(attempt("http://x.y/z"))
            .await
            .unwrap()
            .expect("replacement");
        assert_eq!(next.method(), Method::PATCH);
        assert_eq!(next.url().as_str(), "http://c.d/patched");
    }

    #[tokio::test]
    async fn modify_error_is_returned() {
        let policy = Policy::modify(|_attempt| async { Err::<Option<Request>, _>("nope") });
        let err = policy.evaluate(attempt("http://x.y/z")).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn modify_with_struct_context() {
        struct OnlyPath(&'static str);

        impl Modify for OnlyPath {
            fn modify(&self, attempt: Attempt) -> Decide {
                let allowed = attempt.url().path() == self.0;
                Box::pin(async move {
                    Ok(if allowed {
                        attempt.follow()
                    } else {
                        attempt.stop()
                    })
                })
            }
        }

        let policy = Policy::modify_with(OnlyPath("/ok"));
        assert!(policy
            .evaluate(attempt("http://x.y/ok"))
            .await
            .unwrap()
            .is_some());
        assert!(policy
            .evaluate(attempt("http://x.y/nope"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn policy_can_defer_to_another() {
        let inner = Policy::none();
        let policy = Policy::modify(move |attempt| inner.evaluate(attempt));
        assert!(policy
            .evaluate(attempt("http://x.y/z"))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn attempt_accessors() {
        let attempt = attempt("http://x.y/z");
        assert_eq!(attempt.status(), StatusCode::FOUND);
        assert_eq!(attempt.url().as_str(), "http://x.y/z");
        assert_eq!(attempt.previous().url().as_str(), "http://a.b/start");
        assert_eq!(attempt.response().url().as_str(), "http://a.b/start");
        assert_eq!(attempt.response().headers()["location"], "http://x.y/z");

        let (previous, response, proposed) = attempt.into_parts();
        assert_eq!(previous.url(), response.url());
        assert_eq!(proposed.url().as_str(), "http://x.y/z");
    }

    #[test]
    fn policy_debug() {
        assert_eq!(format!("{:?}", Policy::follow()), "Policy(Follow)");
        assert_eq!(format!("{:?}", Policy::none()), "Policy(None)");
        let modify = Policy::modify(|a: Attempt| async move { Ok::<_, &str>(a.follow()) });
        assert_eq!(format!("{modify:?}"), "Policy(Modify)");
    }

    #[test]
    fn test_remove_sensitive_headers() {
        use crate::header::{HeaderValue, ACCEPT};

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("let me in"));
        headers.insert(COOKIE, HeaderValue::from_static("foo=bar"));

        let next = Url::parse("http://initial-domain.com/path").unwrap();
        let prev = Url::parse("http://initial-domain.com/new_path").unwrap();
        let mut filtered_headers = headers.clone();

        remove_sensitive_headers(&mut headers, &next, &prev);
        assert_eq!(headers, filtered_headers);

        let prev = Url::parse("http://new-domain.com/path").unwrap();
        filtered_headers.remove(AUTHORIZATION);
        filtered_headers.remove(COOKIE);

        remove_sensitive_headers(&mut headers, &next, &prev);
        assert_eq!(headers, filtered_headers);
    }

    #[test]
    fn test_remove_sensitive_headers_on_port_change() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "let me in".parse().unwrap());

        let next = Url::parse("http://example.com:8080/").unwrap();
        let prev = Url::parse("http://example.com/").unwrap();
        remove_sensitive_headers(&mut headers, &next, &prev);
        assert!(headers.is_empty());
    }
}
