#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # waypoint
//!
//! The `waypoint` crate provides an asynchronous HTTP/1.1 client whose
//! redirect handling is decided per request.
//!
//! - Plain bodies, JSON, urlencoded
//! - Redirect policies bound to a client or to a single request
//! - Async redirect decisions that can rewrite the next request
//! - Per-hop timeouts and cancellation
//!
//! Connections are plain TCP. There is no TLS support: requests to
//! `https` URLs fail with a builder error, and a redirect to an `https`
//! URL fails with an error for which [`Error::is_redirect`] is true.
//!
//! ## Making a GET request
//!
//! For a single request, you can use the [`get`][get] shortcut method.
//!
//! ```rust
//! # async fn run() -> Result<(), waypoint::Error> {
//! let body = waypoint::get("http://www.rust-lang.org")
//!     .await?
//!     .text()
//!     .await?;
//!
//! println!("body = {body:?}");
//! # Ok(())
//! # }
//! ```
//!
//! **NOTE**: If you plan to perform multiple requests, it is best to create a
//! [`Client`][client] and reuse it, taking advantage of keep-alive connection
//! pooling.
//!
//! ## Redirect Policies
//!
//! By default, a `Client` will automatically follow HTTP redirects, with a
//! maximum redirect chain of 10 hops. To customize this behavior, a
//! [`redirect::Policy`][redirect] can be set on the client, and overridden
//! for a single request:
//!
//! ```rust
//! # async fn run() -> Result<(), waypoint::Error> {
//! use waypoint::redirect::Policy;
//!
//! let client = waypoint::Client::builder()
//!     .redirect(Policy::none())
//!     .build()?;
//!
//! // this one request follows redirects after all
//! let res = client
//!     .get("http://httpbin.org/redirect/1")
//!     .redirect(Policy::follow())
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! A `modify` policy receives the request that got the redirect, the
//! redirect response, and the request the client would send next, and
//! returns the request to actually send:
//!
//! ```rust
//! # async fn run() -> Result<(), waypoint::Error> {
//! use waypoint::{redirect::Policy, Method};
//!
//! let policy = Policy::modify(|attempt| async move {
//!     let (_previous, _response, mut next) = attempt.into_parts();
//!     *next.method_mut() = Method::PATCH;
//!     Ok::<_, waypoint::Error>(Some(next))
//! });
//!
//! let res = waypoint::Client::new()
//!     .post("http://httpbin.org/redirect-to?url=/patch")
//!     .redirect(policy)
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! The following are a list of [Cargo features][cargo-features] that can be
//! enabled or disabled:
//!
//! - **json**: Provides serialization and deserialization for JSON bodies.
//!
//! [get]: ./fn.get.html
//! [client]: ./struct.Client.html
//! [redirect]: crate::redirect
//! [cargo-features]: https://doc.rust-lang.org/stable/cargo/reference/manifest.html#the-features-section

pub use http::header;
pub use http::Method;
pub use http::{StatusCode, Version};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

mod error;
mod into_url;

pub use self::error::{Error, Result};
pub use self::into_url::IntoUrl;

/// Shortcut method to quickly make a `GET` request.
///
/// See also the methods on the [`waypoint::Response`](./struct.Response.html)
/// type.
///
/// **NOTE**: This function creates a new internal `Client` on each call,
/// and so should not be used if making many requests. Create a
/// [`Client`](./struct.Client.html) instead.
///
/// # Examples
///
/// ```rust
/// # async fn run() -> Result<(), waypoint::Error> {
/// let body = waypoint::get("http://www.rust-lang.org").await?
///     .text().await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// This function fails if:
///
/// - the native client cannot be built
/// - there was an error while sending request
/// - the redirect limit was exhausted
pub async fn get<T: IntoUrl>(url: T) -> crate::Result<Response> {
    Client::builder().build()?.get(url).send().await
}

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<Client>();
    assert_sync::<Client>();
    assert_clone::<Client>();

    assert_send::<Request>();
    assert_send::<RequestBuilder>();

    assert_send::<Response>();

    assert_send::<Error>();
    assert_sync::<Error>();

    assert_send::<Body>();

    assert_send::<redirect::Policy>();
    assert_sync::<redirect::Policy>();
    assert_clone::<redirect::Policy>();

    assert_send::<Pending>();
}

pub use self::async_impl::{
    Body, Client, ClientBuilder, Pending, Request, RequestBuilder, Response, ResponseUrl,
};

mod async_impl;
mod config;
pub mod redirect;
mod util;
