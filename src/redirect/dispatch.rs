use http::Extensions;

use super::{Attempt, Decision, Policy};
use crate::config::{RedirectPolicy, RequestConfig};

/// Picks the policy governing a request chain and runs it on each hop.
///
/// Holds only the client-scope binding. Nothing is recorded between hops.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    client: RequestConfig<RedirectPolicy>,
}

/// Where the policy governing a chain came from.
#[derive(Debug)]
pub(crate) enum Resolved<'a> {
    Request(&'a Policy),
    Client(&'a Policy),
    /// No policy bound anywhere; the transport follows its own proposals.
    Transport,
}

impl<'a> Resolved<'a> {
    pub(crate) fn policy(&self) -> Option<&'a Policy> {
        match *self {
            Resolved::Request(policy) | Resolved::Client(policy) => Some(policy),
            Resolved::Transport => None,
        }
    }
}

impl Dispatcher {
    pub(crate) fn new(client: Option<Policy>) -> Dispatcher {
        Dispatcher {
            client: RequestConfig::new(client),
        }
    }

    /// Request scope, else client scope, else the transport default.
    pub(crate) fn resolve<'a>(&'a self, ext: &'a Extensions) -> Resolved<'a> {
        if let Some(policy) = RequestConfig::<RedirectPolicy>::get(ext) {
            Resolved::Request(policy)
        } else if let Some(policy) = self.client.as_ref() {
            Resolved::Client(policy)
        } else {
            Resolved::Transport
        }
    }

    /// Evaluates `policy` once for this hop.
    ///
    /// A failing decision becomes the chain's error, tagged with the URL
    /// that answered with the redirect.
    pub(crate) async fn decide(policy: &Policy, attempt: Attempt) -> crate::Result<Decision> {
        let url = attempt.response().url().clone();
        match policy.evaluate(attempt).await {
            Ok(Some(next)) => {
                log::debug!("redirect policy follows {url} -> {}", next.url());
                Ok(Decision::Follow(next))
            }
            Ok(None) => {
                log::debug!("redirect policy stops at {url}");
                Ok(Decision::Stop)
            }
            Err(e) => Err(crate::error::decision(e, url)),
        }
    }

    pub(crate) fn fmt_as_field(&self, f: &mut std::fmt::DebugStruct<'_, '_>) {
        self.client.fmt_as_field(f);
    }
}
