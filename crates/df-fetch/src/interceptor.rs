//! Embedder hooks around the fetch pipeline.

use crate::request::Request;
use df_net::Response;

/// Hooks run at every terminal point of a caller's fetch.
///
/// Both methods default to doing nothing.
pub trait Interceptor: Send + Sync {
    /// A returned response short-circuits the whole pipeline.
    fn before_request(&self, _request: &Request) -> Option<Response> {
        None
    }

    /// A returned response replaces `response`.
    fn after_response(&self, _request: &Request, _response: &Response) -> Option<Response> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterceptor;

impl Interceptor for NoopInterceptor {}
