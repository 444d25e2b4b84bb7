use crate::request::Request;

/// Somewhere a [`Request`] can be sent.
///
/// Every component implements this. Implementations must not block the caller: they either handle
/// the request straight away, buffer it, or hand it to a process of their own.
pub trait Port {
    /// Accept a request.
    fn put(&self, request: Request);
}
