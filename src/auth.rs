//! API-key authentication at the gRPC boundary.

use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::config::AuthMode;

/// Returns an interceptor enforcing API-key authentication on every
/// incoming call, before any business logic runs.
///
/// Behaviour:
/// - If `mode` is not apikey, or `key` is empty ("not configured"), all
///   calls pass through — including apikey mode with no key, which keeps a
///   half-configured dev setup from failing closed.
/// - Otherwise the `header` metadata value must equal `key`; a missing,
///   unreadable or wrong value is rejected with `unauthenticated`.
///
/// `header` should be lowercase — gRPC metadata keys are normalised to
/// lowercase on the wire.
pub fn api_key_interceptor(
    mode: AuthMode,
    header: String,
    key: String,
) -> impl Interceptor + Clone {
    let header = header.to_ascii_lowercase();
    move |req: Request<()>| {
        if mode != AuthMode::Apikey || key.is_empty() {
            return Ok(req);
        }

        match req.metadata().get(header.as_str()) {
            Some(value) if value.to_str().map(|v| v == key).unwrap_or(false) => Ok(req),
            Some(_) => Err(Status::unauthenticated("invalid api key")),
            None => Err(Status::unauthenticated("missing api key")),
        }
    }
}
