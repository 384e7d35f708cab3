//! Redirect continuation
//!
//! Follows 301/302/307 responses for GET and HEAD requests. Credentials
//! embedded in the original target travel to the new one; a computed
//! Authorization header does not, since it was minted for the old
//! destination.

use std::sync::Arc;
use tracing::{debug, warn};

use hoplink_message_core::{header, Message, Uri};

use crate::error::Error;
use crate::provider::{Continuation, ProviderInner};
use crate::request::Request;

/// Hop cap for one request's redirect chain.
const REDIRECT_LIMIT: u32 = 70;

pub(crate) fn continue_redirect(
    provider: &ProviderInner,
    request: &Arc<Request>,
    response: Message,
) -> Continuation {
    if request.redirect_count() >= REDIRECT_LIMIT {
        warn!(limit = REDIRECT_LIMIT, "redirect chain exceeded the hop cap");
        return Continuation::Fail(Error::TooManyRedirects);
    }

    // Only safe methods are re-issued on the caller's behalf; anything else
    // is theirs to decide.
    if !request.method().is_auto_redirectable() {
        return Continuation::Deliver(response);
    }

    let Some(location) = response.header(header::LOCATION).map(str::to_string) else {
        return Continuation::Deliver(response);
    };
    let new_uri: Uri = match location.parse() {
        Ok(uri) => uri,
        Err(_) => {
            warn!(location = %location, "unparsable redirect location");
            return Continuation::Fail(Error::InvalidRedirect(location));
        }
    };

    let mut new_uri = new_uri;
    if let Some(original) = request.original_uri() {
        if let Some(user) = original.user() {
            new_uri = new_uri.with_user(user);
        }
        if let Some(password) = original.password() {
            new_uri = new_uri.with_password(password);
        }
    }

    request.bump_redirect_count();
    request.set_uri(new_uri);
    // Cleared so the next dispatch re-splits the fresh absolute target.
    request.clear_original_uri();
    request.remove_header(header::AUTHORIZATION);
    request.remove_header(header::PROXY_AUTHORIZATION);

    debug!(
        hops = request.redirect_count(),
        location = %location,
        "following redirect"
    );
    match provider.send_request(request) {
        Ok(()) => Continuation::Resubmitted,
        Err(e) => Continuation::Fail(e),
    }
}
