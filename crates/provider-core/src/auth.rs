//! Challenge/response authentication continuation
//!
//! Runs when a 401 or 407 pops off a channel's pipeline. The continuation
//! is best-effort: a challenge nobody has credentials for is delivered to
//! the caller as a plain response, while malformed or hostile challenge
//! traffic (unknown schemes, endless re-challenges) fails the request
//! explicitly.

use std::sync::Arc;
use tracing::{debug, warn};

use hoplink_channel_core::Hop;
use hoplink_message_core::auth::{
    basic_authorization, bearer_authorization, compute_digest_response, compute_ha1,
    generate_cnonce, Challenge, DigestAuthorization, QopNegotiation,
};
use hoplink_message_core::{header, Message, StatusCode, Uri};

use crate::error::Error;
use crate::listener::{AuthEvent, AuthMode};
use crate::provider::{Continuation, ProviderInner};
use crate::request::Request;

/// Two attempts per request, then hard failure. Prevents challenge loops
/// against a misconfigured or hostile server.
const AUTH_ATTEMPT_LIMIT: u32 = 2;

const NONCE_COUNT: &str = "00000001";

pub(crate) fn continue_authentication(
    provider: &ProviderInner,
    request: &Arc<Request>,
    response: Message,
) -> Continuation {
    if request.auth_attempt_count() >= AUTH_ATTEMPT_LIMIT {
        warn!("authentication attempt cap reached");
        return Continuation::Fail(Error::AuthAttemptsExceeded);
    }

    let is_proxy_challenge = response.status() == Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED);

    let challenge_values: Vec<String> = response
        .header_values(header::WWW_AUTHENTICATE)
        .into_iter()
        .map(str::to_string)
        .collect();
    if challenge_values.is_empty() {
        // A proxy may re-challenge on its own; answering that is not
        // supported, only origin challenges relayed alongside one.
        if response.header(header::PROXY_AUTHENTICATE).is_some() {
            return Continuation::Fail(Error::ProxyChallengeUnsupported);
        }
        return Continuation::Fail(Error::MissingChallenge);
    }

    let mut challenges = Vec::with_capacity(challenge_values.len());
    for value in &challenge_values {
        match Challenge::parse(value) {
            Ok(Challenge::Other { scheme }) => {
                return Continuation::Fail(Error::UnsupportedAuthScheme(scheme));
            }
            Ok(challenge) => challenges.push(challenge),
            Err(_) => {
                return Continuation::Fail(Error::UnsupportedAuthScheme(value.clone()));
            }
        }
    }

    let target = request.original_uri().unwrap_or_else(|| request.uri());
    let hop = match Hop::from_uri(&target) {
        Ok(hop) => hop,
        Err(e) => return Continuation::Fail(e.into()),
    };

    let mut credentials = CredentialSource::new(request, &target, hop);

    for challenge in challenges {
        match challenge {
            Challenge::Digest(digest) => {
                if !digest.is_answerable() {
                    warn!("skipping digest challenge without realm/nonce");
                    continue;
                }
                let Some(algorithm) = digest.algorithm() else {
                    warn!(
                        algorithm = digest.algorithm.as_deref().unwrap_or(""),
                        "skipping digest challenge with unsupported algorithm"
                    );
                    continue;
                };
                let qop = match digest.negotiated_qop() {
                    QopNegotiation::Auth => Some("auth"),
                    QopNegotiation::Missing => None,
                    QopNegotiation::Unsupported => {
                        warn!("skipping digest challenge with unsupported qop offer");
                        continue;
                    }
                };
                let Some(event) =
                    credentials.resolve(AuthMode::Digest, Some(algorithm), &digest.realm)
                else {
                    continue;
                };
                let Some(username) = event.username.clone() else {
                    continue;
                };
                let ha1 = match (&event.ha1, &event.password) {
                    (Some(ha1), _) => ha1.clone(),
                    (None, Some(password)) => {
                        compute_ha1(algorithm, &username, &digest.realm, password)
                    }
                    (None, None) => continue,
                };
                let digest_uri = request.uri().origin_form();
                let method = request.method();
                let (response_digest, qop_directive) = match qop {
                    Some(qop) => {
                        let cnonce = generate_cnonce();
                        let value = compute_digest_response(
                            algorithm,
                            &ha1,
                            &digest.nonce,
                            Some((qop, NONCE_COUNT, &cnonce)),
                            method.as_str(),
                            &digest_uri,
                        );
                        (
                            value,
                            Some((qop.to_string(), NONCE_COUNT.to_string(), cnonce)),
                        )
                    }
                    None => (
                        compute_digest_response(
                            algorithm,
                            &ha1,
                            &digest.nonce,
                            None,
                            method.as_str(),
                            &digest_uri,
                        ),
                        None,
                    ),
                };
                let authorization = DigestAuthorization {
                    username,
                    realm: digest.realm.clone(),
                    nonce: digest.nonce.clone(),
                    uri: digest_uri,
                    response: response_digest,
                    algorithm,
                    opaque: digest.opaque.clone(),
                    qop: qop_directive,
                };
                return resubmit_with_authorization(
                    provider,
                    request,
                    is_proxy_challenge,
                    authorization.to_string(),
                );
            }
            Challenge::Basic { realm } => {
                let Some(event) = credentials.resolve(AuthMode::Basic, None, &realm) else {
                    continue;
                };
                let (Some(username), Some(password)) = (&event.username, &event.password) else {
                    continue;
                };
                return resubmit_with_authorization(
                    provider,
                    request,
                    is_proxy_challenge,
                    basic_authorization(username, password),
                );
            }
            Challenge::Bearer { realm } => {
                let Some(event) = credentials.resolve(AuthMode::Bearer, None, &realm) else {
                    continue;
                };
                let Some(token) = &event.bearer_token else {
                    continue;
                };
                return resubmit_with_authorization(
                    provider,
                    request,
                    is_proxy_challenge,
                    bearer_authorization(token),
                );
            }
            Challenge::Other { .. } => unreachable!("rejected during parsing above"),
        }
    }

    debug!("no usable credentials for any challenge; delivering response to caller");
    Continuation::Deliver(response)
}

fn resubmit_with_authorization(
    provider: &ProviderInner,
    request: &Arc<Request>,
    is_proxy_challenge: bool,
    value: String,
) -> Continuation {
    // Any prior authorization is stale; never keep both variants around.
    request.remove_header(header::AUTHORIZATION);
    request.remove_header(header::PROXY_AUTHORIZATION);
    let name = if is_proxy_challenge {
        header::PROXY_AUTHORIZATION
    } else {
        header::AUTHORIZATION
    };
    request.set_header(name, value);
    request.bump_auth_attempt();
    debug!(
        attempt = request.auth_attempt_count(),
        "resubmitting with computed credentials"
    );
    match provider.send_request(request) {
        Ok(()) => Continuation::Resubmitted,
        Err(e) => Continuation::Fail(e),
    }
}

/// Resolves credentials for the challenges of one response.
///
/// Credentials embedded in the request target win over the listener
/// callback, and the callback fires at most once per response no matter
/// how many challenges are iterated; its result is cached for the rest.
struct CredentialSource<'a> {
    request: &'a Arc<Request>,
    target: &'a Uri,
    hop: Hop,
    callback_fired: bool,
    callback_result: Option<AuthEvent>,
}

impl<'a> CredentialSource<'a> {
    fn new(request: &'a Arc<Request>, target: &'a Uri, hop: Hop) -> Self {
        CredentialSource {
            request,
            target,
            hop,
            callback_fired: false,
            callback_result: None,
        }
    }

    fn resolve(
        &mut self,
        mode: AuthMode,
        algorithm: Option<hoplink_message_core::auth::DigestAlgorithm>,
        realm: &str,
    ) -> Option<AuthEvent> {
        match mode {
            AuthMode::Bearer => {
                if let Some(token) = self.target.query_param("access_token") {
                    let mut event = AuthEvent::new(realm, mode, self.hop.clone());
                    event.bearer_token = Some(token.to_string());
                    return Some(event);
                }
            }
            _ => {
                if let (Some(user), Some(password)) = (self.target.user(), self.target.password()) {
                    let mut event = AuthEvent::new(realm, mode, self.hop.clone());
                    event.username = Some(user.to_string());
                    event.password = Some(password.to_string());
                    return Some(event);
                }
            }
        }

        if !self.callback_fired {
            self.callback_fired = true;
            if let Some(listener) = self.request.listener() {
                let mut event = AuthEvent::new(realm, mode, self.hop.clone());
                event.algorithm = algorithm;
                listener.on_auth_requested(&mut event);
                if event.has_credentials() {
                    self.callback_result = Some(event);
                }
            }
        }
        self.callback_result.clone()
    }
}
