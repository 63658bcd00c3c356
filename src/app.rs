use crate::{
    constants::{
        FORWARDED_METHOD_HEADER, FORWARDED_URI_HEADER, IDENTITY_HEADER, NAMESPACE_PARAM,
        REPO_PARAM, REPOSITORY_PARAM,
    },
    error::Challenge,
    gate::AccessController,
    models::{AuthorizationRequest, AuthorizedIdentity, credential_from_headers},
};
use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::any,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<dyn AccessController>,
    pub trust_proxy: bool,
}

/// Forward-auth endpoint: every path is authorized and answered with 200 or
/// the 401 challenge.
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(any(forward_auth)).with_state(state)
}

pub async fn forward_auth(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, Challenge> {
    let target = RequestTarget::from_request(&req, state.trust_proxy);
    let identity = authorize_target(&state, &target).await?;
    Ok((
        StatusCode::OK,
        [(IDENTITY_HEADER, identity.name.clone())],
        Json(identity),
    )
        .into_response())
}

/// Middleware for hosts that serve the registry themselves; the granted
/// identity is stored in the request extensions.
///
/// Layered with `route_layer`, the matched route's `{name}` parameter (or
/// `{ns}` and `{repo}`) names the repository instead of the URI.
pub async fn require_entitlement(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Challenge> {
    let (mut parts, body) = req.into_parts();
    let repository = RawPathParams::from_request_parts(&mut parts, &state)
        .await
        .ok()
        .and_then(|params| repository_from_params(params.iter()));
    let mut req = Request::from_parts(parts, body);

    let mut target = RequestTarget::from_request(&req, state.trust_proxy);
    target.repository = repository;
    let identity = authorize_target(&state, &target).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Repository named by route parameters: `name` wins, else `ns/repo`, else `repo`.
pub fn repository_from_params<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    let mut name = None;
    let mut namespace = None;
    let mut repo = None;
    for (key, value) in params {
        let value = value.trim_matches('/');
        if value.is_empty() {
            continue;
        }
        match key {
            REPOSITORY_PARAM => name = Some(value),
            NAMESPACE_PARAM => namespace = Some(value),
            REPO_PARAM => repo = Some(value),
            _ => {}
        }
    }
    match (name, namespace, repo) {
        (Some(name), _, _) => Some(name.to_string()),
        (None, Some(namespace), Some(repo)) => Some(format!("{namespace}/{repo}")),
        (None, None, Some(repo)) => Some(repo.to_string()),
        _ => None,
    }
}

/// Owned copy of what the gate reads, so no request borrow lives across the
/// verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestTarget {
    method: String,
    request_uri: String,
    credential: Option<String>,
    repository: Option<String>,
}

impl RequestTarget {
    fn from_request(req: &Request, trust_proxy: bool) -> Self {
        let method = req.method().as_str().to_string();
        let request_uri = req
            .uri()
            .path_and_query()
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let headers = req.headers();
        let credential = credential_from_headers(headers).map(ToOwned::to_owned);
        if !trust_proxy {
            return Self {
                method,
                request_uri,
                credential,
                repository: None,
            };
        }
        Self {
            method: header_value(headers, FORWARDED_METHOD_HEADER).unwrap_or(method),
            request_uri: header_value(headers, FORWARDED_URI_HEADER).unwrap_or(request_uri),
            credential,
            repository: None,
        }
    }

    fn as_authorization_request(&self) -> AuthorizationRequest<'_> {
        let mut request = AuthorizationRequest::new(&self.method, &self.request_uri);
        request.credential = self.credential.as_deref();
        request.repository = self.repository.as_deref();
        request
    }
}

async fn authorize_target(
    state: &AppState,
    target: &RequestTarget,
) -> Result<AuthorizedIdentity, Challenge> {
    let identity = state
        .controller
        .authorized(&target.as_authorization_request())
        .await?;
    debug!(
        method = target.method.as_str(),
        request_uri = target.request_uri.as_str(),
        repository = target.repository.as_deref(),
        identity = identity.name.as_str(),
        "request authorized"
    );
    Ok(identity)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
